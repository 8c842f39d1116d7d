//! Value normalization and comparison
//!
//! Desired documents and live snapshots share one value model
//! (`serde_json::Value`). Field paths address nested mappings with `/`,
//! since advanced option names already contain dots.

use crate::registry::FieldKind;
use serde_json::{Map, Value};

/// Separator between segments of a nested field path
pub const FIELD_SEPARATOR: char = '/';

/// Join a parent path and a key into a field path
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{FIELD_SEPARATOR}{key}")
    }
}

/// First segment of a field path (the top-level field or entry name)
pub fn top_segment(path: &str) -> &str {
    path.split(FIELD_SEPARATOR).next().unwrap_or(path)
}

/// Whether a value carries no configuration.
///
/// Missing, null, and empty containers or strings all count as absent, so a
/// live `servers: []` and a missing `servers` behave the same. A mapping whose
/// values are all null (at any depth) is absent too: once the nulls are
/// stripped nothing is left to send.
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map
            .values()
            .all(|v| v.is_null() || (v.is_object() && is_absent(Some(v)))),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Compare two values after type normalization.
///
/// Numbers equal their numeric-string form, booleans equal `"true"`/`"false"`,
/// lists compare as sets unless `order_sensitive`, mappings recurse.
pub fn loose_eq(a: &Value, b: &Value, order_sensitive: bool) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .is_some_and(|(parsed, n)| parsed == n),
        (Value::Bool(flag), Value::String(s)) | (Value::String(s), Value::Bool(flag)) => {
            parse_bool(s) == Some(*flag)
        }
        (Value::Array(xs), Value::Array(ys)) => {
            if order_sensitive {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|(x, y)| loose_eq(x, y, order_sensitive))
            } else {
                xs.iter()
                    .all(|x| ys.iter().any(|y| loose_eq(x, y, order_sensitive)))
                    && ys
                        .iter()
                        .all(|y| xs.iter().any(|x| loose_eq(x, y, order_sensitive)))
            }
        }
        (Value::Object(xs), Value::Object(ys)) => {
            let present = |map: &Map<String, Value>| {
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| k.clone())
                    .collect::<Vec<_>>()
            };
            present(xs) == present(ys)
                && xs.iter().filter(|(_, v)| !v.is_null()).all(|(k, x)| {
                    ys.get(k)
                        .is_some_and(|y| loose_eq(x, y, order_sensitive))
                })
        }
        _ => a == b,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce a value to the representation declared by `kind`.
///
/// Null passes through untouched. Returns a description of the expected type
/// when the value cannot be represented.
pub fn coerce(kind: FieldKind, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    match kind {
        FieldKind::Any => Ok(value),
        FieldKind::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => parse_bool(&s)
                .map(Value::Bool)
                .ok_or_else(|| format!("expected boolean, got \"{s}\"")),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("expected boolean, got {n}")),
            },
            other => Err(format!("expected boolean, got {}", type_name(&other))),
        },
        FieldKind::Integer => match value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Ok(Value::Number(n))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| Value::from(f as i64))
                        .ok_or_else(|| format!("expected integer, got {n}"))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected integer, got \"{s}\"")),
            other => Err(format!("expected integer, got {}", type_name(&other))),
        },
        FieldKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected string, got {}", type_name(&other))),
        },
        FieldKind::StringList => match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| coerce(FieldKind::String, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
                .map_err(|e| format!("list item: {e}")),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            other => Err(format!("expected string list, got {}", type_name(&other))),
        },
        FieldKind::Map => match value {
            Value::Object(_) => Ok(value),
            other => Err(format!("expected mapping, got {}", type_name(&other))),
        },
    }
}

/// Short name of a JSON value's type, for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Look up a nested field by path
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(FIELD_SEPARATOR)
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Set a nested field by path, creating intermediate mappings.
///
/// `None` deletes the field instead.
pub fn set_path(target: &mut Value, path: &str, value: Option<Value>) {
    let mut segments = path.split(FIELD_SEPARATOR).peekable();
    let mut current = target;
    while let Some(key) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            match value {
                Some(v) => {
                    map.insert(key.to_string(), v);
                }
                None => {
                    map.remove(key);
                }
            }
            return;
        }
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Deep merge `overlay` into `base`.
///
/// - Mappings: recursive merge (overlay keys win)
/// - Null overlay values: delete the key
/// - Everything else: overlay replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                if overlay_val.is_null() {
                    base_map.remove(&key);
                } else if let Some(base_val) = base_map.get_mut(&key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_map.insert(key, overlay_val);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Convert a camelCase or PascalCase key to snake_case
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrite mapping keys to snake_case
pub fn snake_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (snake_case(&k), snake_case_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_case_keys).collect()),
        other => other,
    }
}
