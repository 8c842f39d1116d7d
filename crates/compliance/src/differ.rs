//! Differ: live snapshot vs desired state
//!
//! A pure function. Output is ordered by category, then by field path, so
//! repeated diffs of unchanged inputs are identical.

use crate::document::DesiredState;
use crate::registry::Registry;
use crate::types::{Deviation, DeviationKind, HostId, Snapshot};
use crate::value::{is_absent, join_path, loose_eq};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Compute the deviations of one host's snapshot from the desired state.
pub fn diff(snapshot: &Snapshot, desired: &DesiredState, registry: &Registry) -> Vec<Deviation> {
    let host_id = snapshot
        .host_id
        .clone()
        .unwrap_or_else(|| HostId::new(String::new()));
    let empty = Map::new();
    let mut deviations = Vec::new();

    for (category, wanted) in desired.categories() {
        if snapshot.is_skipped(category) {
            continue;
        }
        let Some(schema) = registry.get(category) else {
            continue;
        };
        let live = snapshot.category(category).unwrap_or(&empty);

        let mut fields: BTreeSet<&String> = wanted.keys().collect();
        if schema.exhaustive {
            fields.extend(live.keys());
        }

        let mut walker = Walker {
            host_id: &host_id,
            category,
            out: &mut deviations,
        };
        for field in fields {
            let order_sensitive = schema.order_sensitive(field);
            match wanted.get(field) {
                Some(desired_value) => {
                    walker.compare(field, live.get(field), desired_value, order_sensitive);
                }
                // Only reachable for exhaustive categories: live-only field.
                None => {
                    if let Some(current) = live.get(field).filter(|v| !is_absent(Some(*v))) {
                        walker.push(field, Some(current), None, DeviationKind::Remove);
                    }
                }
            }
        }
    }

    deviations
}

struct Walker<'a> {
    host_id: &'a HostId,
    category: &'a str,
    out: &'a mut Vec<Deviation>,
}

impl Walker<'_> {
    fn compare(&mut self, path: &str, live: Option<&Value>, desired: &Value, order_sensitive: bool) {
        match (desired, live) {
            (Value::Null, _) => {
                if !is_absent(live) {
                    self.push(path, live, None, DeviationKind::Remove);
                }
            }
            (Value::Object(wanted), Some(Value::Object(current))) if !current.is_empty() => {
                let mut keys: Vec<&String> = wanted.keys().collect();
                keys.sort();
                for key in keys {
                    if let Some(value) = wanted.get(key) {
                        self.compare(&join_path(path, key), current.get(key), value, order_sensitive);
                    }
                }
            }
            _ if is_absent(live) => {
                if !is_absent(Some(desired)) {
                    self.push(path, None, Some(desired), DeviationKind::Add);
                }
            }
            (_, Some(current)) => {
                if !loose_eq(current, desired, order_sensitive) {
                    self.push(path, Some(current), Some(desired), DeviationKind::Change);
                }
            }
            (_, None) => {}
        }
    }

    fn push(&mut self, path: &str, current: Option<&Value>, desired: Option<&Value>, action: DeviationKind) {
        self.out.push(Deviation {
            host_id: self.host_id.clone(),
            category: self.category.to_string(),
            field: path.to_string(),
            current_value: current.filter(|v| !v.is_null()).cloned(),
            desired_value: desired.cloned(),
            action,
        });
    }
}
