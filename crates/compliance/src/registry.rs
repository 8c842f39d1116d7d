//! Category registry
//!
//! Each resource category is declared as data: its field schema, how live
//! responses are reshaped, how deviations are remediated, and which
//! categories must be remediated before it on the same host. The registry
//! orders categories topologically once at construction.

use crate::error::{Error, Result};
use crate::types::Precondition;
use crate::value::{self, coerce, snake_case_keys};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Integer,
    String,
    StringList,
    Map,
    Any,
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::String => "string",
            Self::StringList => "string list",
            Self::Map => "mapping",
            Self::Any => "any",
        }
    }
}

/// Schema of a single declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    /// Lists compare element-by-element instead of as sets
    #[serde(default)]
    pub order_sensitive: bool,
    /// JSON pointers tried, in order, against the reshaped live response
    #[serde(default)]
    pub sources: Vec<String>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            order_sensitive: false,
            sources: Vec::new(),
        }
    }

    pub fn ordered(mut self) -> Self {
        self.order_sensitive = true;
        self
    }

    pub fn sources(mut self, pointers: &[&str]) -> Self {
        self.sources = pointers.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

/// Shape of the live response for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveShape {
    /// Already a mapping
    Object,
    /// A list of `{key, value}` pairs (option managers)
    KeyValueList { key: String, value: String },
    /// A list of objects identified by a name field (rulesets, services)
    NamedList { name: String },
}

impl LiveShape {
    pub fn key_value(key: &str, value: &str) -> Self {
        Self::KeyValueList {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn named_list(name: &str) -> Self {
        Self::NamedList {
            name: name.to_string(),
        }
    }
}

/// How field-level deviations are merged into actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// One action carrying the whole category object
    Whole,
    /// One action carrying only the deviating fields
    Delta,
    /// One action per top-level entry (ruleset, service)
    PerEntry,
    /// One action per deviation
    PerField,
}

/// Remediation operation registered for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    pub operation: String,
    pub mode: UpdateMode,
    /// A failure skips the remaining actions queued for the host
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
}

impl Remediation {
    pub fn new(operation: &str, mode: UpdateMode) -> Self {
        Self {
            operation: operation.to_string(),
            mode,
            blocking: false,
            preconditions: Vec::new(),
        }
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn requires(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }
}

/// A resource category: schema, comparison policy, remediation, ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySchema {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    /// Field names are data (option keys, ruleset names); all share this kind
    #[serde(default)]
    pub open_fields: Option<FieldKind>,
    /// Live fields absent from the document are flagged for removal
    #[serde(default)]
    pub exhaustive: bool,
    pub live_shape: LiveShape,
    /// Rewrite camelCase keys of live entries to snake_case
    #[serde(default)]
    pub snake_case_keys: bool,
    #[serde(default)]
    pub remediation: Option<Remediation>,
    /// Categories whose actions must run first on the same host
    #[serde(default)]
    pub after: Vec<String>,
}

impl CategorySchema {
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_string(),
            version,
            fields: BTreeMap::new(),
            open_fields: None,
            exhaustive: false,
            live_shape: LiveShape::Object,
            snake_case_keys: false,
            remediation: None,
            after: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    pub fn open(mut self, kind: FieldKind) -> Self {
        self.open_fields = Some(kind);
        self
    }

    pub fn exhaustive(mut self) -> Self {
        self.exhaustive = true;
        self
    }

    pub fn shape(mut self, shape: LiveShape) -> Self {
        self.live_shape = shape;
        self
    }

    pub fn with_snake_case_keys(mut self) -> Self {
        self.snake_case_keys = true;
        self
    }

    pub fn remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }

    pub fn after(mut self, categories: &[&str]) -> Self {
        self.after = categories.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Spec of a top-level field, declared or open
    pub fn field_spec(&self, field: &str) -> Option<FieldSpec> {
        self.fields
            .get(field)
            .cloned()
            .or_else(|| self.open_fields.map(FieldSpec::new))
    }

    /// Whether lists under this top-level field compare in order
    pub fn order_sensitive(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(|f| f.order_sensitive)
    }

    /// Reshape and project a raw live response into the document shape.
    ///
    /// Live data never fails normalization: values that cannot be coerced
    /// are kept as returned and will simply compare unequal.
    pub fn normalize(&self, raw: &Value) -> Map<String, Value> {
        let reshaped = self.reshape(raw);
        let mut out = Map::new();

        for (name, spec) in &self.fields {
            let found = if spec.sources.is_empty() {
                reshaped.get(name)
            } else {
                spec.sources
                    .iter()
                    .find_map(|pointer| reshaped.pointer(pointer).filter(|v| !v.is_null()))
            };
            if let Some(found) = found {
                out.insert(name.clone(), coerce_live(spec.kind, found));
            }
        }

        if let Some(kind) = self.open_fields
            && let Value::Object(map) = &reshaped
        {
            for (key, val) in map {
                if self.fields.contains_key(key) || out.contains_key(key) {
                    continue;
                }
                out.insert(key.clone(), coerce_live(kind, val));
            }
        }

        out
    }

    fn reshape(&self, raw: &Value) -> Value {
        let reshaped = match (&self.live_shape, raw) {
            (LiveShape::KeyValueList { key, value }, Value::Array(items)) => Value::Object(
                items
                    .iter()
                    .filter_map(|item| {
                        let k = item.get(key)?.as_str()?;
                        Some((k.to_string(), item.get(value).cloned().unwrap_or(Value::Null)))
                    })
                    .collect(),
            ),
            (LiveShape::NamedList { name }, Value::Array(items)) => Value::Object(
                items
                    .iter()
                    .filter_map(|item| {
                        let mut entry = item.as_object()?.clone();
                        let Value::String(entry_name) = entry.remove(name)? else {
                            return None;
                        };
                        Some((entry_name, Value::Object(entry)))
                    })
                    .collect(),
            ),
            (_, Value::Null) => Value::Object(Map::new()),
            (_, other) => other.clone(),
        };

        if !self.snake_case_keys {
            return reshaped;
        }
        // Entry names stay as-is; only the keys inside each entry are rewritten.
        match reshaped {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, snake_case_keys(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

fn coerce_live(kind: FieldKind, value: &Value) -> Value {
    match coerce(kind, value.clone()) {
        Ok(v) => v,
        Err(reason) => {
            log::debug!("keeping live value as returned ({reason})");
            value.clone()
        }
    }
}

/// Registry of resource categories, looked up by name
#[derive(Debug, Clone)]
pub struct Registry {
    categories: BTreeMap<String, CategorySchema>,
    order: Vec<String>,
    rank: HashMap<String, usize>,
}

impl Registry {
    /// Build a registry, validating dependencies and computing the order.
    ///
    /// Kahn's algorithm; ties are broken by category name so the order is
    /// stable across runs.
    pub fn new(categories: Vec<CategorySchema>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for category in categories {
            if by_name.contains_key(&category.name) {
                return Err(Error::InvalidRegistry {
                    message: format!("category '{}' registered twice", category.name),
                });
            }
            by_name.insert(category.name.clone(), category);
        }

        let mut indegree: BTreeMap<&str, usize> = by_name.keys().map(|k| (k.as_str(), 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for category in by_name.values() {
            for dep in &category.after {
                if !by_name.contains_key(dep) {
                    return Err(Error::InvalidRegistry {
                        message: format!(
                            "category '{}' depends on unknown category '{dep}'",
                            category.name
                        ),
                    });
                }
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(category.name.as_str());
                *indegree.entry(category.name.as_str()).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(by_name.len());
        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != by_name.len() {
            let stuck: Vec<&str> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(name, _)| *name)
                .collect();
            return Err(Error::InvalidRegistry {
                message: format!("dependency cycle among: {}", stuck.join(", ")),
            });
        }

        let rank = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self {
            categories: by_name,
            order,
            rank,
        })
    }

    /// The built-in ESXi host categories
    pub fn builtin() -> Result<Self> {
        Self::new(builtin_categories())
    }

    pub fn get(&self, name: &str) -> Option<&CategorySchema> {
        self.categories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }

    /// Position of a category in the dependency order
    pub fn rank(&self, name: &str) -> usize {
        self.rank.get(name).copied().unwrap_or(usize::MAX)
    }

    /// Categories in dependency order
    pub fn ordered(&self) -> impl Iterator<Item = &CategorySchema> {
        self.order.iter().filter_map(|name| self.categories.get(name))
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Normalize a raw live response for a category.
    ///
    /// Unknown categories pass through as a plain mapping.
    pub fn normalize(&self, category: &str, raw: &Value) -> Map<String, Value> {
        match self.categories.get(category) {
            Some(schema) => schema.normalize(raw),
            None => match raw {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            },
        }
    }

    /// Coerce a desired value for `category`/`field` to its declared kind
    pub fn coerce_desired(
        &self,
        category: &str,
        field: &str,
        desired: Value,
    ) -> std::result::Result<Value, String> {
        let schema = self
            .categories
            .get(category)
            .ok_or_else(|| format!("unknown category '{category}'"))?;
        let spec = schema
            .field_spec(value::top_segment(field))
            .ok_or_else(|| format!("unknown field '{field}'"))?;
        coerce(spec.kind, desired)
    }
}

fn builtin_categories() -> Vec<CategorySchema> {
    use FieldKind::{Bool, Integer, Map, String, StringList};

    vec![
        CategorySchema::new("maintenance-mode", 1)
            .field(
                "enabled",
                FieldSpec::new(Bool).sources(&[
                    "/enabled",
                    "/inMaintenanceMode",
                    "/runtime/inMaintenanceMode",
                ]),
            )
            .remediation(Remediation::new("host.set_maintenance_mode", UpdateMode::Whole).blocking()),
        CategorySchema::new("lockdown-mode", 1)
            .field(
                "enabled",
                FieldSpec::new(Bool).sources(&["/enabled", "/lockdownEnabled", "/config/lockdownMode"]),
            )
            .remediation(
                Remediation::new("host.set_lockdown_mode", UpdateMode::Whole)
                    .blocking()
                    .requires(Precondition::HostConnected),
            )
            .after(&["maintenance-mode"]),
        CategorySchema::new("advanced-option", 1)
            .open(FieldKind::Any)
            .shape(LiveShape::key_value("key", "value"))
            .remediation(
                Remediation::new("host.update_advanced_options", UpdateMode::Delta)
                    .requires(Precondition::HostConnected)
                    .requires(Precondition::LockdownDisabled),
            )
            .after(&["lockdown-mode"]),
        CategorySchema::new("network", 1)
            .field("mtu", FieldSpec::new(Integer).sources(&["/mtu", "/spec/mtu"]))
            .field(
                "vmotion_enabled",
                FieldSpec::new(Bool).sources(&["/vmotion_enabled", "/vmotion", "/spec/vmotion"]),
            )
            .field(
                "ipv6_enabled",
                FieldSpec::new(Bool).sources(&["/ipv6_enabled", "/ipV6Enabled", "/spec/ipV6Enabled"]),
            )
            .remediation(
                Remediation::new("host.update_network_config", UpdateMode::Whole)
                    .blocking()
                    .requires(Precondition::InMaintenanceMode),
            )
            .after(&["advanced-option"]),
        CategorySchema::new("firewall-rule", 1)
            .open(Map)
            .shape(LiveShape::named_list("key"))
            .with_snake_case_keys()
            .remediation(Remediation::new("host.update_firewall_ruleset", UpdateMode::PerEntry))
            .after(&["network"]),
        CategorySchema::new("dns", 1)
            .field(
                "servers",
                FieldSpec::new(StringList)
                    .ordered()
                    .sources(&["/servers", "/address", "/dnsConfig/address"]),
            )
            .field(
                "search_domains",
                FieldSpec::new(StringList).sources(&[
                    "/search_domains",
                    "/searchDomain",
                    "/dnsConfig/searchDomain",
                ]),
            )
            .field(
                "hostname",
                FieldSpec::new(String).sources(&["/hostname", "/hostName", "/dnsConfig/hostName"]),
            )
            .remediation(Remediation::new("host.update_dns_config", UpdateMode::Whole))
            .after(&["firewall-rule"]),
        CategorySchema::new("ntp", 1)
            .field(
                "servers",
                FieldSpec::new(StringList).sources(&["/servers", "/ntp_servers", "/ntpConfig/server"]),
            )
            .field(
                "service_running",
                FieldSpec::new(Bool).sources(&["/service_running", "/running"]),
            )
            .field(
                "service_policy",
                FieldSpec::new(String).sources(&["/service_policy", "/policy"]),
            )
            .remediation(Remediation::new("host.update_datetime_config", UpdateMode::Whole))
            .after(&["firewall-rule"]),
        CategorySchema::new("syslog", 1)
            .field(
                "loghost",
                FieldSpec::new(StringList).sources(&["/loghost", "/logHost", "/Syslog.global.logHost"]),
            )
            .field(
                "log_dir",
                FieldSpec::new(String).sources(&["/log_dir", "/logDir", "/Syslog.global.logDir"]),
            )
            .field(
                "default_rotate",
                FieldSpec::new(Integer).sources(&[
                    "/default_rotate",
                    "/defaultRotate",
                    "/Syslog.global.defaultRotate",
                ]),
            )
            .field(
                "default_size",
                FieldSpec::new(Integer).sources(&[
                    "/default_size",
                    "/defaultSize",
                    "/Syslog.global.defaultSize",
                ]),
            )
            .remediation(Remediation::new("host.set_syslog_config", UpdateMode::Delta))
            .after(&["firewall-rule"]),
        CategorySchema::new("service", 1)
            .open(Map)
            .shape(LiveShape::named_list("key"))
            .with_snake_case_keys()
            .remediation(Remediation::new("host.update_service", UpdateMode::PerEntry))
            .after(&["firewall-rule"]),
        // Read-only facts: deviations here cannot be remediated by configuration.
        CategorySchema::new("version", 1)
            .field(
                "product",
                FieldSpec::new(String).sources(&["/product", "/name", "/config/product/name"]),
            )
            .field(
                "version",
                FieldSpec::new(String).sources(&["/version", "/config/product/version"]),
            )
            .field(
                "build",
                FieldSpec::new(String).sources(&["/build", "/config/product/build"]),
            ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_order_respects_dependencies() {
        let registry = Registry::builtin().unwrap();
        assert!(registry.rank("maintenance-mode") < registry.rank("lockdown-mode"));
        assert!(registry.rank("advanced-option") < registry.rank("network"));
        assert!(registry.rank("network") < registry.rank("firewall-rule"));
        assert!(registry.rank("firewall-rule") < registry.rank("ntp"));
        assert!(registry.rank("firewall-rule") < registry.rank("syslog"));
        assert_eq!(registry.rank("nope"), usize::MAX);
    }

    #[test]
    fn test_order_is_stable() {
        let a: Vec<_> = Registry::builtin()
            .unwrap()
            .ordered()
            .map(|c| c.name.clone())
            .collect();
        let b: Vec<_> = Registry::builtin()
            .unwrap()
            .ordered()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_cycle_rejected() {
        let result = Registry::new(vec![
            CategorySchema::new("a", 1).after(&["b"]),
            CategorySchema::new("b", 1).after(&["a"]),
            CategorySchema::new("c", 1),
        ]);
        match result {
            Err(Error::InvalidRegistry { message }) => {
                assert!(message.contains("cycle"));
                assert!(message.contains('a') && message.contains('b'));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = Registry::new(vec![CategorySchema::new("a", 1).after(&["ghost"])]);
        assert!(matches!(result, Err(Error::InvalidRegistry { .. })));
    }

    #[test]
    fn test_ntp_shapes_normalize_identically() {
        let registry = Registry::builtin().unwrap();
        let pyvmomi = json!({
            "ntpConfig": {"server": ["10.0.0.1", "10.0.0.2"]},
            "running": "true",
            "policy": "on"
        });
        let flat = json!({
            "ntp_servers": ["10.0.0.1", "10.0.0.2"],
            "service_running": true,
            "service_policy": "on"
        });
        assert_eq!(
            registry.normalize("ntp", &pyvmomi),
            registry.normalize("ntp", &flat)
        );
    }

    #[test]
    fn test_option_list_normalizes_to_mapping() {
        let registry = Registry::builtin().unwrap();
        let list = json!([
            {"key": "DCUI.Access", "value": "root"},
            {"key": "Net.BlockGuestBPDU", "value": 1}
        ]);
        let map = json!({"DCUI.Access": "root", "Net.BlockGuestBPDU": 1});
        assert_eq!(
            registry.normalize("advanced-option", &list),
            registry.normalize("advanced-option", &map)
        );
    }

    #[test]
    fn test_ruleset_list_normalizes_keys() {
        let registry = Registry::builtin().unwrap();
        let raw = json!([
            {"key": "sshServer", "enabled": true, "allowedHosts": {"allIp": false, "ipAddress": ["10.0.0.0/8"]}}
        ]);
        let normalized = registry.normalize("firewall-rule", &raw);
        assert_eq!(
            normalized["sshServer"],
            json!({"enabled": true, "allowed_hosts": {"all_ip": false, "ip_address": ["10.0.0.0/8"]}})
        );
    }

    #[test]
    fn test_coerce_desired() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(
            registry.coerce_desired("network", "mtu", json!("9000")).unwrap(),
            json!(9000)
        );
        assert!(registry.coerce_desired("network", "speed", json!(1)).is_err());
        assert!(registry.coerce_desired("ntp", "servers", json!({"a": 1})).is_err());
        // open categories accept any key
        assert!(
            registry
                .coerce_desired("advanced-option", "UserVars.SuppressShellWarning", json!(1))
                .is_ok()
        );
    }

    #[test]
    fn test_coerce_desired_names_unknown_targets() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(
            registry.coerce_desired("snmp", "targets", json!([])).unwrap_err(),
            "unknown category 'snmp'"
        );
        assert_eq!(
            registry.coerce_desired("ntp", "pool", json!("a")).unwrap_err(),
            "unknown field 'pool'"
        );
    }

    #[test]
    fn test_advanced_options_require_lockdown_off() {
        let registry = Registry::builtin().unwrap();
        let schema = registry.get("advanced-option").unwrap();
        let remediation = schema.remediation.as_ref().unwrap();
        assert_eq!(
            remediation.preconditions,
            [Precondition::HostConnected, Precondition::LockdownDisabled]
        );
    }
}
