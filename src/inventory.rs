//! File-backed management plane
//!
//! An inventory file describes clusters, hosts and the raw live
//! configuration of each host, in the shapes a management-plane API would
//! return. Applied actions update the in-memory copy; [`InventoryPlane::save`]
//! writes it back.

use anyhow::{Context as _, Result};
use compliance::{
    Action, CallContext, DocumentFormat, HostId, ManagementPlane, Precondition, Registry,
    UpdateMode, value::deep_merge,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Whether the management plane itself answers
    #[serde(default = "default_true")]
    pub reachable: bool,

    /// Cluster path to host ids
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub hosts: BTreeMap<String, InventoryHost>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            reachable: true,
            clusters: BTreeMap::new(),
            hosts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryHost {
    #[serde(default = "default_true")]
    pub reachable: bool,

    /// Simulated latency of every call to this host
    #[serde(default, skip_serializing_if = "is_zero")]
    pub latency_ms: u64,

    /// Operations the host rejects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fail_operations: Vec<String>,

    /// Categories the host does not support
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<String>,

    /// Raw live configuration by category
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
}

impl Default for InventoryHost {
    fn default() -> Self {
        Self {
            reachable: true,
            latency_ms: 0,
            fail_operations: Vec::new(),
            unsupported: Vec::new(),
            state: BTreeMap::new(),
        }
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

pub struct InventoryPlane {
    path: Option<PathBuf>,
    registry: Registry,
    inventory: Mutex<Inventory>,
    dirty: AtomicBool,
}

impl InventoryPlane {
    pub fn new(inventory: Inventory, registry: Registry) -> Self {
        Self {
            path: None,
            registry,
            inventory: Mutex::new(inventory),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load an inventory file; the format follows the extension
    pub fn load(path: &Path, registry: Registry) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read inventory: {}", path.display()))?;
        let value = DocumentFormat::from_path(path)
            .parse(&text)
            .with_context(|| format!("Could not parse inventory: {}", path.display()))?;
        let inventory: Inventory = serde_json::from_value(value)
            .with_context(|| format!("Invalid inventory: {}", path.display()))?;
        log::debug!(
            "Loaded inventory {} ({} clusters, {} hosts)",
            path.display(),
            inventory.clusters.len(),
            inventory.hosts.len()
        );

        let mut plane = Self::new(inventory, registry);
        plane.path = Some(path.to_path_buf());
        Ok(plane)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether any call changed the inventory since it was loaded
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Inventory {
        self.inventory().clone()
    }

    /// Write changes back to the file it was loaded from.
    ///
    /// Returns whether anything was written.
    pub fn save(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.is_dirty() {
            return Ok(false);
        }

        let inventory = self.snapshot();
        let text = match DocumentFormat::from_path(path) {
            DocumentFormat::Json => serde_json::to_string_pretty(&inventory)?,
            DocumentFormat::Toml => toml::to_string_pretty(&inventory)
                .context("Inventory cannot be written as TOML (null values are not supported)")?,
            DocumentFormat::Yaml => serde_yaml::to_string(&inventory)?,
        };
        std::fs::write(path, text)
            .with_context(|| format!("Could not write inventory: {}", path.display()))?;
        self.dirty.store(false, Ordering::SeqCst);
        log::info!("Saved inventory {}", path.display());
        Ok(true)
    }

    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a host, sleeping for its latency outside the lock.
    ///
    /// Latency beyond the call timeout becomes a timeout error.
    fn reach(&self, host: &HostId, operation: &str, ctx: &CallContext) -> compliance::Result<()> {
        let latency = {
            let inventory = self.inventory();
            let Some(entry) = inventory.hosts.get(host.as_str()) else {
                return Err(compliance::Error::UnreachableHost {
                    host: host.to_string(),
                    message: "not in inventory".into(),
                });
            };
            if !entry.reachable {
                return Err(compliance::Error::UnreachableHost {
                    host: host.to_string(),
                    message: "host is not responding".into(),
                });
            }
            Duration::from_millis(entry.latency_ms)
        };

        if latency > ctx.timeout {
            std::thread::sleep(ctx.timeout);
            return Err(compliance::Error::Timeout {
                operation: format!("{operation} on {host}"),
                timeout_ms: ctx.timeout_ms(),
            });
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        Ok(())
    }

    fn flag(&self, host: &HostId, category: &str) -> bool {
        let raw = self
            .inventory()
            .hosts
            .get(host.as_str())
            .and_then(|h| h.state.get(category))
            .cloned()
            .unwrap_or(Value::Null);
        self.registry.normalize(category, &raw).get("enabled") == Some(&json!(true))
    }

    fn set_flag(&self, host: &HostId, category: &str, enabled: bool) {
        if let Some(entry) = self.inventory().hosts.get_mut(host.as_str()) {
            entry
                .state
                .insert(category.to_string(), json!({ "enabled": enabled }));
            self.dirty.store(true, Ordering::SeqCst);
        }
    }
}

impl ManagementPlane for InventoryPlane {
    fn ping(&self, _ctx: &CallContext) -> compliance::Result<()> {
        if self.inventory().reachable {
            Ok(())
        } else {
            Err(compliance::Error::ManagementPlaneUnreachable {
                message: "management plane is not responding".into(),
            })
        }
    }

    fn resolve_scope(&self, cluster: &str, _ctx: &CallContext) -> compliance::Result<Vec<HostId>> {
        self.inventory()
            .clusters
            .get(cluster)
            .map(|hosts| hosts.iter().map(HostId::new).collect())
            .ok_or_else(|| compliance::Error::InvalidScope {
                message: format!("unknown cluster '{cluster}'"),
            })
    }

    fn read_category(
        &self,
        host: &HostId,
        category: &str,
        ctx: &CallContext,
    ) -> compliance::Result<Value> {
        self.reach(host, &format!("read {category}"), ctx)?;
        let inventory = self.inventory();
        let Some(entry) = inventory.hosts.get(host.as_str()) else {
            return Err(compliance::Error::UnreachableHost {
                host: host.to_string(),
                message: "not in inventory".into(),
            });
        };
        if entry.unsupported.iter().any(|c| c == category) {
            return Err(compliance::Error::UnsupportedCategory {
                host: host.to_string(),
                category: category.to_string(),
            });
        }
        Ok(entry.state.get(category).cloned().unwrap_or(Value::Null))
    }

    fn apply(&self, action: &Action, ctx: &CallContext) -> compliance::Result<()> {
        self.reach(&action.host_id, &action.operation, ctx)?;

        let mut inventory = self.inventory();
        let Some(entry) = inventory.hosts.get_mut(action.host_id.as_str()) else {
            return Err(compliance::Error::UnreachableHost {
                host: action.host_id.to_string(),
                message: "not in inventory".into(),
            });
        };
        if entry.fail_operations.contains(&action.operation) {
            return Err(compliance::Error::OperationFailed {
                host: action.host_id.to_string(),
                operation: action.operation.clone(),
                message: "rejected by host".into(),
            });
        }

        let raw = entry
            .state
            .get(&action.category)
            .cloned()
            .unwrap_or(Value::Null);
        let mut current = Value::Object(self.registry.normalize(&action.category, &raw));
        match action.mode {
            UpdateMode::Whole => current = action.payload.clone(),
            UpdateMode::Delta | UpdateMode::PerEntry | UpdateMode::PerField => {
                deep_merge(&mut current, action.payload.clone());
            }
        }
        if current.is_null() {
            current = Value::Object(Map::new());
        }
        entry.state.insert(action.category.clone(), current);
        drop(inventory);

        self.dirty.store(true, Ordering::SeqCst);
        log::debug!("{} applied {} on {}", action.operation, action.label(), action.host_id);
        Ok(())
    }

    fn check_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        ctx: &CallContext,
    ) -> compliance::Result<bool> {
        Ok(match precondition {
            Precondition::InMaintenanceMode => {
                self.reach(host, "check maintenance mode", ctx)?;
                self.flag(host, "maintenance-mode")
            }
            Precondition::LockdownDisabled => {
                self.reach(host, "check lockdown mode", ctx)?;
                !self.flag(host, "lockdown-mode")
            }
            Precondition::HostConnected => self.reach(host, "check connection", ctx).is_ok(),
        })
    }

    fn resolve_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        ctx: &CallContext,
    ) -> compliance::Result<()> {
        self.reach(host, &format!("make '{precondition}' hold"), ctx)?;
        match precondition {
            Precondition::InMaintenanceMode => self.set_flag(host, "maintenance-mode", true),
            Precondition::LockdownDisabled => self.set_flag(host, "lockdown-mode", false),
            Precondition::HostConnected => {
                return Err(compliance::Error::Unsupported {
                    message: format!("cannot reconnect {host}"),
                });
            }
        }
        Ok(())
    }

    fn revert_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        ctx: &CallContext,
    ) -> compliance::Result<()> {
        self.reach(host, &format!("revert '{precondition}'"), ctx)?;
        match precondition {
            Precondition::InMaintenanceMode => self.set_flag(host, "maintenance-mode", false),
            Precondition::LockdownDisabled => self.set_flag(host, "lockdown-mode", true),
            Precondition::HostConnected => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance::{
        CancellationToken, DesiredStateDocument, Engine, EngineOptions, HostStatus, RetryConfig,
        Scope,
    };

    const INVENTORY: &str = r#"
clusters:
  /DC/host/A: [esxi-01, esxi-02]
hosts:
  esxi-01:
    state:
      ntp:
        servers: [10.0.0.9]
        service_running: true
      lockdown-mode:
        enabled: true
  esxi-02:
    state:
      ntp:
        servers: [10.0.0.1]
        service_running: true
"#;

    fn engine() -> Engine {
        Engine::builtin(EngineOptions {
            retry: RetryConfig::no_retry(),
            call_timeout: Duration::from_millis(200),
            ..EngineOptions::default()
        })
        .unwrap()
    }

    fn write_inventory(dir: &Path) -> PathBuf {
        let path = dir.join("inventory.yaml");
        std::fs::write(&path, INVENTORY).unwrap();
        path
    }

    fn doc() -> DesiredStateDocument {
        DesiredStateDocument::from_value(json!({"ntp": {"servers": ["10.0.0.1"]}})).unwrap()
    }

    fn scope() -> Scope {
        Scope::new(["/DC/host/A"]).unwrap()
    }

    #[test]
    fn test_resolve_scope() {
        let dir = tempfile::tempdir().unwrap();
        let plane = InventoryPlane::load(&write_inventory(dir.path()), Registry::builtin().unwrap()).unwrap();
        let ctx = CallContext::default();

        let hosts = plane.resolve_scope("/DC/host/A", &ctx).unwrap();
        assert_eq!(hosts, vec![HostId::from("esxi-01"), HostId::from("esxi-02")]);
        assert!(matches!(
            plane.resolve_scope("/DC/host/Z", &ctx),
            Err(compliance::Error::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_remediate_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_inventory(dir.path());
        let plane = InventoryPlane::load(&path, Registry::builtin().unwrap()).unwrap();
        let engine = engine();
        let cancel = CancellationToken::new();

        let report = engine.remediate(&plane, &scope(), &doc(), false, &cancel).unwrap();
        assert!(report.is_compliant());
        assert_eq!(report.summary.actions_succeeded, 1);
        assert!(plane.is_dirty());
        assert!(plane.save().unwrap());
        assert!(!plane.save().unwrap());

        let reloaded = InventoryPlane::load(&path, Registry::builtin().unwrap()).unwrap();
        let check = engine
            .check_compliance(&reloaded, &scope(), &doc(), &cancel)
            .unwrap();
        assert!(check.is_compliant());
    }

    #[test]
    fn test_dry_run_leaves_inventory_clean() {
        let dir = tempfile::tempdir().unwrap();
        let plane = InventoryPlane::load(&write_inventory(dir.path()), Registry::builtin().unwrap()).unwrap();
        let before = plane.snapshot();

        let report = engine()
            .remediate(&plane, &scope(), &doc(), true, &CancellationToken::new())
            .unwrap();
        assert!(report.kind.is_dry_run());
        assert!(!plane.is_dirty());
        assert_eq!(plane.snapshot(), before);
    }

    #[test]
    fn test_slow_host_times_out() {
        let mut inventory: Inventory = serde_yaml::from_str(INVENTORY).unwrap();
        inventory.hosts.get_mut("esxi-02").unwrap().latency_ms = 5_000;
        let plane = InventoryPlane::new(inventory, Registry::builtin().unwrap());

        let report = engine()
            .check_compliance(&plane, &scope(), &doc(), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.hosts[&HostId::from("esxi-02")].status, HostStatus::Errored);
        assert_eq!(report.hosts[&HostId::from("esxi-01")].status, HostStatus::NonCompliant);
    }

    #[test]
    fn test_rejected_operation_fails_action() {
        let mut inventory: Inventory = serde_yaml::from_str(INVENTORY).unwrap();
        inventory
            .hosts
            .get_mut("esxi-01")
            .unwrap()
            .fail_operations
            .push("host.update_datetime_config".into());
        let plane = InventoryPlane::new(inventory, Registry::builtin().unwrap());

        let report = engine()
            .remediate(&plane, &scope(), &doc(), false, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.summary.actions_failed, 1);
        assert_eq!(report.hosts[&HostId::from("esxi-01")].status, HostStatus::Errored);
        // unsaved plane has no path
        assert!(!plane.save().unwrap());
    }

    #[test]
    fn test_unreachable_plane_aborts() {
        let inventory = Inventory {
            reachable: false,
            ..Inventory::default()
        };
        let plane = InventoryPlane::new(inventory, Registry::builtin().unwrap());
        let err = engine()
            .check_compliance(&plane, &scope(), &doc(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, compliance::Error::ManagementPlaneUnreachable { .. }));
    }

    #[test]
    fn test_preconditions_toggle_flags() {
        let inventory: Inventory = serde_yaml::from_str(INVENTORY).unwrap();
        let plane = InventoryPlane::new(inventory, Registry::builtin().unwrap());
        let ctx = CallContext::default();
        let host = HostId::from("esxi-01");

        assert!(!plane.check_precondition(&host, Precondition::LockdownDisabled, &ctx).unwrap());
        plane.resolve_precondition(&host, Precondition::LockdownDisabled, &ctx).unwrap();
        assert!(plane.check_precondition(&host, Precondition::LockdownDisabled, &ctx).unwrap());
        plane.revert_precondition(&host, Precondition::LockdownDisabled, &ctx).unwrap();
        assert!(!plane.check_precondition(&host, Precondition::LockdownDisabled, &ctx).unwrap());

        assert!(plane.check_precondition(&host, Precondition::HostConnected, &ctx).unwrap());
        assert!(!plane
            .check_precondition(&HostId::from("esxi-99"), Precondition::HostConnected, &ctx)
            .unwrap());
    }
}
