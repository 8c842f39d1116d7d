//! In-memory management plane for engine tests

use crate::context::{CallContext, CancellationToken, ManagementPlane};
use crate::error::{Error, Result};
use crate::registry::{Registry, UpdateMode};
use crate::types::{Action, HostId, Precondition};
use crate::value::deep_merge;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    down: bool,
    clusters: BTreeMap<String, Vec<HostId>>,
    hosts: BTreeMap<HostId, BTreeMap<String, Value>>,
    unreachable: BTreeSet<HostId>,
    unsupported: BTreeSet<(HostId, String)>,
    failing: BTreeSet<(HostId, String)>,
    flaky_reads: usize,
    no_resolve: bool,
    cancel_on_apply: Option<CancellationToken>,
    applied: Vec<Action>,
    calls: Vec<String>,
}

pub struct MockPlane {
    registry: Registry,
    state: Mutex<MockState>,
}

impl MockPlane {
    pub fn new() -> Self {
        Self {
            registry: Registry::builtin().unwrap(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn with(mut self, f: impl FnOnce(&mut MockState)) -> Self {
        f(self.state.get_mut().unwrap());
        self
    }

    pub fn host(self, host: &str, cluster: &str) -> Self {
        self.with(|s| {
            s.clusters
                .entry(cluster.to_string())
                .or_default()
                .push(host.into());
            s.hosts.entry(host.into()).or_default();
        })
    }

    pub fn state(self, host: &str, category: &str, raw: Value) -> Self {
        self.with(|s| {
            s.hosts
                .entry(host.into())
                .or_default()
                .insert(category.to_string(), raw);
        })
    }

    pub fn down(self) -> Self {
        self.with(|s| s.down = true)
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.with(|s| {
            s.unreachable.insert(host.into());
        })
    }

    pub fn unsupported(self, host: &str, category: &str) -> Self {
        self.with(|s| {
            s.unsupported.insert((host.into(), category.to_string()));
        })
    }

    pub fn failing(self, host: &str, operation: &str) -> Self {
        self.with(|s| {
            s.failing.insert((host.into(), operation.to_string()));
        })
    }

    /// The next `count` reads fail with a transient error
    pub fn flaky_reads(self, count: usize) -> Self {
        self.with(|s| s.flaky_reads = count)
    }

    /// Preconditions cannot be resolved by this plane
    pub fn no_resolve(self) -> Self {
        self.with(|s| s.no_resolve = true)
    }

    /// Cancel `token` as soon as the first action is applied
    pub fn cancel_on_apply(self, token: &CancellationToken) -> Self {
        let token = token.clone();
        self.with(|s| s.cancel_on_apply = Some(token))
    }

    pub fn applied(&self) -> Vec<Action> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn raw(&self, host: &str, category: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .hosts
            .get(&HostId::from(host))
            .and_then(|h| h.get(category))
            .cloned()
    }

    fn flag(&self, host: &HostId, category: &str) -> bool {
        let state = self.state.lock().unwrap();
        let raw = state
            .hosts
            .get(host)
            .and_then(|h| h.get(category))
            .cloned()
            .unwrap_or(Value::Null);
        drop(state);
        self.registry.normalize(category, &raw).get("enabled") == Some(&json!(true))
    }

    fn set_flag(&self, host: &HostId, category: &str, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        state
            .hosts
            .entry(host.clone())
            .or_default()
            .insert(category.to_string(), json!({ "enabled": enabled }));
    }
}

impl ManagementPlane for MockPlane {
    fn ping(&self, _ctx: &CallContext) -> Result<()> {
        if self.state.lock().unwrap().down {
            return Err(Error::ManagementPlaneUnreachable {
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn resolve_scope(&self, cluster: &str, _ctx: &CallContext) -> Result<Vec<HostId>> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .get(cluster)
            .cloned()
            .ok_or_else(|| Error::InvalidScope {
                message: format!("unknown cluster '{cluster}'"),
            })
    }

    fn read_category(&self, host: &HostId, category: &str, _ctx: &CallContext) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(host) {
            return Err(Error::UnreachableHost {
                host: host.to_string(),
                message: "no route to host".into(),
            });
        }
        if state.flaky_reads > 0 {
            state.flaky_reads -= 1;
            return Err(Error::Transient {
                message: "server busy".into(),
            });
        }
        if state.unsupported.contains(&(host.clone(), category.to_string())) {
            return Err(Error::UnsupportedCategory {
                host: host.to_string(),
                category: category.to_string(),
            });
        }
        Ok(state
            .hosts
            .get(host)
            .and_then(|h| h.get(category))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn apply(&self, action: &Action, _ctx: &CallContext) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = &state.cancel_on_apply {
            token.cancel();
        }
        if state
            .failing
            .contains(&(action.host_id.clone(), action.operation.clone()))
        {
            return Err(Error::OperationFailed {
                host: action.host_id.to_string(),
                operation: action.operation.clone(),
                message: "rejected by host".into(),
            });
        }
        state.applied.push(action.clone());

        let categories = state.hosts.entry(action.host_id.clone()).or_default();
        let raw = categories.get(&action.category).cloned().unwrap_or(Value::Null);
        let mut current = Value::Object(self.registry.normalize(&action.category, &raw));
        match action.mode {
            UpdateMode::Whole => current = action.payload.clone(),
            _ => deep_merge(&mut current, action.payload.clone()),
        }
        categories.insert(action.category.clone(), current);
        Ok(())
    }

    fn check_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        _ctx: &CallContext,
    ) -> Result<bool> {
        Ok(match precondition {
            Precondition::InMaintenanceMode => self.flag(host, "maintenance-mode"),
            Precondition::LockdownDisabled => !self.flag(host, "lockdown-mode"),
            Precondition::HostConnected => !self.state.lock().unwrap().unreachable.contains(host),
        })
    }

    fn resolve_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        _ctx: &CallContext,
    ) -> Result<()> {
        if self.state.lock().unwrap().no_resolve {
            return Err(Error::Unsupported {
                message: format!("cannot resolve '{precondition}'"),
            });
        }
        match precondition {
            Precondition::InMaintenanceMode => self.set_flag(host, "maintenance-mode", true),
            Precondition::LockdownDisabled => self.set_flag(host, "lockdown-mode", false),
            Precondition::HostConnected => {}
        }
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("resolve {precondition} on {host}"));
        Ok(())
    }

    fn revert_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        _ctx: &CallContext,
    ) -> Result<()> {
        match precondition {
            Precondition::InMaintenanceMode => self.set_flag(host, "maintenance-mode", false),
            Precondition::LockdownDisabled => self.set_flag(host, "lockdown-mode", true),
            Precondition::HostConnected => {}
        }
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("revert {precondition} on {host}"));
        Ok(())
    }
}
