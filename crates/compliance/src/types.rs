//! Core types shared across the pipeline

use crate::error::{Error, Result};
use crate::registry::UpdateMode;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

static CLUSTER_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/[^/]+)+$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Identifier of a managed host
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for HostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Set of cluster paths a run operates on, optionally narrowed to some hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    clusters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hosts: Option<BTreeSet<HostId>>,
}

impl Scope {
    /// Validate cluster paths such as `/Datacenter/host/Cluster-01`.
    ///
    /// Segments may contain inner spaces but must not be blank. Duplicates
    /// are collapsed, first occurrence wins.
    pub fn new<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut clusters: Vec<String> = Vec::new();
        for path in paths {
            let path = path.into();
            let trimmed = path.trim();
            let blank_segment = trimmed.split('/').skip(1).any(|s| s.trim().is_empty());
            if blank_segment || !CLUSTER_PATH.is_match(trimmed) {
                return Err(Error::InvalidScope {
                    message: format!("'{path}' is not a cluster path (expected /dc/host/cluster)"),
                });
            }
            if !clusters.iter().any(|c| c == trimmed) {
                clusters.push(trimmed.to_string());
            }
        }
        if clusters.is_empty() {
            return Err(Error::InvalidScope {
                message: "no cluster paths given".to_string(),
            });
        }
        Ok(Self { clusters, hosts: None })
    }

    /// Narrow the run to these host ids. An empty list keeps every host.
    #[must_use]
    pub fn with_hosts<I, H>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<HostId>,
    {
        let hosts: BTreeSet<HostId> = hosts.into_iter().map(Into::into).collect();
        self.hosts = (!hosts.is_empty()).then_some(hosts);
        self
    }

    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    /// Host filter, if any
    pub fn hosts(&self) -> Option<&BTreeSet<HostId>> {
        self.hosts.as_ref()
    }

    /// Whether a resolved host passes the filter
    pub fn includes(&self, host: &HostId) -> bool {
        self.hosts.as_ref().is_none_or(|hosts| hosts.contains(host))
    }
}

/// What applying a deviation does to the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviationKind {
    Add,
    Change,
    Remove,
}

impl fmt::Display for DeviationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "ADD",
            Self::Change => "CHANGE",
            Self::Remove => "REMOVE",
        })
    }
}

/// A single difference between live and desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub host_id: HostId,
    pub category: String,
    /// `/`-separated path below the category
    pub field: String,
    pub current_value: Option<Value>,
    pub desired_value: Option<Value>,
    pub action: DeviationKind,
}

/// A category the inspector could not read on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySkip {
    pub category: String,
    pub reason: String,
}

/// Normalized live configuration of one host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub host_id: Option<HostId>,
    pub categories: BTreeMap<String, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<CategorySkip>,
}

impl Snapshot {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id: Some(host_id),
            ..Self::default()
        }
    }

    pub fn category(&self, name: &str) -> Option<&Map<String, Value>> {
        self.categories.get(name)
    }

    pub fn is_skipped(&self, category: &str) -> bool {
        self.skipped.iter().any(|s| s.category == category)
    }
}

/// Host state that must hold before an action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    InMaintenanceMode,
    LockdownDisabled,
    HostConnected,
}

impl Precondition {
    /// Whether the executor may satisfy this itself (and revert it afterwards)
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Self::InMaintenanceMode | Self::LockdownDisabled)
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InMaintenanceMode => "in maintenance mode",
            Self::LockdownDisabled => "lockdown disabled",
            Self::HostConnected => "host connected",
        })
    }
}

/// A planned remediation operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub host_id: HostId,
    pub category: String,
    pub operation: String,
    pub mode: UpdateMode,
    pub payload: Value,
    pub preconditions: Vec<Precondition>,
    pub blocking: bool,
    /// Field paths this action resolves
    pub fields: Vec<String>,
}

impl Action {
    /// Short label for logs and progress output
    pub fn label(&self) -> String {
        match self.mode {
            UpdateMode::PerEntry | UpdateMode::PerField => match self.fields.first() {
                Some(field) => format!(
                    "{} {}",
                    self.category,
                    crate::value::top_segment(field)
                ),
                None => self.category.clone(),
            },
            UpdateMode::Whole | UpdateMode::Delta => self.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        })
    }
}

/// Why an action did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OutcomeReason {
    PreconditionUnmet,
    UpstreamActionFailed,
    RunCancelled,
    OperationFailed,
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreconditionUnmet => "PreconditionUnmet",
            Self::UpstreamActionFailed => "UpstreamActionFailed",
            Self::RunCancelled => "RunCancelled",
            Self::OperationFailed => "OperationFailed",
        })
    }
}

/// A precondition the executor satisfied (or reverted) on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub precondition: Precondition,
    pub status: OutcomeStatus,
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub applied_at: DateTime<Utc>,
}

/// Recorded result of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action: Action,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<OutcomeReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolutions: Vec<Resolution>,
    pub applied_at: DateTime<Utc>,
}

impl Outcome {
    pub fn succeeded(action: Action, simulated: bool, resolutions: Vec<Resolution>) -> Self {
        Self {
            action,
            status: OutcomeStatus::Succeeded,
            reason: None,
            error: None,
            simulated,
            resolutions,
            applied_at: Utc::now(),
        }
    }

    pub fn failed(
        action: Action,
        reason: OutcomeReason,
        error: impl Into<String>,
        resolutions: Vec<Resolution>,
    ) -> Self {
        Self {
            action,
            status: OutcomeStatus::Failed,
            reason: Some(reason),
            error: Some(error.into()),
            simulated: false,
            resolutions,
            applied_at: Utc::now(),
        }
    }

    pub fn skipped(action: Action, reason: OutcomeReason) -> Self {
        Self {
            action,
            status: OutcomeStatus::Skipped,
            reason: Some(reason),
            error: None,
            simulated: false,
            resolutions: Vec::new(),
            applied_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }

    /// Whether this changed the host (a real, successful apply)
    pub fn is_applied(&self) -> bool {
        self.status == OutcomeStatus::Succeeded && !self.simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_validation() {
        let scope = Scope::new(["/DC1/host/Cluster-A", "/DC1/host/Cluster-A", "/DC1/host/B"]).unwrap();
        assert_eq!(scope.clusters(), ["/DC1/host/Cluster-A", "/DC1/host/B"]);

        assert!(matches!(
            Scope::new(Vec::<String>::new()),
            Err(Error::InvalidScope { .. })
        ));
        assert!(Scope::new(["DC1/host"]).is_err());
        assert!(Scope::new(["/DC1//host"]).is_err());
        assert!(Scope::new(["/DC1/ /B"]).is_err());
        assert!(Scope::new(["/DC1/host/"]).is_err());
    }

    #[test]
    fn test_scope_accepts_names_with_spaces() {
        let scope = Scope::new([" /Datacenter 1/host/Prod Cluster "]).unwrap();
        assert_eq!(scope.clusters(), ["/Datacenter 1/host/Prod Cluster"]);
    }

    #[test]
    fn test_scope_host_filter() {
        let scope = Scope::new(["/DC1/host/A"]).unwrap();
        assert!(scope.hosts().is_none());
        assert!(scope.includes(&HostId::from("esxi-09")));

        let narrowed = scope.clone().with_hosts(["esxi-01", "esxi-02", "esxi-01"]);
        assert_eq!(narrowed.hosts().map(BTreeSet::len), Some(2));
        assert!(narrowed.includes(&HostId::from("esxi-02")));
        assert!(!narrowed.includes(&HostId::from("esxi-09")));

        assert_eq!(scope.clone().with_hosts(Vec::<String>::new()), scope);
    }

    #[test]
    fn test_precondition_resolvable() {
        assert!(Precondition::InMaintenanceMode.is_resolvable());
        assert!(Precondition::LockdownDisabled.is_resolvable());
        assert!(!Precondition::HostConnected.is_resolvable());
    }

    #[test]
    fn test_deviation_kind_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&DeviationKind::Remove).unwrap(),
            "\"REMOVE\""
        );
        assert_eq!(
            serde_json::to_string(&OutcomeReason::UpstreamActionFailed).unwrap(),
            "\"UpstreamActionFailed\""
        );
    }

    #[test]
    fn test_action_label() {
        let action = Action {
            host_id: "esxi-01".into(),
            category: "firewall-rule".into(),
            operation: "host.update_firewall_ruleset".into(),
            mode: UpdateMode::PerEntry,
            payload: Value::Null,
            preconditions: vec![],
            blocking: false,
            fields: vec!["sshServer/enabled".into()],
        };
        assert_eq!(action.label(), "firewall-rule sshServer");
    }
}
