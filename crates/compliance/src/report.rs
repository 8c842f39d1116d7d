//! Compliance reports
//!
//! Pure aggregation of per-host results. Host workers push into a
//! [`ReportBuilder`]; the only lock in a run guards that append.

use crate::types::{CategorySkip, Deviation, HostId, Outcome, OutcomeStatus, Resolution};
use crate::value::FIELD_SEPARATOR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    Compliant,
    NonCompliant,
    Errored,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compliant => "COMPLIANT",
            Self::NonCompliant => "NON_COMPLIANT",
            Self::Errored => "ERRORED",
        })
    }
}

/// Host-level failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorCode {
    UnreachableHost,
    UnplannableDeviation,
    RunCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl HostError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category: None,
            field: None,
        }
    }

    pub fn unplannable(deviation: &Deviation) -> Self {
        Self {
            code: ErrorCode::UnplannableDeviation,
            message: format!("no remediation registered for category '{}'", deviation.category),
            category: Some(deviation.category.clone()),
            field: Some(deviation.field.clone()),
        }
    }
}

/// Everything recorded for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub host_id: HostId,
    pub cluster: String,
    pub status: HostStatus,
    /// Deviations left after the run
    pub deviations: Vec<Deviation>,
    /// Deviations found before remediation started
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_deviations: Vec<Deviation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<Outcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restorations: Vec<Resolution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HostError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<CategorySkip>,
}

impl HostReport {
    pub fn new(host_id: HostId, cluster: impl Into<String>) -> Self {
        Self {
            host_id,
            cluster: cluster.into(),
            status: HostStatus::Compliant,
            deviations: Vec::new(),
            initial_deviations: Vec::new(),
            outcomes: Vec::new(),
            restorations: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// A host that failed before producing any comparison
    pub fn errored(host_id: HostId, cluster: impl Into<String>, error: HostError) -> Self {
        let mut report = Self::new(host_id, cluster);
        report.errors.push(error);
        report.finalize()
    }

    /// Derive the status from what was recorded
    pub fn finalize(mut self) -> Self {
        self.status = if !self.errors.is_empty() || self.outcomes.iter().any(Outcome::is_failed) {
            HostStatus::Errored
        } else if self.deviations.is_empty() {
            HostStatus::Compliant
        } else {
            HostStatus::NonCompliant
        };
        self
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportKind {
    Check,
    Remediation { dry_run: bool },
}

impl ReportKind {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::Remediation { dry_run: true })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub host_count: usize,
    pub compliant_count: usize,
    pub noncompliant_count: usize,
    pub error_count: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
}

impl Summary {
    fn from_hosts<'a>(hosts: impl Iterator<Item = &'a HostReport>) -> Self {
        let mut summary = Self::default();
        for host in hosts {
            summary.host_count += 1;
            match host.status {
                HostStatus::Compliant => summary.compliant_count += 1,
                HostStatus::NonCompliant => summary.noncompliant_count += 1,
                HostStatus::Errored => summary.error_count += 1,
            }
            summary.actions_succeeded += host.count(OutcomeStatus::Succeeded);
            summary.actions_failed += host.count(OutcomeStatus::Failed);
            summary.actions_skipped += host.count(OutcomeStatus::Skipped);
        }
        summary
    }
}

/// Per-host and scope-level result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub kind: ReportKind,
    pub generated_at: DateTime<Utc>,
    pub hosts: BTreeMap<HostId, HostReport>,
    pub summary: Summary,
}

impl ComplianceReport {
    pub fn from_hosts(kind: ReportKind, hosts: Vec<HostReport>) -> Self {
        let hosts: BTreeMap<HostId, HostReport> =
            hosts.into_iter().map(|h| (h.host_id.clone(), h)).collect();
        let summary = Summary::from_hosts(hosts.values());
        Self {
            kind,
            generated_at: Utc::now(),
            hosts,
            summary,
        }
    }

    /// Overlay another report's hosts onto this one (e.g. remediation
    /// results over the initial check)
    pub fn merge(mut self, other: Self) -> Self {
        self.hosts.extend(other.hosts);
        self.kind = other.kind;
        self.generated_at = other.generated_at;
        self.summary = Summary::from_hosts(self.hosts.values());
        self
    }

    pub fn is_compliant(&self) -> bool {
        self.hosts.values().all(|h| h.status == HostStatus::Compliant)
    }

    pub fn has_errors(&self) -> bool {
        self.summary.error_count > 0
    }

    /// Changes as `{host: {category: {field: {old, new}}}}`.
    ///
    /// For checks these are the deviations found; for remediation runs, the
    /// deviations resolved by succeeded (or simulated) actions.
    pub fn changes(&self) -> Value {
        let mut out = Map::new();
        for (host_id, host) in &self.hosts {
            let deviations = self.changed(host);
            if deviations.is_empty() {
                continue;
            }

            let mut categories = Map::new();
            for deviation in deviations {
                let fields = categories
                    .entry(deviation.category.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(fields) = fields {
                    fields.insert(
                        deviation.field.clone(),
                        json!({"old": deviation.current_value, "new": deviation.desired_value}),
                    );
                }
            }
            out.insert(host_id.to_string(), Value::Object(categories));
        }
        Value::Object(out)
    }

    /// The same changes as [`changes`](Self::changes), nested by field path
    /// and grouped at a tree level.
    ///
    /// Level 0 is the host, 1 the category, 2 the first field segment and so
    /// on. Below the grouping level the tree is split into one `old` and one
    /// `new` subtree. `None` keeps `{old, new}` pairs at every leaf.
    pub fn changes_at(&self, level: Option<usize>) -> Value {
        let mut root = Drift::branch();
        for (host_id, host) in &self.hosts {
            for deviation in self.changed(host) {
                let path = [host_id.as_str(), deviation.category.as_str()]
                    .into_iter()
                    .chain(deviation.field.split(FIELD_SEPARATOR));
                root.insert(path, deviation);
            }
        }
        root.render(level, 0)
    }

    /// Deviations that count as changes for this kind of report
    fn changed<'a>(&self, host: &'a HostReport) -> Vec<&'a Deviation> {
        match self.kind {
            ReportKind::Check => host.deviations.iter().collect(),
            ReportKind::Remediation { .. } => {
                let fixed: BTreeSet<(&str, &str)> = host
                    .outcomes
                    .iter()
                    .filter(|o| o.status == OutcomeStatus::Succeeded)
                    .flat_map(|o| {
                        o.action
                            .fields
                            .iter()
                            .map(|f| (o.action.category.as_str(), f.as_str()))
                    })
                    .collect();
                host.initial_deviations
                    .iter()
                    .filter(|d| fixed.contains(&(d.category.as_str(), d.field.as_str())))
                    .collect()
            }
        }
    }
}

/// Change tree behind [`ComplianceReport::changes_at`]
enum Drift {
    Leaf { old: Option<Value>, new: Option<Value> },
    Branch(BTreeMap<String, Drift>),
}

impl Drift {
    fn branch() -> Self {
        Self::Branch(BTreeMap::new())
    }

    fn insert<'a>(&mut self, mut path: impl Iterator<Item = &'a str>, deviation: &Deviation) {
        let Some(segment) = path.next() else {
            *self = Self::Leaf {
                old: deviation.current_value.clone(),
                new: deviation.desired_value.clone(),
            };
            return;
        };
        if matches!(self, Self::Leaf { .. }) {
            *self = Self::branch();
        }
        if let Self::Branch(children) = self {
            children
                .entry(segment.to_string())
                .or_insert_with(Self::branch)
                .insert(path, deviation);
        }
    }

    fn render(&self, level: Option<usize>, depth: usize) -> Value {
        match self {
            Self::Leaf { old, new } => json!({"old": old, "new": new}),
            Self::Branch(children) => children
                .iter()
                .map(|(key, child)| {
                    let value = match child {
                        Self::Branch(_) if level == Some(depth) => {
                            json!({"old": child.side(false), "new": child.side(true)})
                        }
                        _ => child.render(level, depth + 1),
                    };
                    (key.clone(), value)
                })
                .collect::<Map<String, Value>>()
                .into(),
        }
    }

    /// One side of the subtree, with bare values at the leaves
    fn side(&self, new_side: bool) -> Value {
        match self {
            Self::Leaf { old, new } => {
                let value = if new_side { new } else { old };
                value.clone().unwrap_or(Value::Null)
            }
            Self::Branch(children) => children
                .iter()
                .map(|(key, child)| (key.clone(), child.side(new_side)))
                .collect::<Map<String, Value>>()
                .into(),
        }
    }
}

/// Append-only accumulator shared by host workers
pub struct ReportBuilder {
    kind: ReportKind,
    hosts: Mutex<Vec<HostReport>>,
}

impl ReportBuilder {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, report: HostReport) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    pub fn finish(self) -> ComplianceReport {
        let hosts = self
            .hosts
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        ComplianceReport::from_hosts(self.kind, hosts)
    }
}
