//! # Compliance
//!
//! A desired-state compliance and remediation engine for hosts managed by a
//! virtualization management plane.
//!
//! Given a [`Scope`] (cluster paths) and a desired-state document, the engine
//! inspects every host, diffs its live configuration against the document,
//! plans an ordered remediation, executes it, and aggregates everything into
//! a [`ComplianceReport`].
//!
//! ## Core Concepts
//!
//! - **Category**: a configuration domain (ntp, syslog, firewall-rule, ...)
//!   declared as data in the [`Registry`]
//! - **Deviation**: one difference between live and desired state
//! - **Action**: a planned operation resolving one or more deviations
//! - **Outcome**: what happened when an action ran (or was simulated)
//!
//! ## Example
//!
//! ```ignore
//! use compliance::{
//!     CancellationToken, DesiredStateDocument, DocumentFormat, Engine, EngineOptions, Scope,
//! };
//!
//! let engine = Engine::builtin(EngineOptions::default())?;
//! let doc = DesiredStateDocument::parse(
//!     "ntp:\n  servers: [10.0.0.1]\n",
//!     DocumentFormat::Yaml,
//! )?;
//! let scope = Scope::new(["/Datacenter/host/Cluster-01"])?;
//!
//! // `plane` is any ManagementPlane implementation
//! let report = engine.check_compliance(&plane, &scope, &doc, &CancellationToken::new())?;
//! println!("{} hosts compliant", report.summary.compliant_count);
//! ```
//!
//! ## Provider Traits
//!
//! - [`ManagementPlane`]: the session used for every read and write
//! - [`ProgressCallback`]: receives progress updates from host workers
//!
//! The engine never opens or caches a session itself.

pub mod context;
pub mod differ;
pub mod document;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod report;
pub mod retry;
pub mod state;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{CallContext, CancellationToken, ManagementPlane, NoProgress, ProgressCallback};
pub use differ::diff;
pub use document::{DesiredState, DesiredStateDocument, DocumentFormat, UnknownCategoryPolicy};
pub use error::{Error, Result};
pub use executor::{Executor, HostExecution};
pub use inspector::Inspector;
pub use pipeline::{Engine, EngineOptions};
pub use planner::{Plan, Planner};
pub use registry::{CategorySchema, FieldKind, FieldSpec, LiveShape, Registry, Remediation, UpdateMode};
pub use report::{
    ComplianceReport, ErrorCode, HostError, HostReport, HostStatus, ReportBuilder, ReportKind, Summary,
};
pub use retry::RetryConfig;
pub use state::{ControlStatus, StateReturn, check_control};
pub use types::{
    Action, CategorySkip, Deviation, DeviationKind, HostId, Outcome, OutcomeReason, OutcomeStatus,
    Precondition, Resolution, Scope, Snapshot,
};
