//! Management-plane session and provider traits
//!
//! These traits allow the compliance crate to be used without depending on
//! a specific API client, terminal UI, or cancellation source. The session
//! is always passed explicitly into each call; the engine never caches one.

use crate::error::{Error, Result};
use crate::report::HostReport;
use crate::types::{Action, HostId, Outcome, Precondition};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Per-call settings handed to every management-plane call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub timeout: Duration,
}

impl CallContext {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// A session against the management plane
///
/// Implementations must be shareable across host workers. Every call
/// should give up after `ctx.timeout` and report [`Error::Timeout`].
pub trait ManagementPlane: Send + Sync {
    /// Cheap liveness check; failure aborts the whole run
    fn ping(&self, ctx: &CallContext) -> Result<()>;

    /// Hosts under a cluster path. Unknown paths are [`Error::InvalidScope`].
    fn resolve_scope(&self, cluster: &str, ctx: &CallContext) -> Result<Vec<HostId>>;

    /// Raw live configuration of one category on one host.
    ///
    /// May return [`Error::UnsupportedCategory`] or [`Error::UnreachableHost`].
    fn read_category(&self, host: &HostId, category: &str, ctx: &CallContext) -> Result<Value>;

    /// Apply a remediation action. Never retried by the engine.
    fn apply(&self, action: &Action, ctx: &CallContext) -> Result<()>;

    /// Read-only check of a precondition
    fn check_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        ctx: &CallContext,
    ) -> Result<bool>;

    /// Make a resolvable precondition hold (e.g. enter maintenance mode)
    fn resolve_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        _ctx: &CallContext,
    ) -> Result<()> {
        Err(Error::Unsupported {
            message: format!("cannot make '{precondition}' hold on {host}"),
        })
    }

    /// Undo an earlier resolution (e.g. exit maintenance mode)
    fn revert_precondition(
        &self,
        host: &HostId,
        precondition: Precondition,
        _ctx: &CallContext,
    ) -> Result<()> {
        Err(Error::Unsupported {
            message: format!("cannot revert '{precondition}' on {host}"),
        })
    }
}

/// Run-wide cancellation flag
///
/// Cancelling stops new host pipelines and skips queued actions; an action
/// already in flight finishes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for compliance runs
///
/// Called concurrently from host workers.
pub trait ProgressCallback: Send + Sync {
    /// Called once the scope is resolved
    fn on_run_start(&self, host_count: usize);

    /// Called when a host pipeline starts
    fn on_host_start(&self, host: &HostId);

    /// Called after each action, real or simulated
    fn on_action_complete(&self, host: &HostId, outcome: &Outcome);

    /// Called when a host pipeline finishes
    fn on_host_complete(&self, report: &HostReport);

    /// Called after every host has been reported
    fn on_run_complete(&self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&self, _host_count: usize) {}
    fn on_host_start(&self, _host: &HostId) {}
    fn on_action_complete(&self, _host: &HostId, _outcome: &Outcome) {}
    fn on_host_complete(&self, _report: &HostReport) {}
    fn on_run_complete(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());
        token.cancel();
        assert!(worker.is_cancelled());
    }

    #[test]
    fn test_call_context_timeout_ms() {
        assert_eq!(CallContext::new(Duration::from_millis(250)).timeout_ms(), 250);
        assert_eq!(CallContext::default().timeout, Duration::from_secs(30));
    }
}
