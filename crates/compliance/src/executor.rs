//! Executor - applies a host's planned actions in order
//!
//! Failure isolation is per host: the caller runs one executor call per
//! host, and nothing here touches another host's queue.

use crate::context::{CallContext, CancellationToken, ManagementPlane, NoProgress, ProgressCallback};
use crate::error::Error;
use crate::retry::{RetryConfig, with_retry};
use crate::types::{Action, HostId, Outcome, OutcomeReason, OutcomeStatus, Precondition, Resolution};
use chrono::Utc;

/// Result of executing one host's queue
#[derive(Debug, Clone, Default)]
pub struct HostExecution {
    pub outcomes: Vec<Outcome>,
    /// Preconditions the executor resolved, reverted after the queue
    pub restorations: Vec<Resolution>,
}

impl HostExecution {
    /// Whether any action actually changed the host
    pub fn applied_any(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_applied)
    }
}

/// Applies actions against the management plane
pub struct Executor<'a> {
    plane: &'a dyn ManagementPlane,
    retry: &'a RetryConfig,
    ctx: CallContext,
    dry_run: bool,
    cancel: Option<&'a CancellationToken>,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Executor<'a> {
    pub fn new(plane: &'a dyn ManagementPlane, retry: &'a RetryConfig, ctx: CallContext) -> Self {
        Self {
            plane,
            retry,
            ctx,
            dry_run: false,
            cancel: None,
            progress: &NoProgress,
        }
    }

    /// Simulate mutating calls; preconditions are still checked read-only
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    /// Execute one host's actions strictly in order.
    ///
    /// A failed action only stops the rest of the queue when it is marked
    /// blocking. Cancellation skips whatever has not started yet.
    pub fn execute_host(&self, host: &HostId, actions: &[Action]) -> HostExecution {
        let mut execution = HostExecution::default();
        let mut resolved: Vec<Precondition> = Vec::new();
        let mut blocked_by: Option<String> = None;

        for action in actions {
            let outcome = if self.cancelled() {
                Outcome::skipped(action.clone(), OutcomeReason::RunCancelled)
            } else if let Some(upstream) = &blocked_by {
                log::info!("{host}: skipping {} ({upstream} failed)", action.label());
                Outcome::skipped(action.clone(), OutcomeReason::UpstreamActionFailed)
            } else {
                self.run_action(host, action, &mut resolved)
            };

            if outcome.is_failed() && action.blocking && blocked_by.is_none() {
                blocked_by = Some(action.label());
            }
            self.progress.on_action_complete(host, &outcome);
            execution.outcomes.push(outcome);
        }

        execution.restorations = self.restore(host, resolved);
        execution
    }

    fn run_action(&self, host: &HostId, action: &Action, resolved: &mut Vec<Precondition>) -> Outcome {
        let mut resolutions = Vec::new();

        for &precondition in &action.preconditions {
            if resolved.contains(&precondition) {
                continue;
            }
            let label = format!("check '{precondition}' on {host}");
            let holds = with_retry(self.retry, &label, || {
                self.plane.check_precondition(host, precondition, &self.ctx)
            });

            match holds {
                Ok(true) => {}
                Ok(false) if precondition.is_resolvable() => {
                    let result = if self.dry_run {
                        Ok(())
                    } else {
                        self.plane.resolve_precondition(host, precondition, &self.ctx)
                    };
                    match result {
                        Ok(()) => {
                            log::info!("{host}: resolved '{precondition}' for {}", action.label());
                            resolutions.push(resolution(precondition, self.dry_run, None));
                            resolved.push(precondition);
                        }
                        Err(e) => {
                            let message = format!("could not make '{precondition}' hold: {e}");
                            resolutions.push(resolution(precondition, false, Some(e.to_string())));
                            return Outcome::failed(
                                action.clone(),
                                OutcomeReason::PreconditionUnmet,
                                message,
                                resolutions,
                            );
                        }
                    }
                }
                Ok(false) => {
                    let err = Error::PreconditionUnmet {
                        host: host.to_string(),
                        precondition: precondition.to_string(),
                    };
                    return Outcome::failed(
                        action.clone(),
                        OutcomeReason::PreconditionUnmet,
                        err.to_string(),
                        resolutions,
                    );
                }
                Err(e) => {
                    return Outcome::failed(
                        action.clone(),
                        OutcomeReason::PreconditionUnmet,
                        format!("could not check '{precondition}': {e}"),
                        resolutions,
                    );
                }
            }
        }

        if self.dry_run {
            log::debug!("{host}: would run {} ({})", action.operation, action.label());
            return Outcome::succeeded(action.clone(), true, resolutions);
        }

        match self.plane.apply(action, &self.ctx) {
            Ok(()) => {
                log::info!("{host}: applied {}", action.label());
                Outcome::succeeded(action.clone(), false, resolutions)
            }
            Err(e) => {
                log::warn!("{host}: {} failed: {e}", action.label());
                Outcome::failed(action.clone(), OutcomeReason::OperationFailed, e.to_string(), resolutions)
            }
        }
    }

    /// Revert resolved preconditions, most recent first
    fn restore(&self, host: &HostId, resolved: Vec<Precondition>) -> Vec<Resolution> {
        resolved
            .into_iter()
            .rev()
            .map(|precondition| {
                if self.dry_run {
                    return resolution(precondition, true, None);
                }
                match self.plane.revert_precondition(host, precondition, &self.ctx) {
                    Ok(()) => {
                        log::info!("{host}: reverted '{precondition}'");
                        resolution(precondition, false, None)
                    }
                    Err(e) => {
                        log::warn!("{host}: could not revert '{precondition}': {e}");
                        resolution(precondition, false, Some(e.to_string()))
                    }
                }
            })
            .collect()
    }
}

fn resolution(precondition: Precondition, simulated: bool, error: Option<String>) -> Resolution {
    Resolution {
        precondition,
        status: if error.is_some() {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Succeeded
        },
        simulated,
        error,
        applied_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UpdateMode;
    use crate::testing::MockPlane;
    use serde_json::json;

    fn action(category: &str, operation: &str, blocking: bool, preconditions: Vec<Precondition>) -> Action {
        Action {
            host_id: "esxi-01".into(),
            category: category.into(),
            operation: operation.into(),
            mode: UpdateMode::Whole,
            payload: json!({"changed": true}),
            preconditions,
            blocking,
            fields: vec!["changed".into()],
        }
    }

    fn plane() -> MockPlane {
        MockPlane::new()
            .host("esxi-01", "/DC/host/A")
            .state("esxi-01", "maintenance-mode", json!({"enabled": false}))
    }

    fn statuses(execution: &HostExecution) -> Vec<(OutcomeStatus, Option<OutcomeReason>)> {
        execution.outcomes.iter().map(|o| (o.status, o.reason)).collect()
    }

    #[test]
    fn test_actions_run_in_order() {
        let plane = plane();
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [
            action("dns", "host.update_dns_config", false, vec![]),
            action("ntp", "host.update_datetime_config", false, vec![]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert!(execution.outcomes.iter().all(|o| o.status == OutcomeStatus::Succeeded));
        let applied: Vec<_> = plane.applied().into_iter().map(|a| a.category).collect();
        assert_eq!(applied, ["dns", "ntp"]);
        assert!(execution.applied_any());
    }

    #[test]
    fn test_non_blocking_failure_continues() {
        let plane = plane().failing("esxi-01", "host.update_dns_config");
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [
            action("dns", "host.update_dns_config", false, vec![]),
            action("ntp", "host.update_datetime_config", false, vec![]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert_eq!(
            statuses(&execution),
            [
                (OutcomeStatus::Failed, Some(OutcomeReason::OperationFailed)),
                (OutcomeStatus::Succeeded, None),
            ]
        );
    }

    #[test]
    fn test_blocking_failure_skips_rest() {
        let plane = plane().failing("esxi-01", "host.set_lockdown_mode");
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [
            action("lockdown-mode", "host.set_lockdown_mode", true, vec![]),
            action("dns", "host.update_dns_config", false, vec![]),
            action("ntp", "host.update_datetime_config", false, vec![]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert_eq!(
            statuses(&execution),
            [
                (OutcomeStatus::Failed, Some(OutcomeReason::OperationFailed)),
                (OutcomeStatus::Skipped, Some(OutcomeReason::UpstreamActionFailed)),
                (OutcomeStatus::Skipped, Some(OutcomeReason::UpstreamActionFailed)),
            ]
        );
        assert!(plane.applied().is_empty());
    }

    #[test]
    fn test_resolvable_precondition_is_resolved_and_reverted() {
        let plane = plane();
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [
            action("network", "host.update_network_config", true, vec![Precondition::InMaintenanceMode]),
            action("network", "host.update_network_config", true, vec![Precondition::InMaintenanceMode]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert_eq!(execution.outcomes[0].resolutions.len(), 1);
        assert!(execution.outcomes[1].resolutions.is_empty());
        assert_eq!(execution.restorations.len(), 1);
        assert_eq!(
            plane.calls(),
            [
                "resolve in maintenance mode on esxi-01",
                "revert in maintenance mode on esxi-01"
            ]
        );
        assert_eq!(plane.raw("esxi-01", "maintenance-mode"), Some(json!({"enabled": false})));
    }

    #[test]
    fn test_unresolvable_precondition_fails_action() {
        let plane = plane().unreachable("esxi-01");
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [
            action("advanced-option", "host.update_advanced_options", false, vec![Precondition::HostConnected]),
            action("dns", "host.update_dns_config", false, vec![]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert_eq!(execution.outcomes[0].reason, Some(OutcomeReason::PreconditionUnmet));
        assert_eq!(execution.outcomes[1].status, OutcomeStatus::Succeeded);
    }

    #[test]
    fn test_failed_resolution_fails_action() {
        let plane = plane().no_resolve();
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default());
        let actions = [action("network", "host.update_network_config", true, vec![Precondition::InMaintenanceMode])];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        let outcome = &execution.outcomes[0];
        assert_eq!(outcome.reason, Some(OutcomeReason::PreconditionUnmet));
        assert_eq!(outcome.resolutions[0].status, OutcomeStatus::Failed);
        assert!(execution.restorations.is_empty());
    }

    #[test]
    fn test_dry_run_never_mutates() {
        let plane = plane();
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default()).dry_run(true);
        let actions = [action("network", "host.update_network_config", true, vec![Precondition::InMaintenanceMode])];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        let outcome = &execution.outcomes[0];
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert!(outcome.simulated);
        assert!(outcome.resolutions[0].simulated);
        assert_eq!(outcome.action.payload, json!({"changed": true}));
        assert!(execution.restorations[0].simulated);
        assert!(plane.applied().is_empty());
        assert!(plane.calls().is_empty());
        assert!(!execution.applied_any());
    }

    #[test]
    fn test_cancellation_skips_remaining() {
        let token = CancellationToken::new();
        let plane = plane().cancel_on_apply(&token);
        let retry = RetryConfig::no_retry();
        let executor = Executor::new(&plane, &retry, CallContext::default()).cancel(&token);
        let actions = [
            action("dns", "host.update_dns_config", false, vec![]),
            action("ntp", "host.update_datetime_config", false, vec![]),
            action("syslog", "host.set_syslog_config", false, vec![]),
        ];

        let execution = executor.execute_host(&"esxi-01".into(), &actions);
        assert_eq!(
            statuses(&execution),
            [
                (OutcomeStatus::Succeeded, None),
                (OutcomeStatus::Skipped, Some(OutcomeReason::RunCancelled)),
                (OutcomeStatus::Skipped, Some(OutcomeReason::RunCancelled)),
            ]
        );
    }
}
