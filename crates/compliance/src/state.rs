//! Declarative state wrapper
//!
//! Renders a run into the `{name, result, comment, changes}` return a
//! declarative configuration engine expects from a state function. With
//! `test` set the run is a dry-run and `result` is `None` while changes are
//! pending. A compliant test run reports `Some(true)` rather than `None`, so
//! `None` always means there is something to apply.

use crate::context::{CancellationToken, ManagementPlane};
use crate::document::DesiredStateDocument;
use crate::pipeline::Engine;
use crate::report::{ComplianceReport, HostStatus};
use crate::types::Scope;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Run status as a declarative engine reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Compliant,
    NonCompliant,
    Failed,
    Success,
    Partial,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "COMPLIANT",
            Self::NonCompliant => "NON_COMPLIANT",
            Self::Failed => "FAILED",
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
        }
    }

    /// Status of a dry-run (audit) report
    pub fn of_audit(report: &ComplianceReport) -> Self {
        if report.has_errors() {
            Self::Failed
        } else if report.is_compliant() {
            Self::Compliant
        } else {
            Self::NonCompliant
        }
    }

    /// Status of a remediation report
    pub fn of_remediation(report: &ComplianceReport) -> Self {
        if report.is_compliant() {
            Self::Success
        } else if report.summary.actions_succeeded > 0 || report.summary.compliant_count > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReturn {
    pub name: String,
    /// `None` means changes are pending (test mode only)
    pub result: Option<bool>,
    pub comment: String,
    pub changes: Value,
}

/// Check (test mode) or remediate a control and render the outcome.
///
/// Never fails: pre-flight errors become `result: Some(false)`. Hosts not
/// started before `cancel` fires are reported as errored.
pub fn check_control(
    name: &str,
    engine: &Engine,
    plane: &dyn ManagementPlane,
    scope: &Scope,
    doc: &DesiredStateDocument,
    test: bool,
    cancel: &CancellationToken,
) -> StateReturn {
    log::info!("Starting compliance check for {name}");

    let report = match engine.remediate(plane, scope, doc, test, cancel) {
        Ok(report) => report,
        Err(e) => {
            log::error!("An error occurred: {e}");
            return StateReturn {
                name: name.to_string(),
                result: Some(false),
                comment: format!("An error occurred: {e}"),
                changes: json!({}),
            };
        }
    };

    let changes = report.changes();
    let (result, comment) = if test {
        let status = ControlStatus::of_audit(&report);
        // None is reserved for pending changes
        let result = match status {
            ControlStatus::Compliant => Some(true),
            ControlStatus::NonCompliant => None,
            _ => Some(false),
        };
        (result, status.as_str().to_string())
    } else {
        match ControlStatus::of_remediation(&report) {
            ControlStatus::Success => (Some(true), "Remediation completed successfully.".to_string()),
            ControlStatus::Partial => (
                Some(false),
                "Remediation completed with status partial.".to_string(),
            ),
            _ => (Some(false), "Remediation failed.".to_string()),
        }
    };

    let errored: Vec<String> = report
        .hosts
        .values()
        .filter(|h| h.status == HostStatus::Errored)
        .map(|h| h.host_id.to_string())
        .collect();
    if !errored.is_empty() {
        log::warn!("{name}: errored hosts: {}", errored.join(", "));
    }

    log::debug!("Completed workflow for {name}");
    StateReturn {
        name: name.to_string(),
        result,
        comment,
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EngineOptions;
    use crate::retry::RetryConfig;
    use crate::testing::MockPlane;

    fn engine() -> Engine {
        Engine::builtin(EngineOptions {
            retry: RetryConfig::no_retry(),
            ..EngineOptions::default()
        })
        .unwrap()
    }

    fn plane() -> MockPlane {
        MockPlane::new()
            .host("esxi-01", "/DC/host/A")
            .state("esxi-01", "ntp", json!({"servers": []}))
    }

    fn doc() -> DesiredStateDocument {
        DesiredStateDocument::from_value(json!({"ntp": {"servers": ["10.0.0.1"]}})).unwrap()
    }

    fn scope() -> Scope {
        Scope::new(["/DC/host/A"]).unwrap()
    }

    fn run(engine: &Engine, plane: &MockPlane, test: bool) -> StateReturn {
        check_control(
            "ntp-control",
            engine,
            plane,
            &scope(),
            &doc(),
            test,
            &CancellationToken::new(),
        )
    }

    #[test]
    fn test_test_mode_pending_changes() {
        let plane = plane();
        let ret = run(&engine(), &plane, true);
        assert_eq!(ret.result, None);
        assert_eq!(ret.comment, "NON_COMPLIANT");
        assert_eq!(
            ret.changes,
            json!({"esxi-01": {"ntp": {"servers": {"old": null, "new": ["10.0.0.1"]}}}})
        );
        assert!(plane.applied().is_empty());
    }

    #[test]
    fn test_remediation_then_test_mode_is_compliant() {
        let plane = plane();
        let engine = engine();
        let ret = run(&engine, &plane, false);
        assert_eq!(ret.result, Some(true));
        assert_eq!(ret.comment, "Remediation completed successfully.");

        let audit = run(&engine, &plane, true);
        assert_eq!(audit.result, Some(true));
        assert_eq!(audit.comment, "COMPLIANT");
        assert_eq!(audit.changes, json!({}));
    }

    #[test]
    fn test_partial_remediation() {
        let plane = plane()
            .host("esxi-02", "/DC/host/A")
            .failing("esxi-02", "host.update_datetime_config");
        let ret = run(&engine(), &plane, false);
        assert_eq!(ret.result, Some(false));
        assert_eq!(ret.comment, "Remediation completed with status partial.");
    }

    #[test]
    fn test_hard_error_becomes_failed_result() {
        let plane = plane().down();
        let ret = run(&engine(), &plane, true);
        assert_eq!(ret.result, Some(false));
        assert!(ret.comment.starts_with("An error occurred:"));
    }

    #[test]
    fn test_interrupted_control_fails() {
        let plane = plane();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ret = check_control(
            "ntp-control",
            &engine(),
            &plane,
            &scope(),
            &doc(),
            false,
            &cancel,
        );
        assert_eq!(ret.result, Some(false));
        assert_eq!(ret.comment, "Remediation failed.");
        assert!(plane.applied().is_empty());
    }
}
