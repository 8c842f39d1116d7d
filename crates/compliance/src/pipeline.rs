//! Pipeline entry points
//!
//! Pre-flight (document validation, plane liveness, scope resolution) fails
//! the whole call. After that every host runs its own inspect, diff, plan,
//! and execute sequence on the worker pool, and anything that goes wrong is
//! recorded in that host's report.

use crate::context::{CallContext, CancellationToken, ManagementPlane, NoProgress, ProgressCallback};
use crate::differ::diff;
use crate::document::{DesiredState, DesiredStateDocument, UnknownCategoryPolicy};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::inspector::Inspector;
use crate::planner::Planner;
use crate::registry::Registry;
use crate::report::{ComplianceReport, ErrorCode, HostError, HostReport, HostStatus, ReportBuilder, ReportKind};
use crate::retry::{RetryConfig, with_retry};
use crate::types::{HostId, Scope, Snapshot};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Options for a compliance engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Hosts processed concurrently
    pub jobs: usize,
    /// Timeout applied to every management-plane call
    pub call_timeout: Duration,
    /// Backoff for read-only calls
    pub retry: RetryConfig,
    pub unknown_categories: UnknownCategoryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            unknown_categories: UnknownCategoryPolicy::Ignore,
        }
    }
}

/// Hosts resolved from a scope, paired with the cluster they came from
type Targets = Vec<(HostId, String)>;

/// Desired-state compliance and remediation engine
pub struct Engine {
    registry: Registry,
    options: EngineOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl Engine {
    pub fn new(registry: Registry, options: EngineOptions) -> Self {
        Self {
            registry,
            options,
            progress: Arc::new(NoProgress),
        }
    }

    /// Engine over the built-in host categories
    pub fn builtin(options: EngineOptions) -> Result<Self> {
        Ok(Self::new(Registry::builtin()?, options))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn ctx(&self) -> CallContext {
        CallContext::new(self.options.call_timeout)
    }

    /// Validate a document against the registry without touching the plane
    pub fn validate(&self, doc: &DesiredStateDocument) -> Result<DesiredState> {
        doc.validate(&self.registry, self.options.unknown_categories)
    }

    /// Inspect and diff every host in scope. Read-only.
    pub fn check_compliance(
        &self,
        plane: &dyn ManagementPlane,
        scope: &Scope,
        doc: &DesiredStateDocument,
        cancel: &CancellationToken,
    ) -> Result<ComplianceReport> {
        let (desired, targets) = self.preflight(plane, scope, doc)?;
        self.run(ReportKind::Check, &targets, cancel, |host, cluster| {
            self.check_host(plane, &desired, host, cluster)
        })
    }

    /// Full pipeline for every host in scope.
    ///
    /// With `dry_run`, no mutating call is made and outcomes are simulated.
    pub fn remediate(
        &self,
        plane: &dyn ManagementPlane,
        scope: &Scope,
        doc: &DesiredStateDocument,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<ComplianceReport> {
        let (desired, targets) = self.preflight(plane, scope, doc)?;
        self.run(ReportKind::Remediation { dry_run }, &targets, cancel, |host, cluster| {
            self.remediate_host(plane, &desired, host, cluster, dry_run, cancel)
        })
    }

    /// Check first, then remediate only the non-compliant hosts.
    ///
    /// Errored hosts are left as the check reported them.
    pub fn apply_configuration(
        &self,
        plane: &dyn ManagementPlane,
        scope: &Scope,
        doc: &DesiredStateDocument,
        dry_run: bool,
        check_compliance_first: bool,
        cancel: &CancellationToken,
    ) -> Result<ComplianceReport> {
        if !check_compliance_first {
            return self.remediate(plane, scope, doc, dry_run, cancel);
        }

        let (desired, targets) = self.preflight(plane, scope, doc)?;
        let check = self.run(ReportKind::Check, &targets, cancel, |host, cluster| {
            self.check_host(plane, &desired, host, cluster)
        })?;

        let pending: Targets = targets
            .into_iter()
            .filter(|(host, _)| {
                check
                    .hosts
                    .get(host)
                    .is_some_and(|r| r.status == HostStatus::NonCompliant)
            })
            .collect();
        if pending.is_empty() {
            log::info!("All reachable hosts compliant, nothing to remediate");
            return Ok(check);
        }

        log::info!("Remediating {} non-compliant hosts", pending.len());
        let remediation = self.run(ReportKind::Remediation { dry_run }, &pending, cancel, |host, cluster| {
            self.remediate_host(plane, &desired, host, cluster, dry_run, cancel)
        })?;
        Ok(check.merge(remediation))
    }

    fn preflight(
        &self,
        plane: &dyn ManagementPlane,
        scope: &Scope,
        doc: &DesiredStateDocument,
    ) -> Result<(DesiredState, Targets)> {
        let desired = self.validate(doc)?;
        let ctx = self.ctx();
        let retry = &self.options.retry;

        with_retry(retry, "ping management plane", || plane.ping(&ctx)).map_err(unreachable_plane)?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for cluster in scope.clusters() {
            let hosts = with_retry(retry, &format!("resolve {cluster}"), || {
                plane.resolve_scope(cluster, &ctx)
            })
            .map_err(unreachable_plane)?;
            if hosts.is_empty() {
                log::warn!("Cluster {cluster} has no hosts");
            }
            for host in hosts {
                if seen.insert(host.clone()) {
                    targets.push((host, cluster.clone()));
                }
            }
        }

        if let Some(wanted) = scope.hosts() {
            let missing: Vec<&str> = wanted
                .iter()
                .filter(|host| !seen.contains(*host))
                .map(HostId::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Error::InvalidScope {
                    message: format!("hosts not found in scope: {}", missing.join(", ")),
                });
            }
            targets.retain(|(host, _)| scope.includes(host));
            log::debug!("Host filter kept {} of {} hosts", targets.len(), seen.len());
        }

        log::info!(
            "Resolved {} hosts across {} clusters",
            targets.len(),
            scope.clusters().len()
        );
        Ok((desired, targets))
    }

    fn run<F>(
        &self,
        kind: ReportKind,
        targets: &[(HostId, String)],
        cancel: &CancellationToken,
        work: F,
    ) -> Result<ComplianceReport>
    where
        F: Fn(&HostId, &str) -> HostReport + Sync,
    {
        let builder = ReportBuilder::new(kind);
        self.progress.on_run_start(targets.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::WorkerPool {
                message: e.to_string(),
            })?;

        pool.install(|| {
            targets.par_iter().for_each(|(host, cluster)| {
                let report = if cancel.is_cancelled() {
                    HostReport::errored(
                        host.clone(),
                        cluster.clone(),
                        HostError::new(ErrorCode::RunCancelled, "run cancelled before this host started"),
                    )
                } else {
                    self.progress.on_host_start(host);
                    work(host, cluster)
                };
                self.progress.on_host_complete(&report);
                builder.push(report);
            });
        });

        self.progress.on_run_complete();
        Ok(builder.finish())
    }

    fn inspect(&self, plane: &dyn ManagementPlane, desired: &DesiredState, host: &HostId) -> Result<Snapshot> {
        Inspector::new(plane, &self.registry, &self.options.retry, self.ctx())
            .inspect_host(host, &desired.category_names())
    }

    fn check_host(
        &self,
        plane: &dyn ManagementPlane,
        desired: &DesiredState,
        host: &HostId,
        cluster: &str,
    ) -> HostReport {
        match self.inspect(plane, desired, host) {
            Ok(snapshot) => {
                let mut report = HostReport::new(host.clone(), cluster);
                report.deviations = diff(&snapshot, desired, &self.registry);
                report.skipped = snapshot.skipped;
                report.finalize()
            }
            Err(e) => {
                log::warn!("{host}: {e}");
                HostReport::errored(host.clone(), cluster, HostError::new(ErrorCode::UnreachableHost, e.to_string()))
            }
        }
    }

    fn remediate_host(
        &self,
        plane: &dyn ManagementPlane,
        desired: &DesiredState,
        host: &HostId,
        cluster: &str,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> HostReport {
        let snapshot = match self.inspect(plane, desired, host) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("{host}: {e}");
                return HostReport::errored(
                    host.clone(),
                    cluster,
                    HostError::new(ErrorCode::UnreachableHost, e.to_string()),
                );
            }
        };

        let mut report = HostReport::new(host.clone(), cluster);
        report.skipped.clone_from(&snapshot.skipped);
        let deviations = diff(&snapshot, desired, &self.registry);
        if deviations.is_empty() {
            return report.finalize();
        }

        let plan = Planner::new(&self.registry)
            .with_snapshot(&snapshot)
            .plan(&deviations);
        report.errors.extend(plan.unplannable.iter().map(HostError::unplannable));

        let execution = Executor::new(plane, &self.options.retry, self.ctx())
            .dry_run(dry_run)
            .cancel(cancel)
            .progress(self.progress.as_ref())
            .execute_host(host, &plan.actions);

        report.deviations = if execution.applied_any() {
            match self.inspect(plane, desired, host) {
                Ok(after) => diff(&after, desired, &self.registry),
                Err(e) => {
                    report.errors.push(HostError::new(
                        ErrorCode::UnreachableHost,
                        format!("re-inspection after remediation failed: {e}"),
                    ));
                    deviations.clone()
                }
            }
        } else {
            deviations.clone()
        };
        report.initial_deviations = deviations;
        report.outcomes = execution.outcomes;
        report.restorations = execution.restorations;
        report.finalize()
    }
}

fn unreachable_plane(e: Error) -> Error {
    match e {
        Error::InvalidScope { .. } | Error::ManagementPlaneUnreachable { .. } => e,
        other => Error::ManagementPlaneUnreachable {
            message: other.to_string(),
        },
    }
}
