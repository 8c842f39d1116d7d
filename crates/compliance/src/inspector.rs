//! Resource inspector
//!
//! Reads live configuration for one host and normalizes it into the same
//! shape as the desired-state document. Read-only against the plane.

use crate::context::{CallContext, ManagementPlane};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::retry::{RetryConfig, with_retry};
use crate::types::{CategorySkip, HostId, Snapshot};

/// Reads and normalizes live state for a host
pub struct Inspector<'a> {
    plane: &'a dyn ManagementPlane,
    registry: &'a Registry,
    retry: &'a RetryConfig,
    ctx: CallContext,
}

impl<'a> Inspector<'a> {
    pub fn new(
        plane: &'a dyn ManagementPlane,
        registry: &'a Registry,
        retry: &'a RetryConfig,
        ctx: CallContext,
    ) -> Self {
        Self {
            plane,
            registry,
            retry,
            ctx,
        }
    }

    /// Snapshot the given categories on one host.
    ///
    /// Unsupported categories become skips. Any other failure (including a
    /// read that keeps timing out) fails the host as unreachable.
    pub fn inspect_host(&self, host: &HostId, categories: &[String]) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new(host.clone());

        for category in categories {
            let label = format!("read {category} on {host}");
            let raw = with_retry(self.retry, &label, || {
                self.plane.read_category(host, category, &self.ctx)
            });

            match raw {
                Ok(raw) => {
                    let normalized = self.registry.normalize(category, &raw);
                    log::trace!("{host} {category}: {}", serde_json::Value::Object(normalized.clone()));
                    snapshot.categories.insert(category.clone(), normalized);
                }
                Err(Error::UnsupportedCategory { .. }) => {
                    log::info!("{host}: category '{category}' not supported, skipping");
                    snapshot.skipped.push(CategorySkip {
                        category: category.clone(),
                        reason: "not supported by this host's platform version".to_string(),
                    });
                }
                Err(e @ Error::UnreachableHost { .. }) => return Err(e),
                Err(e) => {
                    return Err(Error::UnreachableHost {
                        host: host.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::debug!(
            "Inspected {host}: {} categories, {} skipped",
            snapshot.categories.len(),
            snapshot.skipped.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlane;
    use serde_json::json;

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_inspect_normalizes_and_skips_unsupported() {
        let plane = MockPlane::new()
            .host("esxi-01", "/DC/host/A")
            .state("esxi-01", "ntp", json!({"ntpConfig": {"server": ["10.0.0.1"]}}))
            .unsupported("esxi-01", "syslog");
        let registry = Registry::builtin().unwrap();
        let retry = RetryConfig::no_retry();
        let inspector = Inspector::new(&plane, &registry, &retry, CallContext::default());

        let snapshot = inspector
            .inspect_host(&"esxi-01".into(), &categories(&["ntp", "syslog"]))
            .unwrap();

        assert_eq!(snapshot.category("ntp").unwrap()["servers"], json!(["10.0.0.1"]));
        assert!(snapshot.is_skipped("syslog"));
        assert!(snapshot.category("syslog").is_none());
    }

    #[test]
    fn test_unreachable_host_fails() {
        let plane = MockPlane::new().host("esxi-02", "/DC/host/A").unreachable("esxi-02");
        let registry = Registry::builtin().unwrap();
        let retry = RetryConfig::no_retry();
        let inspector = Inspector::new(&plane, &registry, &retry, CallContext::default());

        let result = inspector.inspect_host(&"esxi-02".into(), &categories(&["ntp"]));
        assert!(matches!(result, Err(Error::UnreachableHost { .. })));
    }

    #[test]
    fn test_transient_read_is_retried() {
        let plane = MockPlane::new()
            .host("esxi-01", "/DC/host/A")
            .state("esxi-01", "dns", json!({"hostName": "esxi-01"}))
            .flaky_reads(1);
        let registry = Registry::builtin().unwrap();
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let inspector = Inspector::new(&plane, &registry, &retry, CallContext::default());

        let snapshot = inspector
            .inspect_host(&"esxi-01".into(), &categories(&["dns"]))
            .unwrap();
        assert_eq!(snapshot.category("dns").unwrap()["hostname"], json!("esxi-01"));
    }
}
