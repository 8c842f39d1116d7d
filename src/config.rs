use anyhow::{Context, Result};
use compliance::{EngineOptions, RetryConfig, UnknownCategoryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The vconverge configuration file, every field optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inventory file backing the management plane
    pub inventory: Option<String>,

    /// Cluster paths used when none are given on the command line
    pub clusters: Vec<String>,

    /// Hosts processed in parallel
    pub jobs: usize,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// What to do with categories the registry does not know
    pub unknown_categories: UnknownCategoryPolicy,

    /// Backoff for read-only management-plane calls
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inventory: None,
            clusters: Vec::new(),
            jobs: 4,
            timeout_secs: 30,
            unknown_categories: UnknownCategoryPolicy::Ignore,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Default location: ~/.config/vconverge/config.toml
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("vconverge").join("config.toml"))
    }

    /// Load the config, falling back to defaults when the file is missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => expand(&path.to_string_lossy()),
            None => Self::default_path()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    /// Inventory path, command line first
    pub fn inventory_path(&self, cli: Option<&str>) -> Option<PathBuf> {
        cli.or(self.inventory.as_deref()).map(expand)
    }

    /// Engine options with command-line overrides applied
    pub fn engine_options(
        &self,
        jobs: Option<usize>,
        timeout_secs: Option<u64>,
        reject_unknown: bool,
    ) -> EngineOptions {
        EngineOptions {
            jobs: jobs.unwrap_or(self.jobs).max(1),
            call_timeout: Duration::from_secs(timeout_secs.unwrap_or(self.timeout_secs)),
            retry: self.retry.clone(),
            unknown_categories: if reject_unknown {
                UnknownCategoryPolicy::Reject
            } else {
                self.unknown_categories
            },
        }
    }
}

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| shellexpand::tilde(path));
    PathBuf::from(expanded.as_ref())
}
