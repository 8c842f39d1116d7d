//! Desired-state documents
//!
//! A document maps category names to field mappings. It is parsed once,
//! validated against the [`Registry`] as a whole (every problem is reported,
//! not just the first), and then shared read-only by all host workers.

use crate::error::{Error, Result};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Top-level key carrying the minimum category schema version
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// On-disk format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Format by file extension; anything unrecognized (and stdin) is YAML,
    /// which also accepts JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Yaml => "YAML",
            Self::Json => "JSON",
            Self::Toml => "TOML",
        }
    }

    /// Parse text in this format into a JSON value
    pub fn parse(&self, text: &str) -> Result<Value> {
        let parsed = match self {
            Self::Yaml => serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str::<Value>(text).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str::<Value>(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| Error::Parse {
            format: self.name(),
            message,
        })
    }
}

/// What to do with categories the registry does not know
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCategoryPolicy {
    #[default]
    Ignore,
    Reject,
}

/// A parsed but not yet validated document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredStateDocument {
    pub schema_version: Option<u32>,
    pub categories: BTreeMap<String, Value>,
}

impl DesiredStateDocument {
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        Self::from_value(format.parse(text)?)
    }

    /// Load from a file, or from stdin when `path` is `-`
    pub fn load(path: &Path) -> Result<Self> {
        let text = if path.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|source| Error::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            buf
        } else {
            std::fs::read_to_string(path).map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?
        };
        log::debug!("Loaded desired state from {}", path.display());
        Self::parse(&text, DocumentFormat::from_path(path))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidDesiredStateDocument {
                    problems: vec![format!(
                        "top level must be a mapping of category to fields, got {}",
                        crate::value::type_name(&other)
                    )],
                });
            }
        };

        let mut doc = Self::default();
        for (key, value) in map {
            if key == SCHEMA_VERSION_KEY {
                let version = value
                    .as_u64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| Error::InvalidDesiredStateDocument {
                        problems: vec![format!("{SCHEMA_VERSION_KEY} must be a positive integer")],
                    })?;
                doc.schema_version = Some(version);
            } else {
                doc.categories.insert(key, value);
            }
        }
        Ok(doc)
    }

    /// Validate against the registry, collecting every problem.
    pub fn validate(
        &self,
        registry: &Registry,
        policy: UnknownCategoryPolicy,
    ) -> Result<DesiredState> {
        let mut problems = Vec::new();
        let mut categories = BTreeMap::new();

        for (category, body) in &self.categories {
            let Some(schema) = registry.get(category) else {
                match policy {
                    UnknownCategoryPolicy::Reject => {
                        problems.push(format!("unknown category '{category}'"));
                    }
                    UnknownCategoryPolicy::Ignore => {
                        log::warn!("Ignoring unknown category '{category}'");
                    }
                }
                continue;
            };

            if let Some(required) = self.schema_version
                && schema.version < required
            {
                problems.push(format!(
                    "{category}: schema version {} is older than required {required}",
                    schema.version
                ));
            }

            let fields = match body {
                Value::Null => Map::new(),
                Value::Object(fields) => fields.clone(),
                other => {
                    problems.push(format!(
                        "{category}: expected a mapping of fields, got {}",
                        crate::value::type_name(other)
                    ));
                    continue;
                }
            };

            let mut coerced = Map::new();
            for (field, desired) in fields {
                match registry.coerce_desired(category, &field, desired) {
                    Ok(value) => {
                        coerced.insert(field, value);
                    }
                    Err(reason) => problems.push(format!("{category}/{field}: {reason}")),
                }
            }
            categories.insert(category.clone(), coerced);
        }

        if problems.is_empty() {
            Ok(DesiredState { categories })
        } else {
            Err(Error::InvalidDesiredStateDocument { problems })
        }
    }
}

/// A validated document, fields coerced to their declared kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DesiredState {
    categories: BTreeMap<String, Map<String, Value>>,
}

impl DesiredState {
    pub fn category(&self, name: &str) -> Option<&Map<String, Value>> {
        self.categories.get(name)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&String, &Map<String, Value>)> {
        self.categories.iter()
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
