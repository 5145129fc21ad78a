use crate::config::{DatasetConfig, EngineSettings, JudgeConfig};
use crate::errors::{ConfigError, JudgeError, JudgeResult};
use crate::executor::BackendKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Read-only account used to reach a dataset.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything the executor needs to reach one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    pub dataset: String,
    pub kind: BackendKind,
    /// File path (SQLite) or host.
    pub target: String,
    pub database: Option<String>,
    pub credential: Credential,
    pub timeout: Duration,
    pub max_rows: usize,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub case_insensitive_text: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub key: String,
    pub name: String,
    pub descriptor: ConnectionDescriptor,
    /// Static schema description; introspection is used when absent.
    pub schema_description: Option<String>,
    pub active: bool,
}

/// Listing entry, safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub key: String,
    pub name: String,
    pub kind: BackendKind,
    pub active: bool,
    pub default: bool,
}

/// Datasets known to the process. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    datasets: BTreeMap<String, Dataset>,
    default_key: Option<String>,
}

impl Registry {
    pub fn new(datasets: Vec<Dataset>, default_key: Option<String>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for ds in datasets {
            let key = ds.key.clone();
            if map.insert(key.clone(), ds).is_some() {
                return Err(ConfigError(format!("duplicate dataset key: {key}")));
            }
        }
        if let Some(key) = &default_key {
            if !map.contains_key(key) {
                return Err(ConfigError(format!(
                    "default_dataset {key} is not a registered dataset"
                )));
            }
        }
        Ok(Self {
            datasets: map,
            default_key,
        })
    }

    pub fn from_config(cfg: &JudgeConfig) -> Result<Self, ConfigError> {
        let datasets = cfg
            .datasets
            .iter()
            .map(|d| dataset_from_config(d, &cfg.engine))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(datasets, cfg.default_dataset.clone())
    }

    /// Descriptor of an active dataset.
    pub fn resolve(&self, key: &str) -> JudgeResult<&ConnectionDescriptor> {
        match self.datasets.get(key) {
            Some(ds) if ds.active => Ok(&ds.descriptor),
            _ => Err(JudgeError::unknown_dataset(key)),
        }
    }

    /// Picks the requested key, or the default when none was given.
    pub fn resolve_key<'a>(&'a self, key: Option<&'a str>) -> JudgeResult<&'a str> {
        match key.or(self.default_key.as_deref()) {
            Some(k) => Ok(k),
            None => Err(JudgeError::unknown_dataset("<none>")),
        }
    }

    pub fn dataset(&self, key: &str) -> Option<&Dataset> {
        self.datasets.get(key)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    pub fn default_key(&self) -> Option<&str> {
        self.default_key.as_deref()
    }

    pub fn summaries(&self) -> Vec<DatasetSummary> {
        self.datasets
            .values()
            .map(|d| DatasetSummary {
                key: d.key.clone(),
                name: d.name.clone(),
                kind: d.descriptor.kind,
                active: d.active,
                default: self.default_key.as_deref() == Some(d.key.as_str()),
            })
            .collect()
    }
}

fn dataset_from_config(d: &DatasetConfig, engine: &EngineSettings) -> Result<Dataset, ConfigError> {
    let password = match &d.password_env {
        Some(var) => Some(std::env::var(var).map_err(|_| {
            ConfigError(format!(
                "dataset {}: password_env {var} is not set",
                d.key
            ))
        })?),
        None => None,
    };

    Ok(Dataset {
        key: d.key.clone(),
        name: d.name.clone().unwrap_or_else(|| d.key.clone()),
        descriptor: ConnectionDescriptor {
            dataset: d.key.clone(),
            kind: d.kind,
            target: d.target.clone(),
            database: d.database.clone(),
            credential: Credential {
                user: d.user.clone(),
                password,
            },
            timeout: Duration::from_millis(d.timeout_ms.unwrap_or(engine.timeout_ms)),
            max_rows: d.max_rows.unwrap_or(engine.max_rows),
            pool_size: d.pool_size.unwrap_or(engine.pool_size),
            acquire_timeout: Duration::from_millis(
                d.acquire_timeout_ms.unwrap_or(engine.acquire_timeout_ms),
            ),
            case_insensitive_text: d
                .case_insensitive_text
                .unwrap_or(engine.case_insensitive_text),
        },
        schema_description: d.schema.clone().filter(|s| !s.trim().is_empty()),
        active: d.active,
    })
}
