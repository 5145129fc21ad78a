use crate::errors::ConfigError;
use crate::executor::BackendKind;
use crate::normalize::{NormalizePolicy, DEFAULT_FLOAT_ABS_TOLERANCE, DEFAULT_FLOAT_REL_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub mod resolve;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub default_dataset: Option<String>,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

/// How reference results are obtained for repeated judgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Execute the reference statement for every request.
    Fresh,
    /// Reuse a recent reference result; datasets do not change while the
    /// process runs.
    #[default]
    Cached,
}

impl std::str::FromStr for ReferencePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fresh" => Ok(Self::Fresh),
            "cached" => Ok(Self::Cached),
            other => Err(ConfigError(format!(
                "invalid reference_policy {other:?} (expected fresh or cached)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub timeout_ms: u64,
    pub max_rows: usize,
    pub pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub preview_rows: usize,
    pub float_abs_tolerance: f64,
    pub float_rel_tolerance: f64,
    pub case_insensitive_text: bool,
    pub reference_policy: ReferencePolicy,
    pub reference_cache_ttl_secs: u64,
    pub reference_cache_entries: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            max_rows: 2_000,
            pool_size: 4,
            acquire_timeout_ms: 500,
            preview_rows: crate::model::DEFAULT_PREVIEW_ROWS,
            float_abs_tolerance: DEFAULT_FLOAT_ABS_TOLERANCE,
            float_rel_tolerance: DEFAULT_FLOAT_REL_TOLERANCE,
            case_insensitive_text: false,
            reference_policy: ReferencePolicy::Cached,
            reference_cache_ttl_secs: 300,
            reference_cache_entries: 256,
        }
    }
}

impl EngineSettings {
    /// Checks the settings; runs on the parsed file and again after the
    /// `SQLJUDGE_*` overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError("engine.pool_size must be > 0".into()));
        }
        if self.max_rows == 0 {
            return Err(ConfigError("engine.max_rows must be > 0".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError("engine.timeout_ms must be > 0".into()));
        }
        for (name, value) in [
            ("float_abs_tolerance", self.float_abs_tolerance),
            ("float_rel_tolerance", self.float_rel_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError(format!(
                    "engine.{name} must be a finite, non-negative number (got {value})"
                )));
            }
        }
        Ok(())
    }

    /// Comparison policy for a dataset; the text-case flag is per dataset.
    pub fn normalize_policy(&self, case_insensitive_text: bool) -> NormalizePolicy {
        NormalizePolicy {
            float_abs_tolerance: self.float_abs_tolerance,
            float_rel_tolerance: self.float_rel_tolerance,
            case_insensitive_text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: BackendKind,
    /// SQLite file path, relative paths resolve against the config file.
    pub target: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_rows: Option<usize>,
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default)]
    pub case_insensitive_text: Option<bool>,
}

fn default_active() -> bool {
    true
}

pub fn load_config(path: &Path, strict: bool) -> Result<JudgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, path, strict)
}

/// Parses and validates a config document. `origin` is the file the text came
/// from; relative dataset targets are resolved against its directory.
pub fn parse_config(raw: &str, origin: &Path, strict: bool) -> Result<JudgeConfig, ConfigError> {
    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let mut cfg: JudgeConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // Keys starting with `x-` or `_` are free-form annotations (YAML anchors).
    let meaningful: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .cloned()
        .collect();
    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                meaningful,
                origin.display()
            )));
        }
        tracing::warn!(
            event = "config_unknown_fields",
            fields = ?meaningful,
            file = %origin.display(),
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    validate(&cfg)?;
    resolve::resolve_targets(&mut cfg, origin);
    Ok(cfg)
}

fn validate(cfg: &JudgeConfig) -> Result<(), ConfigError> {
    if cfg.datasets.is_empty() {
        return Err(ConfigError("config has no datasets".into()));
    }

    let mut seen = HashSet::new();
    for ds in &cfg.datasets {
        if ds.key.trim().is_empty() {
            return Err(ConfigError("dataset with empty key".into()));
        }
        if !seen.insert(ds.key.as_str()) {
            return Err(ConfigError(format!("duplicate dataset key: {}", ds.key)));
        }
        if ds.pool_size == Some(0) {
            return Err(ConfigError(format!("dataset {}: pool_size must be > 0", ds.key)));
        }
        if ds.max_rows == Some(0) {
            return Err(ConfigError(format!("dataset {}: max_rows must be > 0", ds.key)));
        }
        if ds.timeout_ms == Some(0) {
            return Err(ConfigError(format!("dataset {}: timeout_ms must be > 0", ds.key)));
        }
    }

    if let Some(key) = &cfg.default_dataset {
        if !seen.contains(key.as_str()) {
            return Err(ConfigError(format!(
                "default_dataset {key} is not a registered dataset"
            )));
        }
    }

    cfg.engine.validate()
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"version: 1
default_dataset: ds_student_scores
engine:
  timeout_ms: 3000
  max_rows: 2000
  pool_size: 4
  preview_rows: 5
  float_abs_tolerance: 0.000001
  reference_policy: cached
datasets:
  - key: ds_student_scores
    name: Student scores
    target: student_scores.db
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str, strict: bool) -> Result<JudgeConfig, ConfigError> {
        parse_config(yaml, Path::new("/srv/judge/judge.yaml"), strict)
    }

    #[test]
    fn minimal_config_takes_defaults() {
        let cfg = parse("datasets:\n  - key: ds\n    target: data/ds.db\n", true).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.engine.timeout_ms, 3_000);
        assert_eq!(cfg.engine.preview_rows, 5);
        assert_eq!(cfg.engine.reference_policy, ReferencePolicy::Cached);
        assert!(cfg.datasets[0].active);
        assert_eq!(cfg.datasets[0].target, "/srv/judge/data/ds.db");
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let yaml = "datasets:\n  - key: ds\n    target: a.db\n    tolerance: 1\n";
        let err = parse(yaml, true).unwrap_err();
        assert!(err.to_string().contains("Unknown fields"));
        assert!(parse(yaml, false).is_ok());
    }

    #[test]
    fn annotation_keys_are_allowed_in_strict_mode() {
        let yaml = "x-owner: course-team\ndatasets:\n  - key: ds\n    target: a.db\n";
        assert!(parse(yaml, true).is_ok());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = parse("version: 2\ndatasets:\n  - key: ds\n    target: a.db\n", true).unwrap_err();
        assert!(err.to_string().contains("unsupported config version 2"));
    }

    #[test]
    fn default_dataset_must_exist() {
        let yaml = "default_dataset: nope\ndatasets:\n  - key: ds\n    target: a.db\n";
        assert!(parse(yaml, true).unwrap_err().to_string().contains("nope"));
    }

    #[test]
    fn empty_dataset_list_is_rejected() {
        assert!(parse("version: 1\n", true).is_err());
    }

    #[test]
    fn engine_limits_must_be_usable() {
        for engine in [
            "max_rows: 0",
            "pool_size: 0",
            "timeout_ms: 0",
            "float_abs_tolerance: -1.0",
            "float_rel_tolerance: .nan",
            "float_abs_tolerance: .inf",
        ] {
            let yaml = format!("engine:\n  {engine}\ndatasets:\n  - key: ds\n    target: a.db\n");
            assert!(parse(&yaml, true).is_err(), "{engine} was accepted");
        }
    }

    #[test]
    fn dataset_limits_must_be_usable() {
        for field in ["max_rows: 0", "pool_size: 0", "timeout_ms: 0"] {
            let yaml = format!("datasets:\n  - key: ds\n    target: a.db\n    {field}\n");
            let err = parse(&yaml, true).unwrap_err();
            assert!(err.to_string().contains("dataset ds"), "{field}: {err}");
        }
    }

    #[test]
    fn reference_policy_parses_from_text() {
        assert_eq!("Fresh".parse::<ReferencePolicy>().unwrap(), ReferencePolicy::Fresh);
        assert!("sometimes".parse::<ReferencePolicy>().is_err());
    }

    #[test]
    fn sample_config_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judge.yaml");
        write_sample_config(&path).unwrap();
        let cfg = load_config(&path, true).unwrap();
        assert_eq!(cfg.default_dataset.as_deref(), Some("ds_student_scores"));
        assert!(cfg.datasets[0].target.ends_with("student_scores.db"));
    }
}
