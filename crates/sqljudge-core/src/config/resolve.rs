use super::{EngineSettings, JudgeConfig};
use crate::errors::ConfigError;
use crate::executor::BackendKind;
use std::path::Path;

/// Makes relative SQLite targets relative to the config file's directory.
/// URIs (`file:...`) and absolute paths are kept as written.
pub fn resolve_targets(cfg: &mut JudgeConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    for ds in &mut cfg.datasets {
        if ds.kind != BackendKind::Sqlite || ds.target.starts_with("file:") {
            continue;
        }
        let target = Path::new(&ds.target);
        if target.is_relative() && !ds.target.is_empty() {
            ds.target = base.join(target).to_string_lossy().into_owned();
        }
    }
}

impl EngineSettings {
    /// Applies `SQLJUDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError(format!("invalid value for {key}: {raw:?}")))
        }

        if let Some(v) = lookup("SQLJUDGE_TIMEOUT_MS") {
            self.timeout_ms = parsed("SQLJUDGE_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_MAX_ROWS") {
            self.max_rows = parsed("SQLJUDGE_MAX_ROWS", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_POOL_SIZE") {
            self.pool_size = parsed("SQLJUDGE_POOL_SIZE", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_ACQUIRE_TIMEOUT_MS") {
            self.acquire_timeout_ms = parsed("SQLJUDGE_ACQUIRE_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_PREVIEW_ROWS") {
            self.preview_rows = parsed("SQLJUDGE_PREVIEW_ROWS", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_FLOAT_ABS_TOLERANCE") {
            self.float_abs_tolerance = parsed("SQLJUDGE_FLOAT_ABS_TOLERANCE", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_FLOAT_REL_TOLERANCE") {
            self.float_rel_tolerance = parsed("SQLJUDGE_FLOAT_REL_TOLERANCE", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_CASE_INSENSITIVE_TEXT") {
            self.case_insensitive_text = parsed("SQLJUDGE_CASE_INSENSITIVE_TEXT", v)?;
        }
        if let Some(v) = lookup("SQLJUDGE_REFERENCE_POLICY") {
            self.reference_policy = v.parse()?;
        }

        self.validate()
            .map_err(|e| ConfigError(format!("after SQLJUDGE_* overrides: {}", e.0)))
    }
}
