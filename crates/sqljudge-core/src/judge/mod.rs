//! The judge: runs a reference and a candidate statement against the same
//! dataset and decides whether their results agree.

pub mod reference_cache;

use crate::compare::compare;
use crate::config::{EngineSettings, JudgeConfig, ReferencePolicy};
use crate::errors::{JudgeError, JudgeResult};
use crate::executor::{
    self, render_schema_text, safety, Backend, ColumnInfo, ExecutionLimits, TableSchema,
};
use crate::model::{JudgeRequest, Question, ResultPreview, ResultTable, Side, Verdict};
use crate::normalize::normalize;
use crate::registry::Registry;
use anyhow::Context;
use reference_cache::ReferenceCache;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const FAIL_MESSAGE: &str = "Result does not match the reference. Check your query logic.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    ExecutingReference,
    ExecutingCandidate,
    Comparing,
    Done,
}

fn enter(stage: Stage, dataset: &str) {
    tracing::debug!(event = "judge_stage", stage = ?stage, dataset = %dataset);
}

/// First rows of one table, for showing a dataset to a learner.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub table: String,
    pub kind: String,
    pub preview: ResultPreview,
}

pub struct JudgeEngine {
    registry: Arc<Registry>,
    backends: HashMap<String, Arc<dyn Backend>>,
    settings: EngineSettings,
    reference_cache: Option<ReferenceCache>,
}

impl JudgeEngine {
    /// Connects a backend for every active dataset.
    pub fn new(registry: Registry, settings: EngineSettings) -> JudgeResult<Self> {
        let mut backends = HashMap::new();
        for ds in registry.datasets().filter(|d| d.active) {
            backends.insert(ds.key.clone(), executor::connect(&ds.descriptor)?);
        }
        let reference_cache = match settings.reference_policy {
            ReferencePolicy::Cached => Some(ReferenceCache::new(
                Duration::from_secs(settings.reference_cache_ttl_secs),
                settings.reference_cache_entries,
            )),
            ReferencePolicy::Fresh => None,
        };
        tracing::info!(
            event = "engine_ready",
            datasets = backends.len(),
            reference_policy = ?settings.reference_policy,
        );
        Ok(Self {
            registry: Arc::new(registry),
            backends,
            settings,
            reference_cache,
        })
    }

    pub fn from_config(cfg: &JudgeConfig) -> anyhow::Result<Self> {
        let registry =
            Registry::from_config(cfg).context("failed to build dataset registry")?;
        let engine =
            Self::new(registry, cfg.engine.clone()).context("failed to connect datasets")?;
        Ok(engine)
    }

    /// Replaces the backend serving `key`.
    pub fn register_backend(&mut self, key: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends.insert(key.into(), backend);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Backend of an active dataset.
    pub fn backend(&self, key: &str) -> JudgeResult<&Arc<dyn Backend>> {
        self.registry.resolve(key)?;
        self.backends
            .get(key)
            .ok_or_else(|| JudgeError::internal(format!("no backend connected for dataset {key}")))
    }

    pub async fn judge_question(&self, question: &Question, candidate_sql: &str) -> Verdict {
        self.judge(&JudgeRequest::for_question(question, candidate_sql))
            .await
    }

    /// Judges one request. Always produces a verdict.
    pub async fn judge(&self, req: &JudgeRequest) -> Verdict {
        let key = req.dataset.as_deref().unwrap_or("<default>");
        enter(Stage::Start, key);
        let verdict = self.run(req).await;
        enter(Stage::Done, key);
        tracing::info!(
            event = "judge_done",
            dataset = %key,
            status = verdict.status.as_str(),
            reason = verdict.reason.map(|r| r.as_str()).unwrap_or(""),
            elapsed_ms = verdict.elapsed_ms,
        );
        verdict
    }

    async fn run(&self, req: &JudgeRequest) -> Verdict {
        let key = match self.registry.resolve_key(req.dataset.as_deref()) {
            Ok(key) => key,
            Err(e) => return Verdict::error(&e, None, 0),
        };
        let descriptor = match self.registry.resolve(key) {
            Ok(d) => d,
            Err(e) => return Verdict::error(&e, None, 0),
        };
        let backend = match self.backend(key) {
            Ok(b) => b,
            Err(e) => return Verdict::error(&e, None, 0),
        };
        // Rejected candidates never reach a connection.
        if let Err(e) = safety::check_statement(&req.candidate_sql) {
            return Verdict::error(&e, Some(Side::Candidate), 0);
        }

        let limits = ExecutionLimits::for_descriptor(descriptor, req.timeout_ms);
        let started = Instant::now();
        let reference = async {
            enter(Stage::ExecutingReference, key);
            self.reference_result(key, backend.as_ref(), &req.reference_sql, &limits)
                .await
                .map_err(|e| (e, Side::Reference))
        };
        // Elapsed time is the candidate statement's own run time, so a
        // reference holding the only connection is not charged to it.
        let candidate = async {
            enter(Stage::ExecutingCandidate, key);
            backend
                .execute_timed(&req.candidate_sql, &limits)
                .await
                .map_err(|e| (e, Side::Candidate))
        };

        // The first failure drops the other future, which interrupts its statement.
        let (reference, (candidate, elapsed)) = match tokio::try_join!(reference, candidate) {
            Ok(both) => both,
            Err((e, side)) => {
                tracing::debug!(event = "judge_execution_failed", side = ?side, kind = %e.kind());
                return Verdict::error(&e, Some(side), millis(started.elapsed()));
            }
        };

        enter(Stage::Comparing, key);
        self.decide(&reference, &candidate, descriptor.case_insensitive_text, millis(elapsed))
    }

    fn decide(
        &self,
        reference: &ResultTable,
        candidate: &ResultTable,
        case_insensitive_text: bool,
        elapsed_ms: u64,
    ) -> Verdict {
        let policy = self.settings.normalize_policy(case_insensitive_text);
        let rows = self.settings.preview_rows;
        let outcome = compare(
            &normalize(reference, &policy),
            &normalize(candidate, &policy),
            &policy,
            rows,
        );
        let result_preview = candidate.preview(rows);
        match (outcome.reason(), outcome.preview()) {
            (Some(reason), Some(preview)) => Verdict::fail(
                reason,
                format!("{FAIL_MESSAGE} ({})", outcome.summary()),
                preview,
                elapsed_ms,
                result_preview,
            ),
            _ => Verdict::pass(elapsed_ms, result_preview),
        }
    }

    async fn reference_result(
        &self,
        key: &str,
        backend: &dyn Backend,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> JudgeResult<Arc<ResultTable>> {
        let Some(cache) = &self.reference_cache else {
            return backend.execute(sql, limits).await.map(Arc::new);
        };
        let cache_key = ReferenceCache::key(key, sql, limits.max_rows);
        if let Some(hit) = cache.get(&cache_key) {
            tracing::debug!(event = "reference_cache_hit", dataset = %key);
            return Ok(hit);
        }
        let table = Arc::new(backend.execute(sql, limits).await?);
        cache.insert(cache_key, Arc::clone(&table));
        Ok(table)
    }

    pub async fn describe_schema(&self, key: Option<&str>) -> JudgeResult<Vec<TableSchema>> {
        let key = self.registry.resolve_key(key)?;
        self.backend(key)?.describe_schema().await
    }

    /// Result columns `sql` would produce on a dataset, without running it.
    pub async fn result_columns(
        &self,
        key: Option<&str>,
        sql: &str,
    ) -> JudgeResult<Vec<ColumnInfo>> {
        let key = self.registry.resolve_key(key)?;
        self.backend(key)?.describe_columns(sql).await
    }

    /// Schema text for question authoring. A static description from the
    /// configuration wins over introspection.
    pub async fn schema_text(&self, key: Option<&str>) -> JudgeResult<String> {
        let key = self.registry.resolve_key(key)?;
        let backend = self.backend(key)?;
        if let Some(text) = self
            .registry
            .dataset(key)
            .and_then(|d| d.schema_description.clone())
        {
            return Ok(text);
        }
        Ok(render_schema_text(&backend.describe_schema().await?))
    }

    /// Column names and first `rows` rows of every table in a dataset.
    pub async fn dataset_preview(
        &self,
        key: Option<&str>,
        rows: usize,
    ) -> JudgeResult<Vec<TablePreview>> {
        let key = self.registry.resolve_key(key)?;
        let descriptor = self.registry.resolve(key)?;
        let backend = self.backend(key)?;
        let limits = ExecutionLimits::for_descriptor(descriptor, None);

        let mut out = Vec::new();
        for table in backend.describe_schema().await? {
            let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(&table.name), rows);
            let result = backend.execute(&sql, &limits).await?;
            out.push(TablePreview {
                preview: result.preview(rows),
                table: table.name,
                kind: table.kind,
            });
        }
        Ok(out)
    }

    /// Interrupts in-flight statements and closes every pool.
    pub fn shutdown(&self) {
        for backend in self.backends.values() {
            backend.shutdown();
        }
        if let Some(cache) = &self.reference_cache {
            cache.clear();
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
