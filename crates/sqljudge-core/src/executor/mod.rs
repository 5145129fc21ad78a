//! Sandboxed execution of untrusted SQL.
//!
//! A [`Backend`] owns the connection pool for one dataset. Every statement
//! passes [`safety::check_statement`] before a connection is touched, runs on a
//! blocking worker under a wall-clock deadline, and is interrupted when the
//! deadline passes or the caller stops waiting.

pub mod pool;
pub mod safety;
pub mod sqlite;

use crate::errors::JudgeResult;
use crate::model::ResultTable;
use crate::registry::ConnectionDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }
}

/// Bounds applied to a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_rows: usize,
}

impl ExecutionLimits {
    pub fn for_descriptor(descriptor: &ConnectionDescriptor, timeout_ms: Option<u64>) -> Self {
        Self {
            timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(descriptor.timeout),
            max_rows: descriptor.max_rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as written in the schema; absent for expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decl_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// `table` or `view`.
    pub kind: String,
    pub columns: Vec<ColumnInfo>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Runs one read-only statement and materializes its result.
    async fn execute(&self, sql: &str, limits: &ExecutionLimits) -> JudgeResult<ResultTable>;

    /// [`Backend::execute`] plus the time the statement itself ran. Waiting
    /// for a connection is not counted.
    async fn execute_timed(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> JudgeResult<(ResultTable, Duration)> {
        let started = Instant::now();
        let table = self.execute(sql, limits).await?;
        Ok((table, started.elapsed()))
    }

    /// Result columns of `sql` without running it.
    async fn describe_columns(&self, sql: &str) -> JudgeResult<Vec<ColumnInfo>>;

    async fn describe_schema(&self) -> JudgeResult<Vec<TableSchema>>;

    /// Connections that could be checked out right now.
    fn available_connections(&self) -> usize;

    /// Interrupts in-flight statements and closes the pool.
    fn shutdown(&self);
}

/// Opens the backend a descriptor points at.
pub fn connect(descriptor: &ConnectionDescriptor) -> JudgeResult<Arc<dyn Backend>> {
    match descriptor.kind {
        BackendKind::Sqlite => Ok(Arc::new(sqlite::SqliteBackend::new(descriptor.clone())?)),
    }
}

/// Line-oriented schema listing:
///
/// ```text
/// table scores:
///   - student_id (INTEGER)
///   - score (REAL)
/// ```
pub fn render_schema_text(tables: &[TableSchema]) -> String {
    let mut lines = Vec::new();
    for table in tables {
        lines.push(format!("{} {}:", table.kind, table.name));
        for col in &table.columns {
            match col.decl_type.as_deref() {
                Some(ty) if !ty.is_empty() => lines.push(format!("  - {} ({})", col.name, ty)),
                _ => lines.push(format!("  - {}", col.name)),
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_text_lists_columns_under_their_table() {
        let tables = vec![
            TableSchema {
                name: "scores".into(),
                kind: "table".into(),
                columns: vec![
                    ColumnInfo {
                        name: "student_id".into(),
                        decl_type: Some("INTEGER".into()),
                    },
                    ColumnInfo {
                        name: "score".into(),
                        decl_type: Some("REAL".into()),
                    },
                ],
            },
            TableSchema {
                name: "top_students".into(),
                kind: "view".into(),
                columns: vec![ColumnInfo {
                    name: "name".into(),
                    decl_type: None,
                }],
            },
        ];
        assert_eq!(
            render_schema_text(&tables),
            "table scores:\n  - student_id (INTEGER)\n  - score (REAL)\nview top_students:\n  - name"
        );
    }
}
