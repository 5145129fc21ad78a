use crate::errors::{ErrorKind, JudgeError, JudgeResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Rows shown next to a verdict when no explicit limit is configured.
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// A typed scalar produced by a backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
        }
    }
}

/// Materialized result of one statement. Column names are unique; every row is
/// aligned positionally with `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> JudgeResult<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(JudgeError::execution(format!(
                    "duplicate column name `{name}` in result set; give each selected column a distinct alias"
                )));
            }
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(JudgeError::internal(format!(
                "row {} has {} values but the result has {} columns",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Columns in their original order plus the first `limit` rows rendered as
    /// text.
    pub fn preview(&self, limit: usize) -> ResultPreview {
        ResultPreview {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .take(limit)
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
            total_rows: self.rows.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// A practice question. Authored elsewhere; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub dataset: String,
    pub reference_sql: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub answer_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeRequest {
    /// Falls back to the registry's default dataset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub reference_sql: String,
    pub candidate_sql: String,
    /// Overrides the dataset's execution timeout for this request only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JudgeRequest {
    pub fn new(
        dataset: impl Into<String>,
        reference_sql: impl Into<String>,
        candidate_sql: impl Into<String>,
    ) -> Self {
        Self {
            dataset: Some(dataset.into()),
            reference_sql: reference_sql.into(),
            candidate_sql: candidate_sql.into(),
            timeout_ms: None,
        }
    }

    pub fn for_question(question: &Question, candidate_sql: impl Into<String>) -> Self {
        Self::new(
            question.dataset.clone(),
            question.reference_sql.clone(),
            candidate_sql,
        )
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Error,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Which of the two executions produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Reference,
    Candidate,
}

/// Candidate result as shown to the learner: original column order, first rows
/// rendered as text, and the full row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

/// Bounded description of why a result did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchPreview {
    Columns {
        /// In the reference, absent from the candidate.
        missing: Vec<String>,
        /// In the candidate, absent from the reference.
        unexpected: Vec<String>,
    },
    Rows {
        /// Canonical (lexical) column order used for the rows below.
        columns: Vec<String>,
        missing: Vec<Vec<String>>,
        extra: Vec<Vec<String>>,
        missing_total: usize,
        extra_total: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
    pub message: String,
    /// Wall-clock duration of the candidate execution.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<MismatchPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<ResultPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_side: Option<Side>,
}

impl Verdict {
    pub fn pass(elapsed_ms: u64, result_preview: ResultPreview) -> Self {
        Self {
            status: VerdictStatus::Pass,
            reason: None,
            message: "Correct! Your result matches the reference result.".into(),
            elapsed_ms,
            preview: None,
            result_preview: Some(result_preview),
            failed_side: None,
        }
    }

    pub fn fail(
        reason: ErrorKind,
        message: impl Into<String>,
        preview: MismatchPreview,
        elapsed_ms: u64,
        result_preview: ResultPreview,
    ) -> Self {
        Self {
            status: VerdictStatus::Fail,
            reason: Some(reason),
            message: message.into(),
            elapsed_ms,
            preview: Some(preview),
            result_preview: Some(result_preview),
            failed_side: None,
        }
    }

    pub fn error(err: &JudgeError, side: Option<Side>, elapsed_ms: u64) -> Self {
        let message = match side {
            Some(Side::Reference) => format!("reference query failed: {err}"),
            _ => err.to_string(),
        };
        Self {
            status: VerdictStatus::Error,
            reason: Some(err.kind()),
            message,
            elapsed_ms,
            preview: None,
            result_preview: None,
            failed_side: side,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == VerdictStatus::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = ResultTable::new(vec!["a".into(), "a".into()], vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        assert!(err.to_string().contains("`a`"));
    }

    #[test]
    fn ragged_rows_are_an_internal_fault() {
        let err = ResultTable::new(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Integer(1)]],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalFault);
    }

    #[test]
    fn preview_renders_first_rows_and_counts_all() {
        let rows = (0..8)
            .map(|i| vec![Value::Integer(i), Value::Null])
            .collect::<Vec<_>>();
        let table = ResultTable::new(vec!["id".into(), "note".into()], rows).unwrap();
        let p = table.preview(DEFAULT_PREVIEW_ROWS);
        assert_eq!(p.rows.len(), 5);
        assert_eq!(p.total_rows, 8);
        assert_eq!(p.rows[1], vec!["1".to_string(), "NULL".to_string()]);
    }

    #[test]
    fn reference_side_errors_are_labelled() {
        let v = Verdict::error(
            &JudgeError::execution("no such table: scores"),
            Some(Side::Reference),
            0,
        );
        assert_eq!(v.status, VerdictStatus::Error);
        assert_eq!(v.reason, Some(ErrorKind::ExecutionError));
        assert_eq!(v.message, "reference query failed: no such table: scores");
    }

    #[test]
    fn verdict_serializes_with_stable_codes() {
        let v = Verdict::error(&JudgeError::forbidden("`DELETE` is not allowed"), None, 0);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["reason"], "forbidden_statement");
        assert!(json.get("preview").is_none());
    }

    #[test]
    fn request_deserializes_without_dataset() {
        let req: JudgeRequest = serde_json::from_str(
            r#"{"reference_sql": "SELECT 1", "candidate_sql": "SELECT 1", "timeout_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(req.dataset, None);
        assert_eq!(req.timeout_ms, Some(250));
    }
}
