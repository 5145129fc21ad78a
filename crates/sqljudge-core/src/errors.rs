//! Error taxonomy for the judge engine.
//!
//! Every failure a judgment can hit maps onto one [`ErrorKind`] code. The
//! codes are stable and serialized into verdicts, so callers can tell "my SQL is
//! broken, forbidden or timed out" apart from "my SQL ran but the result is
//! wrong".

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Stable reason codes carried by a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownDataset,
    ForbiddenStatement,
    PoolExhausted,
    ExecutionTimeout,
    ResultTooLarge,
    ExecutionError,
    ColumnMismatch,
    RowMismatch,
    InternalFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownDataset => "unknown_dataset",
            Self::ForbiddenStatement => "forbidden_statement",
            Self::PoolExhausted => "pool_exhausted",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ResultTooLarge => "result_too_large",
            Self::ExecutionError => "execution_error",
            Self::ColumnMismatch => "column_mismatch",
            Self::RowMismatch => "row_mismatch",
            Self::InternalFault => "internal_fault",
        }
    }

    /// Mismatch codes mean the SQL ran and produced a wrong answer.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::ColumnMismatch | Self::RowMismatch)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised while resolving, executing or materializing a statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JudgeError {
    /// Dataset key not registered, or registered but inactive.
    #[error("unknown dataset: {key}")]
    UnknownDataset { key: String },

    /// Rejected by the statement-safety filter before any connection was opened.
    #[error("forbidden statement: {reason}")]
    ForbiddenStatement { reason: String },

    /// No pooled connection became available within the acquire deadline.
    #[error("dataset {dataset} is busy: no connection available within {}ms, try again", .waited.as_millis())]
    PoolExhausted { dataset: String, waited: Duration },

    /// Statement ran past its wall-clock deadline and was interrupted.
    #[error("query exceeded the {}ms execution limit", .limit.as_millis())]
    ExecutionTimeout { limit: Duration },

    /// Result has more rows than the configured cap.
    #[error("query returned more than {limit} rows")]
    ResultTooLarge { limit: usize },

    /// Backing store rejected or failed the statement. The message is the
    /// store's own diagnostic, unmodified.
    #[error("{message}")]
    ExecutionError { message: String },

    #[error("internal fault: {message}")]
    InternalFault { message: String },
}

impl JudgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDataset { .. } => ErrorKind::UnknownDataset,
            Self::ForbiddenStatement { .. } => ErrorKind::ForbiddenStatement,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            Self::ResultTooLarge { .. } => ErrorKind::ResultTooLarge,
            Self::ExecutionError { .. } => ErrorKind::ExecutionError,
            Self::InternalFault { .. } => ErrorKind::InternalFault,
        }
    }

    pub fn unknown_dataset(key: impl Into<String>) -> Self {
        Self::UnknownDataset { key: key.into() }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::ForbiddenStatement {
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalFault {
            message: message.into(),
        }
    }
}

/// Result type for judge operations.
pub type JudgeResult<T> = Result<T, JudgeError>;

#[derive(Debug)]
pub struct ConfigError(pub String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_maps_to_a_non_mismatch_kind() {
        let errors = [
            JudgeError::unknown_dataset("ds_missing"),
            JudgeError::forbidden("`DROP` is not allowed"),
            JudgeError::PoolExhausted {
                dataset: "ds".into(),
                waited: Duration::from_millis(500),
            },
            JudgeError::ExecutionTimeout {
                limit: Duration::from_secs(3),
            },
            JudgeError::ResultTooLarge { limit: 2000 },
            JudgeError::execution("no such column: foo"),
            JudgeError::internal("malformed descriptor"),
        ];
        for e in errors {
            assert!(!e.kind().is_mismatch(), "{e} must surface as an error");
        }
    }

    #[test]
    fn execution_error_keeps_store_message_verbatim() {
        let e = JudgeError::execution("near \"SELEC\": syntax error");
        assert_eq!(e.to_string(), "near \"SELEC\": syntax error");
    }

    #[test]
    fn timeout_message_reports_limit_in_millis() {
        let e = JudgeError::ExecutionTimeout {
            limit: Duration::from_millis(1500),
        };
        assert_eq!(e.to_string(), "query exceeded the 1500ms execution limit");
    }

    #[test]
    fn kind_codes_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::ForbiddenStatement).unwrap(),
            "\"forbidden_statement\""
        );
        assert_eq!(ErrorKind::RowMismatch.to_string(), "row_mismatch");
    }
}
