pub mod compare;
pub mod config;
pub mod errors;
pub mod executor;
pub mod judge;
pub mod model;
pub mod normalize;
pub mod registry;

pub use errors::{ConfigError, ErrorKind, JudgeError, JudgeResult};
pub use judge::JudgeEngine;
pub use model::{JudgeRequest, Question, ResultTable, Value, Verdict, VerdictStatus};
