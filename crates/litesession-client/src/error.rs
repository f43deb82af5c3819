//! Error types for the litesession client library

use std::fmt;

use thiserror::Error;

/// Result type alias for litesession operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status reported by the engine for a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Extended result code, when the failure came from the engine itself
    pub code: Option<i32>,
    pub message: String,
}

impl EngineStatus {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (status {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl From<&rusqlite::Error> for EngineStatus {
    fn from(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(inner, message) => Self {
                code: Some(inner.extended_code),
                message: message.clone().unwrap_or_else(|| inner.to_string()),
            },
            other => Self::new(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineStatus {
    fn from(err: rusqlite::Error) -> Self {
        Self::from(&err)
    }
}

/// Ways a caller can misuse engine resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// A result or pending execution from this session is still alive
    ResultNotConsumed,
    /// The pending execution already produced its result or failed
    AlreadyCompleted,
    /// An appender row is missing values
    IncompleteRow { filled: usize, expected: usize },
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Misuse::ResultNotConsumed => {
                f.write_str("previous result on this session has not been released")
            }
            Misuse::AlreadyCompleted => f.write_str("pending execution already completed"),
            Misuse::IncompleteRow { filled, expected } => {
                write!(f, "row has {} of {} values", filled, expected)
            }
        }
    }
}

/// Errors that can occur when using the litesession client
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown option or invalid option value
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    /// Opening the database or a session failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Statement text could not be split or parsed
    #[error("Failed to parse SQL: {0}")]
    Parse(String),

    /// The engine refused to prepare a statement
    #[error("Failed to prepare `{sql}`: {status}")]
    Prepare { sql: String, status: EngineStatus },

    /// Parameter position or type mismatch
    #[error("Failed to bind parameter {position}: {message}")]
    Bind { position: usize, message: String },

    /// The engine reported a failure while executing
    #[error("Execution failed: {0}")]
    Execution(EngineStatus),

    /// Execution was interrupted through a cancel handle
    #[error("Execution interrupted")]
    Interrupted,

    /// A value could not be decoded from the engine
    #[error("Failed to decode column {column}: {message}")]
    Decode { column: usize, message: String },

    /// An appender flush was rejected; no rows of the batch were stored
    #[error("Appender flush failed: {0}")]
    Flush(String),

    /// Use-after-release, reuse of an unconsumed result, and similar mistakes
    #[error("Resource misuse: {0}")]
    ResourceMisuse(Misuse),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Map an engine error raised while stepping a statement
    pub(crate) fn execution(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted) {
            Error::Interrupted
        } else {
            Error::Execution(EngineStatus::from(err))
        }
    }

    /// Engine status carried by this error, if any
    pub fn status(&self) -> Option<&EngineStatus> {
        match self {
            Error::Prepare { status, .. } | Error::Execution(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::ResourceMisuse(_))
    }
}

impl From<Misuse> for Error {
    fn from(misuse: Misuse) -> Self {
        Error::ResourceMisuse(misuse)
    }
}
