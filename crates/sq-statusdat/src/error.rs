//! Error types for the status.dat reader

use std::path::PathBuf;

use thiserror::Error;

use crate::expression::ExpressionError;

/// Result type for reader operations
pub type StatusdatResult<T> = Result<T, StatusdatError>;

#[derive(Error, Debug)]
pub enum StatusdatError {
    /// A configured file could not be opened or inspected
    #[error("Can't read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading from an already open source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// objects.cache or status.dat is malformed
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A query expression is malformed
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// `from()` named a table status.dat does not provide
    #[error("Unknown from target for status.dat: {0}")]
    UnknownTarget(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StatusdatError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
