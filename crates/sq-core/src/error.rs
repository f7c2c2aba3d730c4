//! Error types for query execution

use thiserror::Error;

use crate::filter::FilterParseError;

/// Result type for datasource operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Failures a datasource can surface.
///
/// Data shape never fails a query; these are backend problems (unreadable
/// files, broken snapshots) or malformed caller input.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The backing store could not produce records
    #[error("Backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// The query names a target the datasource does not serve
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// A filter string could not be parsed
    #[error(transparent)]
    Filter(#[from] FilterParseError),
}

impl QueryError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}
