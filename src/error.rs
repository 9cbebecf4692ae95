use thiserror::Error;

/// Errors surfaced by configuration, the proxy and the database wrapper.
///
/// Profiling calls themselves never fail: misuse degrades to a no-op.
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<deadpool_postgres::PoolError> for ProfilerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<tokio_postgres::Error> for ProfilerError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProfilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProfilerError::InvalidConfig("slow_query_ms must be positive".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: slow_query_ms must be positive"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: ProfilerError = io.into();
        assert!(matches!(err, ProfilerError::Io(_)));
    }
}
