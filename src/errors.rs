use rusqlite::ErrorCode;
use thiserror::Error;

/// Error type for cloudgraph operations.
#[derive(Debug, Error)]
pub enum CloudGraphError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("writer lock not acquired within {waited_ms} ms")]
    LockTimeout { waited_ms: u64 },
    #[error("uniqueness violation: {0}")]
    UniqueViolation(String),
    #[error("cycle detected: edge {from} -> {to} is part of a cycle")]
    CycleDetected { from: String, to: String },
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, CloudGraphError>;

impl CloudGraphError {
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::ConnectionError(msg.into())
    }

    pub fn schema<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::SchemaError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::QueryError(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::InvalidInput(msg.into())
    }

    pub fn transaction<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::TransactionError(msg.into())
    }

    pub fn unique<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::UniqueViolation(msg.into())
    }

    pub fn corruption<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::DataCorruption(msg.into())
    }

    pub fn unsupported<T: Into<String>>(msg: T) -> Self {
        CloudGraphError::Unsupported(msg.into())
    }

    pub fn cycle<S: Into<String>, T: Into<String>>(from: S, to: T) -> Self {
        CloudGraphError::CycleDetected {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Classifies a rusqlite error raised by a statement.
    ///
    /// Constraint failures on a unique or primary key become
    /// [`CloudGraphError::UniqueViolation`]; busy and locked conditions become
    /// [`CloudGraphError::LockTimeout`]. Everything else is a query error.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return CloudGraphError::unique(err.to_string());
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return CloudGraphError::LockTimeout { waited_ms: 0 };
                }
                _ => {}
            }
        }
        CloudGraphError::query(err.to_string())
    }

    /// True for errors a caller may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudGraphError::LockTimeout { .. })
    }
}

/// True when a rusqlite error reports a foreign key failure.
pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
