use rusqlite::ErrorCode;
use thiserror::Error;

/// Main error type for depgraph
#[derive(Error, Debug)]
pub enum DepgraphError {
    /// A mandatory identity field (token, POS, type, scope) was missing or blank
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A batch item could not be split into token/POS[/NER]
    #[error("Malformed input at item {index} ({item:?}): {reason}")]
    MalformedInput {
        index: usize,
        item: String,
        reason: String,
    },

    /// Transaction or backend failure (busy, timed out, task lost)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store handle was terminated
    #[error("Store is closed")]
    StoreClosed,

    /// Another writer created the same natural key first.
    /// Resolved internally by re-reading the node; never returned to callers of the builder.
    #[error("Duplicate node creation detected for {0}")]
    DuplicateRaceDetected(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A store task panicked; not retried
    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

impl DepgraphError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DepgraphError::StoreUnavailable(_) => true,
            DepgraphError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted
            ),
            _ => false,
        }
    }
}

/// True when a statement failed on a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Convenient Result type using DepgraphError
pub type Result<T> = std::result::Result<T, DepgraphError>;
