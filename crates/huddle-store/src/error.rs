use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The entity does not exist or the caller is not allowed to see it.
    #[error("{0}")]
    NotFound(&'static str),

    /// The caller is known but lacks the role the mutation requires.
    #[error("{0}")]
    NotAuthorized(&'static str),

    #[error("User is already a member")]
    AlreadyMember,

    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
