//! Infrastructure errors shared by Flora services
//!
//! Request-level failures (admission, sources, generation) have their own
//! taxonomy in the service crate; this type only covers what goes wrong
//! below it: settings, the backing store and the records kept there.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Settings file unreadable as TOML or a value out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing store unreachable or a statement failed
    #[cfg(feature = "sqlx")]
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Value could not be encoded for storage
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Stored row that no longer decodes into its type
    #[error("Corrupt {table} row: {reason}")]
    CorruptRecord { table: &'static str, reason: String },
}

impl Error {
    pub fn corrupt(table: &'static str, reason: impl std::fmt::Display) -> Self {
        Error::CorruptRecord {
            table,
            reason: reason.to_string(),
        }
    }
}
