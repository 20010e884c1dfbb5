use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

/// Failures surfaced by the descriptor, the key store, spilling and merging.
///
/// Nothing is retried internally. After an `Io` or `CorruptRun` failure raised
/// by a flush or a merge the engine is only safe to drop.
#[derive(Debug, Error)]
pub enum UniqueError {
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("spill file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("record sink rejected a row: {0}")]
    Sink(#[source] io::Error),

    #[error("descriptor setup failed: {0}")]
    Setup(String),

    #[error("key buffer holds {actual} bytes but the descriptor expects {expected}")]
    KeyLength { expected: usize, actual: usize },

    #[error("spill run at offset {offset} ends in the middle of a record")]
    CorruptRun { offset: u64 },

    #[error("walk stopped by the action")]
    WalkAborted,
}

pub type Result<T> = std::result::Result<T, UniqueError>;
