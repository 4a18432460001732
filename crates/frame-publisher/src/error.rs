use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Convenient result type for the frame publisher crate.
pub type Result<T> = StdResult<T, Error>;

/// Errors surfaced around the publishing hot path.
///
/// Submitting and publishing frames never fails; these cover dispatch,
/// scheduled retries and configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The dispatcher or publisher has been closed and accepts no more work.
    #[error("closed")]
    Closed,

    /// Every scheduled attempt failed.
    #[error("{label} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Name of the retried operation.
        label: String,
        /// Number of attempts performed.
        attempts: u32,
        /// Rendered error from the final attempt.
        last: String,
    },

    /// The remaining attempts were cancelled before one succeeded.
    #[error("retry cancelled")]
    RetryCancelled,

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
