//! Error handling for the framepub binary.

use std::{io, result};

use thiserror::Error;
use tokio::task::JoinError;

/// Convenient result type for framepub operations.
pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur while running the harness.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrapper for standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Errors surfaced by the publisher library.
    #[error("Publisher error: {0}")]
    Publisher(#[from] frame_publisher::Error),
    /// Configuration parsing or serialization errors.
    #[error("Configuration error: {0}")]
    Config(String),
    /// A harness task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(#[from] JoinError),
}

impl Error {
    /// Helper to build a configuration error from an arbitrary message.
    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::Config(msg.into())
    }
}
