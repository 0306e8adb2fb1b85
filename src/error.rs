//! Server error types.

use std::io;
use thiserror::Error;

/// Errors that stop the server.
///
/// Per-connection failures never surface here; they only close the
/// connection that hit them.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to install termination handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
