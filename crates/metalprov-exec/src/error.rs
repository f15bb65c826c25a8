//! Error types for metalprov-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running an external command
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Process could not be started
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error while feeding or draining the process
    #[error("I/O error: {0}")]
    IoError(String),

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Operator interrupted the command
    #[error("command interrupted")]
    Interrupted,
}

impl ExecError {
    /// Whether the whole program should stop rather than treat this as a failed attempt
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Interrupted)
    }
}
