use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an attempt ended in failure. Carried by [`crate::InstallOutcome::Failure`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstallError {
    #[error("root access unavailable: {reason}")]
    PrivilegeUnavailable { reason: String },
    #[error("{operation} failed: {detail}")]
    StagingFailure {
        operation: &'static str,
        detail: String,
    },
    #[error("{detail}")]
    OperationFailure {
        operation: &'static str,
        detail: String,
    },
    #[error("all {attempts} install strategies failed; last error: {detail}")]
    ChainExhausted { attempts: usize, detail: String },
    #[error("{message}")]
    ShellFault { message: String },
}

impl InstallError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrivilegeUnavailable { .. } => "privilege-unavailable",
            Self::StagingFailure { .. } => "staging-failure",
            Self::OperationFailure { .. } => "operation-failure",
            Self::ChainExhausted { .. } => "chain-exhausted",
            Self::ShellFault { .. } => "shell-fault",
        }
    }
}

/// Persisting a report failed. Logged, never surfaced as the attempt's outcome.
#[derive(Debug, Error)]
pub enum DiagnosticWriteFailure {
    #[error("failed to create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write diagnostic report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
