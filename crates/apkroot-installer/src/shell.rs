use std::time::Duration;

use thiserror::Error;

/// Marker the platform package manager prints when an operation went through.
pub const SUCCESS_MARKER: &str = "Success";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Handle to a live privileged session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("privileged shell unavailable: {reason}")]
    PrivilegeUnavailable { reason: String },
    #[error("privileged session {id} is no longer alive")]
    SessionClosed { id: u64 },
    #[error("command timed out after {}s: {command}", .after.as_secs())]
    Timeout { command: String, after: Duration },
    #[error("privileged shell i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub trait PrivilegedShell {
    /// Returns the live session, starting one if needed.
    fn acquire(&self) -> Result<Session, ShellError>;

    /// Runs `command` with elevated identity. A non-zero exit code is a normal result.
    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, ShellError>;
}

impl<T: PrivilegedShell + ?Sized> PrivilegedShell for &T {
    fn acquire(&self) -> Result<Session, ShellError> {
        (**self).acquire()
    }

    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, ShellError> {
        (**self).run(session, command)
    }
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl CommandOutput {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == 0
    }

    pub fn has_success_marker(&self) -> bool {
        self.stdout.contains(SUCCESS_MARKER)
    }

    /// Most useful single line for a failure message: stderr, then stdout, then the exit code.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

/// Single-quotes `value` for a POSIX shell, escaping embedded quotes as `'\''`.
pub fn quote_arg(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
