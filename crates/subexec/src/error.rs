//! Error types for process execution

use std::fmt;
use std::io;
use thiserror::Error;

/// Error code reported by [`ExecError::NotFound`]
pub const ENOENT_CODE: &str = "ENOENT";

/// Coarse classification of an [`ExecError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    SpawnFailure,
    NotFound,
    StderrProduced,
    NonZeroExit,
    EmptyStderr,
    Killed,
    Detached,
}

/// Why a process ended up killed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KillReason {
    /// The configured timeout elapsed
    Timeout,
    /// `ProcessHandle::kill` was called
    Requested,
    /// The process was terminated by a signal nobody here sent
    Signaled,
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillReason::Timeout => f.write_str("Process execution timed out"),
            KillReason::Requested | KillReason::Signaled => f.write_str("Process was killed"),
        }
    }
}

/// Process execution errors
#[derive(Debug, Error)]
pub enum ExecError {
    /// Caller options failed validation
    #[error("Invalid argument `{field}`: {message}")]
    InvalidArgument { field: &'static str, message: String },

    /// The OS refused to create the process
    #[error("Failed to spawn process `{program}`: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The command interpreter could not find the executable
    #[error("{syscall} ENOENT")]
    NotFound {
        path: String,
        args: Vec<String>,
        syscall: String,
    },

    /// The process wrote to stderr while stdout was expected
    #[error("{0}")]
    StderrProduced(String),

    /// The process exited with a non-zero code
    #[error("Process exited with non-zero code: {code}")]
    NonZeroExit { code: i32 },

    /// Stderr was expected but the process wrote nothing
    #[error("Process exited with no output, code: {code}")]
    EmptyStderr { code: i32 },

    /// Timeout or explicit kill
    #[error("{reason}")]
    Killed { reason: KillReason },

    /// The launcher task went away without settling an outcome
    #[error("Process launcher terminated before producing an outcome")]
    Detached,
}

impl ExecError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ExecError::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(path: &str, args: &[String]) -> Self {
        ExecError::NotFound {
            path: path.to_string(),
            args: args.to_vec(),
            syscall: format!("spawn {}", path),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ExecError::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            ExecError::NotFound { .. } => ErrorKind::NotFound,
            ExecError::StderrProduced(_) => ErrorKind::StderrProduced,
            ExecError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            ExecError::EmptyStderr { .. } => ErrorKind::EmptyStderr,
            ExecError::Killed { .. } => ErrorKind::Killed,
            ExecError::Detached => ErrorKind::Detached,
        }
    }

    /// `ENOENT` for synthesized not-found errors and for spawn failures the
    /// OS reported as missing files
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ExecError::NotFound { .. } => Some(ENOENT_CODE),
            ExecError::SpawnFailure { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                Some(ENOENT_CODE)
            }
            _ => None,
        }
    }

    /// OS error number of a spawn failure
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ExecError::SpawnFailure { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for timeouts and explicit kills
    pub fn is_killed(&self) -> bool {
        matches!(self, ExecError::Killed { .. })
    }
}

/// Result type for process execution
pub type Result<T> = std::result::Result<T, ExecError>;
