// CLI error types

use subexec::{ErrorKind, ExecError, KillReason};
use thiserror::Error;

/// Exit status for a timed out child, as in coreutils `timeout`
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit status when the program could not be found
pub const EXIT_NOT_FOUND: i32 = 127;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration error in {path}: {message}")]
    ConfigFile { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit status to report for this error
    pub fn exit_code(&self) -> i32 {
        let CliError::Exec(err) = self else {
            return 1;
        };
        match err {
            ExecError::NonZeroExit { code } if *code != 0 => *code,
            ExecError::Killed {
                reason: KillReason::Timeout,
            } => EXIT_TIMEOUT,
            _ if err.code().is_some() => EXIT_NOT_FOUND,
            _ => 1,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CliError::Exec(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::SpawnFailure if err.code().is_some() => format!(
                    "{}\n\nCheck that the program is installed and on PATH, or pass --local.",
                    err
                ),
                ErrorKind::StderrProduced => format!(
                    "{}\n\nThe program wrote to stderr. Pass --allow-stderr to ignore it.",
                    err
                ),
                ErrorKind::InvalidArgument => {
                    format!("{}\n\nRun 'subexec help' for usage information.", err)
                }
                _ => err.to_string(),
            },
            CliError::Config(e) => format!(
                "Configuration error: {}\n\nCheck your SUBEXEC_* environment variables.",
                e
            ),
            CliError::ConfigFile { .. } => format!("{}\n\nCheck your config file.", self),
            CliError::Io(e) => format!("IO error: {}", e),
            CliError::Output(e) => format!("Failed to write output: {}", e),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::from(ExecError::NonZeroExit { code: 2 }).exit_code(), 2);
        assert_eq!(
            CliError::from(ExecError::Killed {
                reason: KillReason::Timeout
            })
            .exit_code(),
            EXIT_TIMEOUT
        );
        assert_eq!(
            CliError::from(ExecError::Killed {
                reason: KillReason::Requested
            })
            .exit_code(),
            1
        );
        assert_eq!(
            CliError::from(ExecError::NotFound {
                path: "nope".into(),
                args: vec![],
                syscall: "spawn nope".into(),
            })
            .exit_code(),
            EXIT_NOT_FOUND
        );
        assert_eq!(
            CliError::from(ExecError::SpawnFailure {
                program: "nope".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
            .exit_code(),
            EXIT_NOT_FOUND
        );
        assert_eq!(
            CliError::from(std::io::Error::from(std::io::ErrorKind::NotFound)).exit_code(),
            1
        );
    }

    #[test]
    fn test_stderr_message_suggests_flag() {
        let err = CliError::from(ExecError::StderrProduced("boom".into()));
        let msg = err.user_message();
        assert!(msg.starts_with("boom"));
        assert!(msg.contains("--allow-stderr"));
    }
}
