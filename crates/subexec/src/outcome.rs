//! Captured output and the decision table applied when a process closes

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::config::{ExecConfig, StreamSelector};
use crate::error::{ExecError, KillReason, Result};
use crate::normalize::{is_not_recognized, OriginalCommand};

/// Both streams plus the exit code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Both streams as read from the child, plus the exit code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// Successful result of an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Trimmed text of the selected stream
    Value(String),
    /// Returned for [`StreamSelector::Both`]
    Pair(ExecOutput),
    /// Untrimmed bytes of the selected stream, for raw output
    Bytes(Vec<u8>),
    /// [`StreamSelector::Both`] with raw output
    RawPair(RawOutput),
}

impl Outcome {
    /// The text of a `Value` outcome
    pub fn value(&self) -> Option<&str> {
        match self {
            Outcome::Value(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            Outcome::Value(text) => Some(text),
            _ => None,
        }
    }

    pub fn pair(&self) -> Option<&ExecOutput> {
        match self {
            Outcome::Pair(output) => Some(output),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Outcome::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn raw_pair(&self) -> Option<&RawOutput> {
        match self {
            Outcome::RawPair(output) => Some(output),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(text) => f.write_str(text),
            Outcome::Pair(output) => write!(
                f,
                "exit code {}\n--- stdout ---\n{}\n--- stderr ---\n{}",
                output.exit_code, output.stdout, output.stderr
            ),
            Outcome::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Outcome::RawPair(output) => write!(
                f,
                "exit code {}\n--- stdout ---\n{}\n--- stderr ---\n{}",
                output.exit_code,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        }
    }
}

/// Raw bytes read from the child, append-only until finalized
#[derive(Debug, Default)]
pub struct CapturedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    pub fn push_stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }

    /// Decode and trim both streams, keeping the bytes when `keep_raw` is set
    pub fn finalize(self, keep_raw: bool) -> FinalOutput {
        let stdout = String::from_utf8_lossy(&self.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        FinalOutput {
            stdout,
            stderr,
            raw: keep_raw.then(|| RawStreams {
                stdout: self.stdout,
                stderr: self.stderr,
            }),
        }
    }
}

/// Decoded, trimmed output
///
/// The decision table always looks at the decoded text; `raw` only changes
/// what a successful outcome carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FinalOutput {
    pub stdout: String,
    pub stderr: String,
    pub raw: Option<RawStreams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawStreams {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exit code, or `None` when terminated by a signal
    Exited(Option<i32>),
    /// We killed it
    Killed(KillReason),
}

/// Apply the decision table to a closed process
pub fn decide(
    output: FinalOutput,
    termination: Termination,
    config: &ExecConfig,
    substituted: Option<&OriginalCommand>,
) -> Result<Outcome> {
    if let Some(original) = substituted {
        if is_not_recognized(&output.stderr, &original.program) {
            return Err(ExecError::not_found(&original.program, &original.args));
        }
    }

    let code = match termination {
        Termination::Killed(reason) => return Err(ExecError::Killed { reason }),
        Termination::Exited(None) => {
            return Err(ExecError::Killed {
                reason: KillReason::Signaled,
            })
        }
        Termination::Exited(Some(code)) => code,
    };

    let FinalOutput {
        stdout,
        stderr,
        raw,
    } = output;
    match config.stream {
        StreamSelector::Stdout => {
            if !stderr.is_empty() && config.throw_on_stderr {
                Err(ExecError::StderrProduced(stderr))
            } else if code != 0 && !config.ignore_exit_code {
                warn!(code, stdout = %stdout, "Process exited with non-zero code");
                Err(ExecError::NonZeroExit { code })
            } else {
                Ok(match raw {
                    Some(raw) => Outcome::Bytes(raw.stdout),
                    None => Outcome::Value(stdout),
                })
            }
        }
        StreamSelector::Stderr => {
            if stderr.is_empty() && !config.allow_empty_stderr {
                Err(ExecError::EmptyStderr { code })
            } else {
                Ok(match raw {
                    Some(raw) => Outcome::Bytes(raw.stderr),
                    None => Outcome::Value(stderr),
                })
            }
        }
        StreamSelector::Both => Ok(match raw {
            Some(raw) => Outcome::RawPair(RawOutput {
                stdout: raw.stdout,
                stderr: raw.stderr,
                exit_code: code,
            }),
            None => Outcome::Pair(ExecOutput {
                stdout,
                stderr,
                exit_code: code,
            }),
        }),
    }
}
