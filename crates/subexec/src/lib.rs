//! # subexec
//!
//! **Purpose**: Run an external program once and turn its output into a
//! single outcome
//!
//! Spawns a child process, feeds it optional stdin, captures stdout and
//! stderr, enforces an optional timeout and lets the caller kill it at any
//! time. Whatever happens first (exit, spawn error, timeout, kill) settles
//! the outcome exactly once.
//!
//! ## Features
//!
//! - **Stream selection**: Resolve with stdout, stderr, or both plus the exit code
//! - **Environment merging**: Overrides on top of the inherited environment,
//!   with PATH-like keys joined rather than replaced
//! - **Local bin search**: Put the nearest `node_modules/.bin` on PATH
//! - **Windows shimming**: Programs run through `cmd.exe /s /c` so batch
//!   files resolve, with "not recognized" turned into `ENOENT`
//! - **Kill handle**: Kill before or after spawn, latched until the process exists
//! - **Raw output**: Optionally resolve with the undecoded bytes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use subexec::{ExecOptions, StreamSelector};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ExecOptions::new()
//!     .stream(StreamSelector::Both)
//!     .timeout_ms(5_000)
//!     .env("RUST_LOG", "debug");
//!
//! let outcome = subexec::exec("cargo", &["--version"], options).await?;
//! if let Some(output) = outcome.pair() {
//!     println!("{} (exit {})", output.stdout, output.exit_code);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod kill;
pub mod launcher;
pub mod normalize;
pub mod outcome;
pub mod platform;
pub mod resolve;

pub use config::{
    ExecConfig, ExecOptions, ExecRequest, LocalBag, LocalSearch, OptionBag, StreamSelector,
};
pub use env::{EnvironmentProvider, ProcessEnvironment};
pub use error::{ErrorKind, ExecError, KillReason, Result};
pub use kill::{KillSignal, ProcessHandle, ProcessState};
pub use launcher::{Launcher, PendingOutcome};
pub use outcome::{ExecOutput, Outcome, RawOutput};
pub use platform::{Platform, ShellConvention};

/// Start `program` with a default [`Launcher`]
///
/// See [`Launcher::execute`].
pub fn execute<S: AsRef<str>>(
    program: &str,
    args: &[S],
    options: ExecOptions,
) -> Result<(ProcessHandle, PendingOutcome)> {
    Launcher::new().execute(program, args, options)
}

/// Run `program` to completion with a default [`Launcher`]
pub async fn exec<S: AsRef<str>>(program: &str, args: &[S], options: ExecOptions) -> Result<Outcome> {
    Launcher::new().exec(program, args, options).await
}

/// Run `script` with the current executable as interpreter
pub fn execute_via_interpreter<S: AsRef<str>>(
    script: &str,
    args: &[S],
    options: ExecOptions,
) -> Result<(ProcessHandle, PendingOutcome)> {
    Launcher::new().execute_via_interpreter(script, args, options)
}
