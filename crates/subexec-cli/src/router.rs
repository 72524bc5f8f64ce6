// Command-line parsing and dispatch

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use subexec::{
    Launcher, LocalBag, OptionBag, Outcome, PendingOutcome, ProcessHandle, StreamSelector,
};
use tracing::{info, warn};

use crate::error::{CliError, CliResult};
use crate::settings::SettingsLoader;

/// subexec - run a program once and report its outcome
#[derive(Parser, Debug)]
#[command(name = "subexec")]
#[command(bin_name = "subexec")]
#[command(about = "Run a program once and report its output, exit code, timeout or kill")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file with execution defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a program
    Run {
        #[command(flatten)]
        options: ExecArgs,

        /// Program to run
        #[arg(value_name = "PROGRAM")]
        program: String,

        /// Arguments passed to the program
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a script with an interpreter (this executable by default)
    Script {
        #[command(flatten)]
        options: ExecArgs,

        /// Interpreter to run the script with
        #[arg(long, value_name = "PATH")]
        interpreter: Option<PathBuf>,

        /// Script path
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Arguments passed to the script
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Execution flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Stream to resolve with: stdout, stderr or both
    #[arg(long)]
    pub stream: Option<StreamSelector>,

    /// Kill the program after this many milliseconds (0 disables)
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Extra environment variable, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Text written to the program's stdin
    #[arg(long, value_name = "TEXT")]
    pub stdin: Option<String>,

    /// Add the nearest node_modules/.bin above DIR to PATH
    #[arg(long, value_name = "DIR")]
    pub local: Option<PathBuf>,

    /// Put the local bin directory first on PATH
    #[arg(long, requires = "local")]
    pub prepend: bool,

    /// Do not fail when the program writes to stderr
    #[arg(long)]
    pub allow_stderr: bool,

    /// Accept empty stderr when resolving with stderr
    #[arg(long)]
    pub allow_empty_stderr: bool,

    /// Do not fail on a non-zero exit code
    #[arg(long)]
    pub ignore_exit_code: bool,

    /// Skip command interpreter wrapping on Windows
    #[arg(long)]
    pub shell: bool,

    /// Let the program use this terminal's stdio
    #[arg(long)]
    pub inherit_stdio: bool,

    /// Working directory for the program
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Print the captured bytes as-is, without decoding or trimming
    #[arg(long)]
    pub raw: bool,
}

impl ExecArgs {
    /// Flags that were actually given, as an option bag
    pub fn to_bag(&self) -> OptionBag {
        OptionBag {
            stream: self.stream.map(|stream| stream.to_string()),
            timeout: self.timeout.map(|ms| ms as f64),
            env: (!self.env.is_empty()).then(|| self.env.iter().cloned().collect()),
            stdin: self.stdin.clone(),
            throw_on_stderr: self.allow_stderr.then_some(false),
            ignore_exit_code: self.ignore_exit_code.then_some(true),
            allow_empty_stderr: self.allow_empty_stderr.then_some(true),
            shell: self.shell.then_some(true),
            cwd: self.cwd.clone(),
            inherit_stdio: self.inherit_stdio.then_some(true),
            raw_output: self.raw.then_some(true),
            local: self.local.as_ref().map(|directory| LocalBag {
                directory: Some(directory.clone()),
                prepend: Some(self.prepend),
                bin_dir: None,
            }),
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

/// Command router
pub struct CommandRouter;

impl CommandRouter {
    /// Run the parsed command to its outcome
    pub async fn execute(cli: &Cli) -> CliResult<Outcome> {
        let loader = match &cli.config {
            Some(path) => SettingsLoader::with_path(path),
            None => SettingsLoader::new(),
        };

        let (handle, pending) = match &cli.command {
            Commands::Run {
                options,
                program,
                args,
            } => {
                let exec_options = loader.load(options.to_bag())?;
                Launcher::new().execute(program, args, exec_options)?
            }
            Commands::Script {
                options,
                interpreter,
                script,
                args,
            } => {
                let exec_options = loader.load(options.to_bag())?;
                let mut launcher = Launcher::new();
                if let Some(interpreter) = interpreter {
                    launcher = launcher.with_interpreter(interpreter);
                }
                launcher.execute_via_interpreter(script, args, exec_options)?
            }
        };

        settle(handle, pending).await.map_err(CliError::from)
    }
}

/// Wait for the outcome, killing the child on Ctrl-C
async fn settle(handle: ProcessHandle, mut pending: PendingOutcome) -> subexec::Result<Outcome> {
    tokio::select! {
        outcome = &mut pending => outcome,
        interrupted = tokio::signal::ctrl_c() => {
            match interrupted {
                Ok(()) => {
                    info!(pid = ?handle.pid(), "Interrupted, killing child");
                    handle.terminate();
                }
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            }
            pending.await
        }
    }
}
