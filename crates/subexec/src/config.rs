//! Execution options and their validation
//!
//! [`ExecOptions`] is the caller-facing builder where everything is
//! optional. [`ExecOptions::validate`] turns it into an [`ExecConfig`] with
//! every default applied; nothing downstream of the validator deals with
//! missing values.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ExecError, Result};

/// Default package-local executable directory looked up by [`LocalSearch`]
pub const DEFAULT_LOCAL_BIN_DIR: &str = "node_modules/.bin";

/// Which captured stream(s) make up the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamSelector {
    #[default]
    Stdout,
    Stderr,
    Both,
}

impl FromStr for StreamSelector {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdout" => Ok(StreamSelector::Stdout),
            "stderr" => Ok(StreamSelector::Stderr),
            "both" => Ok(StreamSelector::Both),
            other => Err(ExecError::invalid(
                "stream",
                format!("expected stdout|stderr|both, got `{}`", other),
            )),
        }
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamSelector::Stdout => "stdout",
            StreamSelector::Stderr => "stderr",
            StreamSelector::Both => "both",
        })
    }
}

/// Package-local executable directory added to PATH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSearch {
    /// Directory the upward search starts from
    pub directory: PathBuf,
    /// Put the local directory before the inherited PATH
    pub prepend: bool,
    /// Relative directory holding executables
    pub bin_dir: PathBuf,
}

impl LocalSearch {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prepend: false,
            bin_dir: PathBuf::from(DEFAULT_LOCAL_BIN_DIR),
        }
    }

    pub fn prepend(mut self, prepend: bool) -> Self {
        self.prepend = prepend;
        self
    }

    pub fn bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = bin_dir.into();
        self
    }
}

/// Caller-supplied execution options, every field optional
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub stream: Option<StreamSelector>,
    pub timeout: Option<Duration>,
    pub env: Option<HashMap<String, String>>,
    pub stdin: Option<Vec<u8>>,
    pub throw_on_stderr: Option<bool>,
    pub ignore_exit_code: Option<bool>,
    pub allow_empty_stderr: Option<bool>,
    pub local: Option<LocalSearch>,
    pub use_shell: Option<bool>,
    pub working_dir: Option<PathBuf>,
    pub inherit_stdio: Option<bool>,
    pub raw_output: Option<bool>,
}

/// Fully resolved execution configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub stream: StreamSelector,
    /// `None` means no timeout
    pub timeout: Option<Duration>,
    /// Overrides merged on top of the inherited environment
    pub env: HashMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub throw_on_stderr: bool,
    pub ignore_exit_code: bool,
    pub allow_empty_stderr: bool,
    pub local: Option<LocalSearch>,
    pub use_shell: bool,
    pub working_dir: Option<PathBuf>,
    pub inherit_stdio: bool,
    /// Resolve with the captured bytes, neither decoded nor trimmed
    pub raw_output: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            stream: StreamSelector::Stdout,
            timeout: None,
            env: HashMap::new(),
            stdin: None,
            throw_on_stderr: true,
            ignore_exit_code: false,
            allow_empty_stderr: false,
            local: None,
            use_shell: false,
            working_dir: None,
            inherit_stdio: false,
            raw_output: false,
        }
    }
}

/// A validated request, ready for the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub config: ExecConfig,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, stream: StreamSelector) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    /// Add one environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in vars {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Bytes written to the child's stdin before it is closed
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn throw_on_stderr(mut self, throw: bool) -> Self {
        self.throw_on_stderr = Some(throw);
        self
    }

    pub fn ignore_exit_code(mut self, ignore: bool) -> Self {
        self.ignore_exit_code = Some(ignore);
        self
    }

    pub fn allow_empty_stderr(mut self, allow: bool) -> Self {
        self.allow_empty_stderr = Some(allow);
        self
    }

    pub fn local(mut self, local: LocalSearch) -> Self {
        self.local = Some(local);
        self
    }

    pub fn use_shell(mut self, shell: bool) -> Self {
        self.use_shell = Some(shell);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = Some(inherit);
        self
    }

    /// Resolve with [`Outcome::Bytes`](crate::Outcome::Bytes) or
    /// [`Outcome::RawPair`](crate::Outcome::RawPair)
    pub fn raw_output(mut self, raw: bool) -> Self {
        self.raw_output = Some(raw);
        self
    }

    /// Validate the program and arguments and resolve every default
    pub fn validate<S: AsRef<str>>(self, program: &str, args: &[S]) -> Result<ExecRequest> {
        if program.is_empty() {
            return Err(ExecError::invalid("program", "must be a non-empty string"));
        }
        if let Some(local) = &self.local {
            if local.directory.as_os_str().is_empty() {
                return Err(ExecError::invalid(
                    "local.directory",
                    "must be a non-empty path",
                ));
            }
        }

        let defaults = ExecConfig::default();
        let config = ExecConfig {
            stream: self.stream.unwrap_or(defaults.stream),
            timeout: self.timeout.filter(|t| !t.is_zero()),
            env: self.env.unwrap_or_default(),
            stdin: self.stdin,
            throw_on_stderr: self.throw_on_stderr.unwrap_or(defaults.throw_on_stderr),
            ignore_exit_code: self.ignore_exit_code.unwrap_or(defaults.ignore_exit_code),
            allow_empty_stderr: self
                .allow_empty_stderr
                .unwrap_or(defaults.allow_empty_stderr),
            local: self.local,
            use_shell: self.use_shell.unwrap_or(defaults.use_shell),
            working_dir: self.working_dir,
            inherit_stdio: self.inherit_stdio.unwrap_or(defaults.inherit_stdio),
            raw_output: self.raw_output.unwrap_or(defaults.raw_output),
        };

        Ok(ExecRequest {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            config,
        })
    }

    /// Build options from a loosely typed option bag
    ///
    /// The bag is decoded as an [`OptionBag`]; unknown keys and values of
    /// the wrong shape fail with [`ExecError::InvalidArgument`].
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let bag: OptionBag = serde_json::from_value(value.clone())
            .map_err(|e| ExecError::invalid("options", e.to_string()))?;
        bag.try_into()
    }
}

/// Serialized form of [`ExecOptions`], as found in JSON or TOML documents
///
/// Keys are camelCase with snake_case aliases. `timeout` is in
/// milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionBag {
    pub stream: Option<String>,
    pub timeout: Option<f64>,
    pub env: Option<HashMap<String, String>>,
    pub stdin: Option<String>,
    #[serde(alias = "throw_on_stderr")]
    pub throw_on_stderr: Option<bool>,
    #[serde(alias = "ignore_exit_code")]
    pub ignore_exit_code: Option<bool>,
    #[serde(alias = "allow_empty_stderr")]
    pub allow_empty_stderr: Option<bool>,
    #[serde(alias = "useShell", alias = "use_shell")]
    pub shell: Option<bool>,
    #[serde(alias = "workingDir", alias = "working_dir")]
    pub cwd: Option<PathBuf>,
    #[serde(alias = "inherit_stdio")]
    pub inherit_stdio: Option<bool>,
    #[serde(alias = "raw_output")]
    pub raw_output: Option<bool>,
    pub local: Option<LocalBag>,
}

/// Serialized form of [`LocalSearch`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalBag {
    pub directory: Option<PathBuf>,
    pub prepend: Option<bool>,
    #[serde(alias = "bin_dir")]
    pub bin_dir: Option<PathBuf>,
}

impl TryFrom<OptionBag> for ExecOptions {
    type Error = ExecError;

    fn try_from(bag: OptionBag) -> Result<Self> {
        let stream = bag.stream.as_deref().map(str::parse::<StreamSelector>).transpose()?;
        let timeout = match bag.timeout {
            Some(ms) if !ms.is_finite() || ms < 0.0 => {
                return Err(ExecError::invalid("timeout", "must be a non-negative number"))
            }
            Some(ms) => Some(Duration::from_millis(ms.round() as u64)),
            None => None,
        };
        let local = bag.local.map(LocalSearch::try_from).transpose()?;

        Ok(ExecOptions {
            stream,
            timeout,
            env: bag.env,
            stdin: bag.stdin.map(String::into_bytes),
            throw_on_stderr: bag.throw_on_stderr,
            ignore_exit_code: bag.ignore_exit_code,
            allow_empty_stderr: bag.allow_empty_stderr,
            local,
            use_shell: bag.shell,
            working_dir: bag.cwd,
            inherit_stdio: bag.inherit_stdio,
            raw_output: bag.raw_output,
        })
    }
}

impl TryFrom<LocalBag> for LocalSearch {
    type Error = ExecError;

    fn try_from(bag: LocalBag) -> Result<Self> {
        let directory = bag
            .directory
            .ok_or_else(|| ExecError::invalid("local.directory", "must be a string"))?;
        let mut local = LocalSearch::new(directory).prepend(bag.prepend.unwrap_or(false));
        if let Some(bin_dir) = bag.bin_dir {
            local.bin_dir = bin_dir;
        }
        Ok(local)
    }
}
