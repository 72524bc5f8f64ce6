// Layered execution defaults
//
// Precedence, lowest first: config file, SUBEXEC_* environment variables,
// command-line flags.

use std::path::PathBuf;

use config::{Config, Environment};
use subexec::{ExecOptions, OptionBag};
use tracing::debug;

use crate::error::{CliError, CliResult};

/// Prefix for environment overrides, e.g. `SUBEXEC_TIMEOUT=5000`
pub const ENV_PREFIX: &str = "SUBEXEC";

/// Separator for nested keys, e.g. `SUBEXEC_LOCAL__DIRECTORY`
pub const ENV_SEPARATOR: &str = "__";

/// Loads [`ExecOptions`] from every configuration layer
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_path: Option<PathBuf>,
    required: bool,
    env_prefix: String,
}

impl SettingsLoader {
    /// Loader using the default config file, if present
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            required: false,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Loader reading an explicit config file, which must exist
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            required: true,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Skip the config file layer
    pub fn without_file(mut self) -> Self {
        self.config_path = None;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// `<config_dir>/subexec/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("subexec").join("config.toml"))
    }

    /// Merge file and environment layers with `flags` and validate the result
    pub fn load(&self, flags: OptionBag) -> CliResult<ExecOptions> {
        let merged = layer(layer(self.file_layer()?, self.environment_layer()?), flags);
        debug!(options = ?merged, "Resolved execution defaults");
        Ok(ExecOptions::try_from(merged)?)
    }

    /// The TOML config file, keys kept exactly as written
    fn file_layer(&self) -> CliResult<OptionBag> {
        let Some(path) = &self.config_path else {
            return Ok(OptionBag::default());
        };
        let file_error = |message: String| CliError::ConfigFile {
            path: path.display().to_string(),
            message,
        };

        debug!(path = %path.display(), required = self.required, "Reading config file");
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !self.required => {
                return Ok(OptionBag::default())
            }
            Err(e) => return Err(file_error(e.to_string())),
        };
        toml::from_str(&text).map_err(|e| file_error(e.to_string()))
    }

    /// `<prefix>_*` variables
    ///
    /// Variable names reach us lowercased, so keys of the `env` table are
    /// upper-cased again: `SUBEXEC_ENV__MY_VAR` sets `MY_VAR`.
    fn environment_layer(&self) -> CliResult<OptionBag> {
        let mut bag: OptionBag = Config::builder()
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR),
            )
            .build()?
            .try_deserialize()?;
        if let Some(env) = bag.env.take() {
            bag.env = Some(
                env.into_iter()
                    .map(|(key, value)| (key.to_ascii_uppercase(), value))
                    .collect(),
            );
        }
        Ok(bag)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay `top` over `base`
///
/// `env` tables are merged entry by entry; every other option set in `top`
/// replaces the one in `base`.
pub fn layer(base: OptionBag, top: OptionBag) -> OptionBag {
    let env = match (base.env, top.env) {
        (Some(mut merged), Some(top)) => {
            merged.extend(top);
            Some(merged)
        }
        (base, top) => top.or(base),
    };
    OptionBag {
        stream: top.stream.or(base.stream),
        timeout: top.timeout.or(base.timeout),
        env,
        stdin: top.stdin.or(base.stdin),
        throw_on_stderr: top.throw_on_stderr.or(base.throw_on_stderr),
        ignore_exit_code: top.ignore_exit_code.or(base.ignore_exit_code),
        allow_empty_stderr: top.allow_empty_stderr.or(base.allow_empty_stderr),
        shell: top.shell.or(base.shell),
        cwd: top.cwd.or(base.cwd),
        inherit_stdio: top.inherit_stdio.or(base.inherit_stdio),
        raw_output: top.raw_output.or(base.raw_output),
        local: top.local.or(base.local),
    }
}
