//! Child environment resolution
//!
//! Merges the inherited environment with caller overrides, folds PATH-like
//! keys together on platforms where variable names ignore case, and adds
//! the package-local executable directory when one is configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ExecConfig, LocalSearch};
use crate::error::Result;
use crate::platform::Platform;

/// Variable whose presence means we run inside an embedding runtime
pub const EMBEDDED_RUNTIME_VAR: &str = "ELECTRON_RUN_AS_NODE";

/// Entries forced into the child environment when [`EMBEDDED_RUNTIME_VAR`] is set
pub const EMBEDDED_RUNTIME_FLAGS: &[(&str, &str)] = &[
    ("ELECTRON_RUN_AS_NODE", "1"),
    ("ELECTRON_NO_ATTACH_CONSOLE", "1"),
];

/// Produces the complete environment for a child process
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    async fn resolve(&self, config: &ExecConfig) -> Result<HashMap<String, String>>;
}

/// Provider backed by the environment of the current process
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    platform: Platform,
}

impl ProcessEnvironment {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Resolve against an explicit base environment instead of the ambient one
    pub fn resolve_from(
        &self,
        base: HashMap<String, String>,
        config: &ExecConfig,
    ) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if base.contains_key(EMBEDDED_RUNTIME_VAR) {
            for (key, value) in EMBEDDED_RUNTIME_FLAGS {
                overrides.insert(key.to_string(), value.to_string());
            }
        }
        overrides.extend(config.env.clone());

        let mut env = merge_env(base, overrides, &self.platform);
        if let Some(local) = &config.local {
            apply_local_search(&mut env, local, &self.platform);
        }
        env
    }
}

impl Default for ProcessEnvironment {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

#[async_trait]
impl EnvironmentProvider for ProcessEnvironment {
    async fn resolve(&self, config: &ExecConfig) -> Result<HashMap<String, String>> {
        let base: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Ok(self.resolve_from(base, config))
    }
}

/// Whether `key` names the executable search path
pub fn is_path_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("PATH")
}

/// Concatenate two PATH values, trimming segments, dropping empty ones and
/// keeping only the first occurrence of each
pub fn merge_path(first: &str, second: &str, separator: char) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for segment in first.split(separator).chain(second.split(separator)) {
        let segment = segment.trim();
        if !segment.is_empty() && !seen.contains(&segment) {
            seen.push(segment);
        }
    }
    seen.join(&separator.to_string())
}

/// Merge `overrides` on top of `base`
///
/// Case-sensitive platforms: plain replacement by exact key. Case-insensitive
/// platforms: all PATH-like keys collapse into one (named after the first
/// one seen, base first) with their values merged by [`merge_path`]; other
/// keys replace a base key equal ignoring case and keep the base spelling.
pub fn merge_env(
    base: HashMap<String, String>,
    overrides: HashMap<String, String>,
    platform: &Platform,
) -> HashMap<String, String> {
    if !platform.case_insensitive_env {
        let mut merged = base;
        merged.extend(overrides);
        return merged;
    }

    let mut merged: HashMap<String, String> = HashMap::new();
    let mut path: Option<(String, String)> = None;
    let mut fold_path = |key: String, value: String| match path.as_mut() {
        Some((_, existing)) => *existing = merge_path(existing, &value, platform.path_separator),
        None => path = Some((key, merge_path(&value, "", platform.path_separator))),
    };

    // Deterministic order for PATH folding and for the key name that wins
    let mut base: Vec<(String, String)> = base.into_iter().collect();
    base.sort();
    let mut overrides: Vec<(String, String)> = overrides.into_iter().collect();
    overrides.sort();

    for (key, value) in base {
        if is_path_key(&key) {
            fold_path(key, value);
        } else {
            merged.insert(key, value);
        }
    }
    for (key, value) in overrides {
        if is_path_key(&key) {
            fold_path(key, value);
            continue;
        }
        let existing = merged
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&key))
            .cloned();
        merged.insert(existing.unwrap_or(key), value);
    }

    if let Some((key, value)) = path {
        merged.insert(key, value);
    }
    merged
}

/// Find the package-local executable directory for `local`
///
/// Walks from `local.directory` up to the filesystem root and returns the
/// first `<ancestor>/<bin_dir>` that is a directory.
pub fn find_local_bin(local: &LocalSearch) -> Option<PathBuf> {
    local
        .directory
        .ancestors()
        .map(|dir| dir.join(&local.bin_dir))
        .find(|candidate| candidate.is_dir())
}

/// Add the local executable directory to the PATH entry of `env`
pub fn apply_local_search(env: &mut HashMap<String, String>, local: &LocalSearch, platform: &Platform) {
    let Some(bin) = find_local_bin(local) else {
        debug!(
            directory = %local.directory.display(),
            bin_dir = %local.bin_dir.display(),
            "No local executable directory found"
        );
        return;
    };
    let bin = path_to_string(&bin);

    let key = env
        .keys()
        .find(|k| {
            if platform.case_insensitive_env {
                is_path_key(k)
            } else {
                k.as_str() == "PATH"
            }
        })
        .cloned()
        .unwrap_or_else(|| "PATH".to_string());
    let current = env.get(&key).cloned().unwrap_or_default();
    let value = if local.prepend {
        merge_path(&bin, &current, platform.path_separator)
    } else {
        merge_path(&current, &bin, platform.path_separator)
    };

    debug!(bin = %bin, prepend = local.prepend, "Added local executable directory to PATH");
    env.insert(key, value);
}

/// All PATH entries of a resolved environment
pub fn search_path(env: &HashMap<String, String>, platform: &Platform) -> String {
    let mut merged = String::new();
    let mut keys: Vec<&String> = env
        .keys()
        .filter(|k| {
            if platform.case_insensitive_env {
                is_path_key(k)
            } else {
                k.as_str() == "PATH"
            }
        })
        .collect();
    keys.sort();
    for key in keys {
        merged = merge_path(&merged, &env[key], platform.path_separator);
    }
    merged
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
