//! Executable lookup for extension-less paths on Windows

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::env::search_path;
use crate::platform::Platform;

/// Extensions tried when the child environment has no `PATHEXT`
pub const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// Resolve `program` against the child's PATH and PATHEXT when the command
/// interpreter would otherwise need them to find it
///
/// Returns the program unchanged on POSIX platforms, when it already has an
/// extension, or when nothing matches.
pub fn resolve_program(
    program: &str,
    env: &HashMap<String, String>,
    platform: &Platform,
    cwd: Option<&Path>,
) -> String {
    if !platform.uses_command_interpreter() || Path::new(program).extension().is_some() {
        return program.to_string();
    }

    let Some(cwd) = cwd
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
    else {
        return program.to_string();
    };
    let paths = search_path(env, platform);
    let extensions = path_extensions(env);

    match lookup(program, &paths, &extensions, platform, &cwd) {
        Some(found) => {
            let found = found.to_string_lossy().into_owned();
            debug!(program = %program, resolved = %found, "Resolved executable via PATHEXT");
            found
        }
        None => program.to_string(),
    }
}

/// Extensions listed in the environment's `PATHEXT`, matched case-insensitively
pub fn path_extensions(env: &HashMap<String, String>) -> Vec<String> {
    let value = env
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("PATHEXT"))
        .map(|(_, value)| value.as_str())
        .unwrap_or(DEFAULT_PATHEXT);
    value
        .split(';')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect()
}

/// First `<dir>/<program><ext>` that exists, directories outermost
fn lookup(
    program: &str,
    paths: &str,
    extensions: &[String],
    platform: &Platform,
    cwd: &Path,
) -> Option<PathBuf> {
    paths
        .split(platform.path_separator)
        .filter(|dir| !dir.is_empty())
        .find_map(|dir| {
            extensions.iter().find_map(|ext| {
                which::which_in(format!("{}{}", program, ext), Some(dir), cwd).ok()
            })
        })
}
