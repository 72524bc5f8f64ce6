//! Command interpreter shimming for Windows
//!
//! Batch files and PATHEXT lookups only work through `cmd.exe`, so on the
//! command-interpreter platform every program is run as
//! `cmd.exe /s /c "<quoted program> <quoted args>"`.

use tracing::debug;

use crate::platform::Platform;

/// Interpreter used when `COMSPEC` is not set
pub const DEFAULT_COMSPEC: &str = "cmd.exe";

/// Final program and arguments handed to the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments are already quoted and must be passed through verbatim
    pub verbatim_args: bool,
    /// Set when the program was wrapped in the command interpreter
    pub substituted: Option<OriginalCommand>,
}

/// What the caller asked to run before interpreter substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl NormalizedCommand {
    fn direct(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            verbatim_args: false,
            substituted: None,
        }
    }
}

/// Whether `program` has to go through the command interpreter
pub fn should_normalize(program: &str, use_shell: bool, platform: &Platform) -> bool {
    if !platform.uses_command_interpreter() || use_shell {
        return false;
    }
    let base = program
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    base != "cmd" && base != "cmd.exe"
}

/// Wrap `item` in double quotes, escaping embedded quotes
pub fn quote(item: &str) -> String {
    format!("\"{}\"", item.replace('"', "\\\""))
}

/// Rewrite `program`/`args` for the platform
///
/// `comspec` overrides the interpreter path; [`DEFAULT_COMSPEC`] otherwise.
pub fn normalize(
    program: &str,
    args: &[String],
    use_shell: bool,
    platform: &Platform,
    comspec: Option<&str>,
) -> NormalizedCommand {
    normalize_resolved(program, program, args, use_shell, platform, comspec)
}

/// [`normalize`] for a program already resolved to `executable`
///
/// The interpreter runs `executable`, while [`NormalizedCommand::substituted`]
/// keeps `program` as the caller wrote it.
pub fn normalize_resolved(
    program: &str,
    executable: &str,
    args: &[String],
    use_shell: bool,
    platform: &Platform,
    comspec: Option<&str>,
) -> NormalizedCommand {
    if !should_normalize(program, use_shell, platform) {
        return NormalizedCommand::direct(executable, args);
    }

    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(if executable.contains(char::is_whitespace) {
        quote(executable)
    } else {
        executable.to_string()
    });
    parts.extend(args.iter().map(|arg| quote(arg)));

    let interpreter = comspec
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_COMSPEC)
        .to_string();
    debug!(program = %program, executable = %executable, interpreter = %interpreter, "Wrapping command in interpreter");

    NormalizedCommand {
        program: interpreter,
        args: vec![
            "/s".to_string(),
            "/c".to_string(),
            format!("\"{}\"", parts.join(" ")),
        ],
        verbatim_args: true,
        substituted: Some(OriginalCommand {
            program: program.to_string(),
            args: args.to_vec(),
        }),
    }
}

/// Whether `stderr` is the interpreter's "not recognized" message for `program`
pub fn is_not_recognized(stderr: &str, program: &str) -> bool {
    let stderr = stderr.replace("\r\n", "\n");
    [program.to_string(), quote(program)].iter().any(|name| {
        stderr
            == format!(
                "'{}' is not recognized as an internal or external command,\noperable program or batch file.",
                name
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_should_normalize_posix() {
        let unix = Platform::unix();
        assert!(!should_normalize("cmd", false, &unix));
        assert!(!should_normalize("bash", false, &unix));
    }

    #[test]
    fn test_should_normalize_windows() {
        let win = Platform::windows();
        assert!(!should_normalize("cmd", false, &win));
        assert!(!should_normalize("cmd.exe", false, &win));
        assert!(!should_normalize("C:\\Windows\\System32\\CMD.EXE", false, &win));
        assert!(should_normalize("bash.exe", false, &win));
        assert!(should_normalize("ding", false, &win));
        assert!(!should_normalize("ding", true, &win));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote(""), "\"\"");
    }

    #[test]
    fn test_normalize_wraps_in_interpreter() {
        let win = Platform::windows();
        let cmd = normalize("eslint", &strings(&["--fix", "a b.js"]), false, &win, None);
        assert_eq!(cmd.program, "cmd.exe");
        assert_eq!(cmd.args, strings(&["/s", "/c", "\"eslint \"--fix\" \"a b.js\"\""]));
        assert!(cmd.verbatim_args);
        assert_eq!(
            cmd.substituted,
            Some(OriginalCommand {
                program: "eslint".into(),
                args: strings(&["--fix", "a b.js"]),
            })
        );
    }

    #[test]
    fn test_normalize_quotes_spaced_program() {
        let win = Platform::windows();
        let cmd = normalize(
            "C:\\yes spaces\\hello.exe",
            &[],
            false,
            &win,
            Some("C:\\Windows\\system32\\cmd.exe"),
        );
        assert_eq!(cmd.program, "C:\\Windows\\system32\\cmd.exe");
        assert_eq!(cmd.args[2], "\"\"C:\\yes spaces\\hello.exe\"\"");
    }

    #[test]
    fn test_normalize_passthrough() {
        let args = strings(&["-c", "echo hi"]);
        let cmd = normalize("sh", &args, false, &Platform::unix(), None);
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, args);
        assert!(!cmd.verbatim_args);
        assert!(cmd.substituted.is_none());

        let cmd = normalize("cmd.exe", &args, false, &Platform::windows(), None);
        assert!(cmd.substituted.is_none());
    }

    #[test]
    fn test_resolved_executable_keeps_original_name() {
        let win = Platform::windows();
        let cmd = normalize_resolved(
            "eslint",
            "C:\\project\\node_modules\\.bin\\eslint.CMD",
            &strings(&["."]),
            false,
            &win,
            None,
        );
        assert_eq!(
            cmd.args[2],
            "\"C:\\project\\node_modules\\.bin\\eslint.CMD \".\"\""
        );
        assert_eq!(cmd.substituted.map(|o| o.program), Some("eslint".to_string()));

        let cmd = normalize_resolved("ls", "/bin/ls", &[], false, &Platform::unix(), None);
        assert_eq!(cmd.program, "/bin/ls");
    }

    #[test]
    fn test_not_recognized_detection() {
        let msg = "'nope' is not recognized as an internal or external command,\r\noperable program or batch file.";
        assert!(is_not_recognized(msg, "nope"));
        assert!(is_not_recognized(&msg.replace("\r\n", "\n"), "nope"));
        assert!(!is_not_recognized(msg, "other"));
        assert!(!is_not_recognized("nope: command failed", "nope"));

        let quoted = "'\"C:\\a b\\nope\"' is not recognized as an internal or external command,\r\noperable program or batch file.";
        assert!(is_not_recognized(quoted, "C:\\a b\\nope"));
    }
}
