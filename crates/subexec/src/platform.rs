//! Platform capability descriptor
//!
//! Everything in this crate that behaves differently on Windows asks a
//! [`Platform`] value instead of checking `cfg!` directly, so the Windows
//! code paths can be exercised from any host in tests.

/// How commands are dispatched by the platform shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellConvention {
    /// `sh -c` style, executables are spawned directly
    Posix,
    /// `cmd.exe /s /c`, batch files and PATHEXT lookups need the interpreter
    CommandInterpreter,
}

/// Capabilities of the platform a child process is launched on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Separator between PATH entries
    pub path_separator: char,
    /// Shell convention used to run commands
    pub shell: ShellConvention,
    /// Whether environment variable names ignore case
    pub case_insensitive_env: bool,
    /// Whether killing a process group reaches descendants
    pub process_groups: bool,
}

impl Platform {
    /// POSIX-like platform (Linux, macOS, BSDs)
    pub const fn unix() -> Self {
        Self {
            path_separator: ':',
            shell: ShellConvention::Posix,
            case_insensitive_env: false,
            process_groups: true,
        }
    }

    /// Windows
    pub const fn windows() -> Self {
        Self {
            path_separator: ';',
            shell: ShellConvention::CommandInterpreter,
            case_insensitive_env: true,
            process_groups: false,
        }
    }

    /// The platform this binary was compiled for
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::unix()
        }
    }

    /// True when commands go through `cmd.exe`
    pub fn uses_command_interpreter(&self) -> bool {
        self.shell == ShellConvention::CommandInterpreter
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors() {
        let win = Platform::windows();
        assert_eq!(win.path_separator, ';');
        assert!(win.uses_command_interpreter());
        assert!(win.case_insensitive_env);
        assert!(!win.process_groups);

        let unix = Platform::unix();
        assert_eq!(unix.path_separator, ':');
        assert!(!unix.uses_command_interpreter());
    }

    #[test]
    fn test_current_matches_target() {
        assert_eq!(Platform::current() == Platform::windows(), cfg!(windows));
    }
}
