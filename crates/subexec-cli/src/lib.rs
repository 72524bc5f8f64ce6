// subexec CLI library

pub mod error;
pub mod logging;
pub mod output;
pub mod router;
pub mod settings;

pub use error::{CliError, CliResult};
pub use logging::init_logging;
pub use router::{Cli, CommandRouter, Commands, ExecArgs};
pub use settings::SettingsLoader;
