// subexec CLI entry point

use clap::Parser;
use subexec_cli::{logging, output, Cli, CommandRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match CommandRouter::execute(&cli).await {
        Ok(outcome) => {
            output::print_outcome(&outcome)?;
            Ok(())
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            output::print_error(&e.user_message());
            std::process::exit(e.exit_code());
        }
    }
}
