use clap::Parser;
use tracing::error;
use visor_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if let Err(err) = commands::dispatch(cli.command, &cli.api_url).await {
        error!(target = "visor", error = %err, "command failed");
        std::process::exit(1);
    }
}
