mod chardet;
mod cli;
mod display;
mod logging;
mod mailbox;
mod message;
mod settings;
mod sync;


use clap::Parser;
use log::error;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    if let Err(e) = logging::setup_logging(logging::level_from_flags(cli.verbose, cli.quiet)) {
        eprintln!("failed to set up logging: {}", e);
    }

    if let Err(e) = cli::run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
