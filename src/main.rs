//! Shepherd CLI entry point.

use anyhow::Result;
use clap::Parser;

use shepherd::cli::{commands, handle_error, Cli, Commands};
use shepherd::{ConfigLoader, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&config.logging)?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, &config, cli.json).await,
        Commands::Start(args) => commands::start::execute(args, &config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, &config, cli.json).await,
        Commands::List(args) => commands::list::execute(args, &config, cli.json).await,
    }
}
