//! promptloop CLI entry point.

use clap::Parser;

use promptloop::cli::{self, Cli, Commands};
use promptloop::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => cli::handle_error(err, cli.json),
    };
    // Held for the whole run so buffered file logs are flushed on exit.
    let _logger = match init_logging(&config.logging) {
        Ok(logger) => logger,
        Err(err) => cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Project(args) => cli::commands::project::execute(args, config, cli.json).await,
        Commands::Validate(args) => cli::commands::validate::execute(args, config, cli.json).await,
        Commands::Iterate(args) => cli::commands::iterate::execute(args, config, cli.json).await,
        Commands::Status(args) => cli::commands::status::execute(args, config, cli.json).await,
        Commands::History(args) => cli::commands::history::execute(args, config, cli.json).await,
        Commands::Reset(args) => cli::commands::reset::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        cli::handle_error(err, cli.json);
    }
}
