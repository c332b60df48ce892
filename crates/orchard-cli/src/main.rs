use clap::Parser;
use colored::Colorize;
use orchard_cli::cli::{Cli, Commands};
use orchard_core::{config, logging};

fn main() {
    let cli = Cli::parse();

    logging::set_log_level_from_env();
    logging::set_log_level_from_verbosity(cli.verbose);

    let session = match cli.command {
        Commands::Serve(_) => "serve",
        _ => "orchard",
    };
    let logging_config = config::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = logging::init_session_logger(&logging_config, session) {
        eprintln!(
            "{}",
            format!("[ERROR] Failed to initialize session logger: {}", e).red()
        );
        logging::init_stderr_logger();
    }

    if let Err(e) = orchard_cli::run(cli) {
        tracing::error!("{}", e);
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(1);
    }
}
