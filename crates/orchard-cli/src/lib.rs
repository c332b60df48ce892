pub mod cli;
pub mod commands;
pub mod error;

use cli::{Cli, Commands};
use error::CliError;
use orchard_core::config;

pub fn run(cli: Cli) -> Result<(), CliError> {
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate(args) => commands::validate::handle_validate(args, &config),
        Commands::Agents => commands::agents::handle_agents(&config),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                match command {
                    Commands::Serve(args) => commands::serve::handle_serve(args, config).await,
                    Commands::Submit(args) => commands::submit::handle_submit(args, config),
                    Commands::Cancel(args) => commands::tasks::handle_cancel(args, config).await,
                    Commands::Status(args) => commands::tasks::handle_status(args, config),
                    Commands::Logs(args) => commands::tasks::handle_logs(args, config),
                    Commands::Validate(_) | Commands::Agents => Ok(()),
                }
            })
        }
    }
}
