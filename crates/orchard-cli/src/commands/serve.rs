use crate::cli::ServeArgs;
use crate::error::CliError;
use colored::Colorize;
use orchard_core::config::Config;
use tokio_util::sync::CancellationToken;

pub async fn handle_serve(args: ServeArgs, mut config: Config) -> Result<(), CliError> {
    if let Some(workers) = args.workers {
        config.tasks.workers = workers;
    }
    let agents: Vec<String> = config.agents.keys().cloned().collect();
    let orchestrator = super::orchestrator(config)?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Interrupt received");
        token.cancel();
    }) {
        tracing::warn!("Could not install interrupt handler: {}", e);
    }

    println!(
        "{} serving {} agent(s): {}",
        "orchard".bold(),
        agents.len(),
        agents.join(", ")
    );
    orchestrator.serve(shutdown).await?;
    println!("Stopped.");
    Ok(())
}
