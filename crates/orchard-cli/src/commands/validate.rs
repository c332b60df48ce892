use crate::cli::ValidateArgs;
use crate::error::CliError;
use chrono::Utc;
use colored::Colorize;
use orchard_client::{ArtifactRole, JobComposer};
use orchard_core::config::Config;
use orchard_core::model::Task;

pub fn handle_validate(args: ValidateArgs, config: &Config) -> Result<(), CliError> {
    let workflow = super::load_workflow(&args.workflow)?;
    let name = workflow.name.clone().unwrap_or_else(|| workflow.image.clone());
    println!("{} workflow '{}' is valid", "OK".green(), name);

    let Some(agent_name) = args.agent else {
        return Ok(());
    };
    let agent = config.agent(&agent_name)?;
    let inputs: Vec<String> = workflow
        .input
        .as_ref()
        .map(|input| vec![input.path.clone()])
        .unwrap_or_default();
    let task = Task::new("preview", agent, workflow, Some(name), Utc::now());
    let bundle = JobComposer::new(agent, &config.transfer).compose(&task, &inputs)?;

    if let Some(walltime) = &bundle.requested_walltime {
        println!("Requested walltime: {}", walltime);
    }
    if let Some(script) = bundle.artifact(ArtifactRole::RunScript) {
        println!("{}", format!("--- {} ---", script.name).dimmed());
        println!("{}", script.contents);
    }
    Ok(())
}
