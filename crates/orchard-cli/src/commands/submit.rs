use crate::cli::SubmitArgs;
use crate::error::CliError;
use colored::Colorize;
use orchard_core::config::Config;
use orchard_engine::Submission;

pub fn handle_submit(args: SubmitArgs, config: Config) -> Result<(), CliError> {
    let owner = args
        .owner
        .filter(|o| !o.trim().is_empty())
        .ok_or(CliError::MissingOwner)?;
    let workflow = super::load_workflow(&args.workflow)?;
    let submission = Submission {
        name: args.name.or_else(|| workflow.name.clone()),
        owner_email: args.email,
    };

    let orchestrator = super::orchestrator(config)?;
    let task = orchestrator.submit(&owner, &args.agent, workflow, submission)?;

    println!(
        "{} task '{}' on {}",
        "Submitted".green(),
        task.name,
        task.agent
    );
    println!("{}", task.guid);
    Ok(())
}
