use crate::cli::{StatusArgs, TaskArgs};
use crate::error::CliError;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use orchard_core::config::Config;
use orchard_core::model::Task;

pub async fn handle_cancel(args: TaskArgs, config: Config) -> Result<(), CliError> {
    let orchestrator = super::orchestrator(config)?;
    let task = orchestrator.find(&args.task_id)?;
    let was_terminal = task.is_terminal();
    let task = orchestrator.cancel(&task.guid).await?;

    if was_terminal {
        println!(
            "Task {} already finished ({}), nothing to cancel",
            task.guid.short_id(),
            super::colored_state(task.state)
        );
    } else {
        println!(
            "Task {} is now {}",
            task.guid.short_id(),
            super::colored_state(task.state)
        );
    }
    Ok(())
}

pub fn handle_status(args: StatusArgs, config: Config) -> Result<(), CliError> {
    let orchestrator = super::orchestrator(config)?;

    if let Some(id) = args.task_id {
        let task = orchestrator.find(&id)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&task)?);
        } else {
            print_task(&task);
        }
        return Ok(());
    }

    let tasks = orchestrator.tasks(args.owner.as_deref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Name", "Owner", "Agent", "State", "Job", "Updated"]);
    for task in &tasks {
        table.add_row(vec![
            task.guid.short_id().to_string(),
            task.name.clone(),
            task.owner.clone(),
            task.agent.clone(),
            task.state.to_string(),
            match (&task.job_id, &task.job_status) {
                (Some(id), Some(status)) => format!("{} {}", id, status),
                (Some(id), None) => id.clone(),
                _ => "-".to_string(),
            },
            task.updated.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn print_task(task: &Task) {
    println!("{} {}", "Task:".bold(), task.guid);
    println!("  Name:     {}", task.name);
    println!("  Owner:    {}", task.owner);
    println!("  Agent:    {}", task.agent);
    println!("  State:    {}", super::colored_state(task.state));
    if !task.job_ids.is_empty() {
        println!("  Jobs:     {}", task.job_ids.join(", "));
    }
    if let Some(status) = &task.job_status {
        println!("  Job status: {}", status);
    }
    if let Some(walltime) = &task.job_requested_walltime {
        let consumed = task.job_consumed_walltime.as_deref().unwrap_or("-");
        println!("  Walltime: {} used of {}", consumed, walltime);
    }
    println!("  Created:  {}", task.created.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Due:      {}", task.due_time.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(completed) = task.completed {
        println!("  Finished: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Inputs:   {}", task.inputs_detected);
    if task.results_retrieved {
        println!("  Results:  {} transferred", task.results_transferred);
    }
    for scheduled in &task.next_stages {
        println!(
            "  Next:     {} at {}",
            scheduled.stage,
            scheduled.at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(message) = &task.message {
        println!("  Message:  {}", message);
    }
}

pub fn handle_logs(args: TaskArgs, config: Config) -> Result<(), CliError> {
    let orchestrator = super::orchestrator(config)?;
    let task = orchestrator.find(&args.task_id)?;
    let lines = orchestrator.status_log(&task.guid)?;
    if lines.is_empty() {
        println!("No log entries for task {}", task.guid.short_id());
    }
    for line in &lines {
        println!("{}", line);
    }
    Ok(())
}
