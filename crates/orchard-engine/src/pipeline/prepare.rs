use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_client::JobComposer;
use orchard_core::errors::ConfigurationError;
use orchard_core::model::{Stage, Task, TaskState};
use orchard_executor::{ExecOptions, RemoteCommand};

pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    task.workflow.check()?;
    let agent = ctx.agents.get(&task.agent)?;

    let inputs = ctx.transfer.list_inputs(&task).await?;
    if let Some(input) = &task.workflow.input {
        if inputs.is_empty() {
            return Err(ConfigurationError::single(format!(
                "No input files found in '{}'",
                input.path
            ))
            .into());
        }
    }

    let bundle = JobComposer::new(&agent, &ctx.config.transfer).compose(&task, &inputs)?;
    let task_dir = agent.task_dir(&task);
    let shell = ctx.shell(&agent);
    let mkdir = RemoteCommand::new("mkdir")
        .arg("-p")
        .arg(&task_dir)
        .to_shell_string();
    shell.execute(&mkdir, &ExecOptions::new()).await?;
    for artifact in &bundle.artifacts {
        shell
            .upload(&format!("{}/{}", task_dir, artifact.name), &artifact.contents)
            .await?;
    }

    let message = format!(
        "Prepared {} on {} with {} input(s)",
        task_dir,
        agent.name,
        inputs.len()
    );
    let now = ctx.now();
    let mut canceled = false;
    let task = ctx.store.update(&task.guid, &mut |t| {
        if t.is_terminal() {
            canceled = true;
            return Ok(());
        }
        t.transition(TaskState::Running, now)?;
        t.inputs_detected = inputs.len();
        t.job_requested_walltime = bundle.requested_walltime.clone();
        t.message = Some(message.clone());
        Ok(())
    })?;
    if canceled {
        tracing::info!("[{}] Task became {} while preparing", task.guid, task.state);
        return Ok(StageOutcome::Halt);
    }
    tracing::info!("[{}] {}", task.guid, message);
    ctx.record(&task, &message);
    Ok(StageOutcome::Next(Stage::ShareData))
}
