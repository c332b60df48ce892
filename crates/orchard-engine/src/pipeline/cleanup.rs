use super::results::results_key;
use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_core::errors::ConfigError;
use orchard_core::model::{Stage, Task};
use orchard_executor::{ExecOptions, RemoteCommand};

/// Revokes the grants made by `ShareData`. A failure here is reported but
/// must not keep `TidyUp` from running.
pub(super) async fn unshare(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    if let Err(e) = ctx.transfer.unshare(&task).await {
        tracing::error!("[{}] Could not revoke access: {}", task.guid, e);
        ctx.record(&task, &format!("Could not revoke access: {}", e));
        return Ok(StageOutcome::Halt);
    }
    if !task.shared_paths.is_empty() {
        ctx.store.update(&task.guid, &mut |t| {
            t.shared_paths.clear();
            Ok(())
        })?;
    }
    Ok(StageOutcome::Halt)
}

pub(super) async fn tidy(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    if task.cleaned_up {
        return Ok(StageOutcome::Halt);
    }
    if !task.is_terminal() {
        tracing::debug!("[{}] Still {}, postponing cleanup", task.guid, task.state);
        return Ok(StageOutcome::Reschedule(
            Stage::TidyUp,
            ctx.config.tasks.cleanup_delay(),
        ));
    }

    if task.workdir.trim_matches('/').is_empty() {
        return Err(ConfigError::General(format!(
            "task {} has no working directory of its own",
            task.guid
        ))
        .into());
    }
    let agent = ctx.agents.get(&task.agent)?;
    let task_dir = agent.task_dir(&task);
    let command = RemoteCommand::new("rm")
        .arg("-rf")
        .arg(&task_dir)
        .to_shell_string();
    ctx.shell(&agent)
        .execute(&command, &ExecOptions::new().allow_stderr())
        .await?;
    ctx.cache.delete(&results_key(&task.guid));

    pipeline.note(&task.guid, "Cleaned up", &mut |t| t.cleaned_up = true)?;
    Ok(StageOutcome::Halt)
}
