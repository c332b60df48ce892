use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_core::constants::suffixes;
use orchard_core::model::{Stage, Task};

/// Submits pull, run and push jobs, each depending on the one before.
pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    let refresh = ctx.config.tasks.refresh_interval();
    if let Some(job_id) = &task.job_id {
        tracing::warn!("[{}] Job {} already submitted, polling instead", task.guid, job_id);
        return Ok(StageOutcome::Reschedule(Stage::PollJobs, refresh));
    }

    let agent = ctx.agents.get(&task.agent)?;
    let scheduler = ctx.scheduler(&agent);
    let dir = agent.task_dir(&task);
    let guid = &task.guid;

    let mut scripts = Vec::new();
    if task.workflow.input.is_some() {
        scripts.push(format!("{}{}", guid, suffixes::PULL_SCRIPT));
    }
    scripts.push(format!("{}{}", guid, suffixes::SCRIPT));
    if task.workflow.output.to.is_some() {
        scripts.push(format!("{}{}", guid, suffixes::PUSH_SCRIPT));
    }

    let mut previous: Option<String> = None;
    for script in &scripts {
        let id = scheduler.submit(&dir, script, previous.as_deref()).await?;
        ctx.store.update(guid, &mut |t| {
            t.job_ids.push(id.clone());
            Ok(())
        })?;
        previous = Some(id);
    }

    let Some(last) = previous else {
        return Ok(StageOutcome::Halt);
    };
    let message = {
        let current = ctx.store.load(guid)?;
        format!("Scheduled job(s) {}", current.job_ids.join(", "))
    };
    let now = ctx.now();
    let task = ctx.store.update(guid, &mut |t| {
        t.set_job_id(&last)?;
        t.message = Some(message.clone());
        t.touch(now);
        Ok(())
    })?;
    tracing::info!("[{}] {}", guid, message);
    ctx.record(&task, &message);
    Ok(StageOutcome::Reschedule(Stage::PollJobs, refresh))
}
