use super::{Pipeline, StageOutcome};
use crate::error::{EngineError, Result};
use orchard_client::{resolve, JobQuery, JobVerdict, SchedulerClient, StatusBucket};
use orchard_core::model::{Stage, Task, TaskState};

fn terminal_state(bucket: StatusBucket) -> TaskState {
    match bucket {
        StatusBucket::Failure => TaskState::Failure,
        StatusBucket::Cancelled => TaskState::Canceled,
        StatusBucket::Timeout => TaskState::Timeout,
        StatusBucket::Success => TaskState::Completed,
    }
}

/// An earlier job of the chain that ended badly leaves the rest waiting on it forever.
async fn failed_predecessor(
    scheduler: &SchedulerClient,
    dir: &str,
    task: &Task,
    last: &str,
) -> Result<Option<(String, String, StatusBucket)>> {
    for job_id in task.job_ids.iter().filter(|id| id.as_str() != last) {
        if let JobQuery::Found(status) = scheduler.status(dir, job_id).await? {
            match scheduler.dialect().classify(&status) {
                Some(StatusBucket::Success) | None => {}
                Some(bucket) => return Ok(Some((job_id.clone(), status, bucket))),
            }
        }
    }
    Ok(None)
}

pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    let guid = &task.guid;
    let Some(job_id) = task.job_id.clone() else {
        return Err(EngineError::NoJob(guid.clone()));
    };
    let agent = ctx.agents.get(&task.agent)?;
    let scheduler = ctx.scheduler(&agent);
    let dir = agent.task_dir(&task);

    if let Some((failed, status, bucket)) = failed_predecessor(&scheduler, &dir, &task, &job_id).await? {
        if let Err(e) = scheduler.cancel(&dir, &job_id).await {
            tracing::warn!("[{}] Could not cancel job {}: {}", guid, job_id, e);
        }
        let message = format!("Job {} {}", failed, status);
        pipeline
            .conclude(guid, terminal_state(bucket), message)
            .await?;
        return Ok(StageOutcome::Halt);
    }

    let query = scheduler.status(&dir, &job_id).await?;
    let live_terminal = match &query {
        JobQuery::Found(status) => scheduler.dialect().classify(status).is_some(),
        JobQuery::NotFound => false,
    };
    let log = if live_terminal {
        None
    } else {
        scheduler.scan_log(&dir, &job_id).await?
    };

    match resolve(scheduler.dialect(), task.job_status.as_deref(), &query, log) {
        JobVerdict::Finished {
            bucket: StatusBucket::Success,
            status,
            unknown_final,
        } => {
            let message = if unknown_final {
                format!(
                    "Job {} disappeared after {}; unknown final status, assuming success",
                    job_id,
                    task.job_status.as_deref().unwrap_or("COMPLETED")
                )
            } else {
                format!("Job {} {}", job_id, status)
            };
            let task = pipeline.note(guid, &message, &mut |t| {
                t.job_status = Some(status.clone());
            })?;
            ctx.publish(&task, &message).await;
            pipeline.schedule_tidy(guid)?;
            Ok(StageOutcome::Next(Stage::TestResults))
        }
        JobVerdict::Finished { bucket, status, .. } => {
            let message = format!("Job {} {}", job_id, status);
            ctx.store.update(guid, &mut |t| {
                t.job_status = Some(status.clone());
                Ok(())
            })?;
            pipeline
                .conclude(guid, terminal_state(bucket), message)
                .await?;
            Ok(StageOutcome::Halt)
        }
        JobVerdict::Pending { status } => {
            let now = ctx.now();
            let shown = status
                .as_deref()
                .or(task.job_status.as_deref())
                .unwrap_or("UNKNOWN")
                .to_string();
            if task.is_past_due(now) {
                match scheduler.cancel(&dir, &job_id).await {
                    Ok(_) => {}
                    Err(e) => tracing::warn!("[{}] Could not cancel job {}: {}", guid, job_id, e),
                }
                return Err(EngineError::DeadlineExceeded(format!(
                    "Job {} {} is past its due time {} and was cancelled",
                    job_id,
                    shown,
                    task.due_time.format("%Y-%m-%d %H:%M:%S UTC")
                )));
            }

            let walltime = match scheduler.walltime(&dir, &job_id).await {
                Ok(walltime) => walltime,
                Err(e) => {
                    tracing::debug!("[{}] No walltime for job {}: {}", guid, job_id, e);
                    None
                }
            };
            let task = ctx.store.update(guid, &mut |t| {
                if let Some(status) = &status {
                    t.job_status = Some(status.clone());
                }
                if walltime.is_some() {
                    t.job_consumed_walltime = walltime.clone();
                }
                t.touch(now);
                Ok(())
            })?;
            tracing::debug!("[{}] Job {} is {}", guid, job_id, shown);
            ctx.push.notify(&task.owner, (&task).into());
            Ok(StageOutcome::Reschedule(
                Stage::PollJobs,
                ctx.config.tasks.refresh_interval(),
            ))
        }
    }
}
