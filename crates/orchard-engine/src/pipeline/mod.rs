//! The ordered stage pipeline. A stage reads its task fresh from the store,
//! does one step of work and names its single successor; the pipeline
//! persists that successor on the task before handing it to the queue, so a
//! restarted engine can pick up where it stopped.

mod cleanup;
mod poll;
mod prepare;
mod push;
mod results;
mod share;
mod submit;

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use orchard_core::model::{Guid, ScheduledStage, Stage, Task, TaskState};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Next(Stage),
    Reschedule(Stage, Duration),
    Halt,
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

fn mark_scheduled(task: &mut Task, stage: Stage, at: DateTime<Utc>) {
    task.next_stages.retain(|s| s.stage != stage);
    task.next_stages.push(ScheduledStage { stage, at });
}

#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<EngineContext>,
}

impl Pipeline {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Runs one stage to completion. Stage errors become the failure
    /// procedure; only errors while recording the outcome are returned.
    pub async fn run(&self, guid: &Guid, stage: Stage) -> Result<()> {
        let limit = self.ctx.config.tasks.stage_time_limit();
        let result = match tokio::time::timeout(limit, self.invoke(guid, stage)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::StageTimedOut { stage, limit }),
        };

        match result {
            Ok(outcome) => self.advance(guid, stage, outcome),
            Err(e) if e.is_not_found() => {
                tracing::debug!("[{}] Task vanished before {}, dropping", guid, stage);
                Ok(())
            }
            Err(e) => self.fail(guid, stage, &e).await,
        }
    }

    async fn invoke(&self, guid: &Guid, stage: Stage) -> Result<StageOutcome> {
        let task = self.ctx.store.load(guid)?;
        if task.is_terminal() && !stage.is_cleanup() {
            tracing::debug!("[{}] Task is {}, not running {}", guid, task.state, stage);
            return Ok(StageOutcome::Halt);
        }
        tracing::debug!("[{}] Running {}", guid, stage);
        match stage {
            Stage::PrepareEnvironment => prepare::run(self, task).await,
            Stage::ShareData => share::run(self, task).await,
            Stage::SubmitJobs => submit::run(self, task).await,
            Stage::PollJobs => poll::run(self, task).await,
            Stage::TestResults => results::run(self, task).await,
            Stage::TestPush => push::run(self, task).await,
            Stage::UnshareData => cleanup::unshare(self, task).await,
            Stage::TidyUp => cleanup::tidy(self, task).await,
        }
    }

    fn advance(&self, guid: &Guid, finished: Stage, outcome: StageOutcome) -> Result<()> {
        let next = match outcome {
            StageOutcome::Next(stage) => Some((stage, Duration::ZERO)),
            StageOutcome::Reschedule(stage, delay) => Some((stage, delay)),
            StageOutcome::Halt => None,
        };
        let now = self.ctx.now();
        let updated = self.ctx.store.update(guid, &mut |task| {
            task.next_stages.retain(|s| s.stage != finished);
            if let Some((stage, delay)) = next {
                mark_scheduled(task, stage, now + to_chrono(delay));
            }
            Ok(())
        });
        match updated {
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
            Ok(_) => {}
        }
        if let Some((stage, delay)) = next {
            self.ctx.queue.enqueue(guid.clone(), stage, delay);
        }
        Ok(())
    }

    /// Persists `stage` as due after `delay` and queues it.
    pub fn schedule(&self, guid: &Guid, stage: Stage, delay: Duration) -> Result<()> {
        let at = self.ctx.now() + to_chrono(delay);
        self.ctx.store.update(guid, &mut |task| {
            mark_scheduled(task, stage, at);
            Ok(())
        })?;
        self.ctx.queue.enqueue(guid.clone(), stage, delay);
        Ok(())
    }

    /// Queues `UnshareData` now and `TidyUp` after the cleanup delay, each at most once per task.
    pub fn schedule_cleanup(&self, guid: &Guid) -> Result<()> {
        let now = self.ctx.now();
        let delay = self.ctx.config.tasks.cleanup_delay();
        let (mut unshare, mut tidy) = (false, false);
        self.ctx.store.update(guid, &mut |task| {
            unshare = !task.unshare_scheduled;
            tidy = !task.tidy_scheduled;
            if unshare {
                task.unshare_scheduled = true;
                mark_scheduled(task, Stage::UnshareData, now);
            }
            if tidy {
                task.tidy_scheduled = true;
                mark_scheduled(task, Stage::TidyUp, now + to_chrono(delay));
            }
            Ok(())
        })?;
        if unshare {
            self.ctx.queue.enqueue(guid.clone(), Stage::UnshareData, Duration::ZERO);
        }
        if tidy {
            self.ctx.queue.enqueue(guid.clone(), Stage::TidyUp, delay);
        }
        Ok(())
    }

    /// Schedules the delayed `TidyUp` on the success path, once.
    fn schedule_tidy(&self, guid: &Guid) -> Result<()> {
        let now = self.ctx.now();
        let delay = self.ctx.config.tasks.cleanup_delay();
        let mut tidy = false;
        self.ctx.store.update(guid, &mut |task| {
            tidy = !task.tidy_scheduled;
            if tidy {
                task.tidy_scheduled = true;
                mark_scheduled(task, Stage::TidyUp, now + to_chrono(delay));
            }
            Ok(())
        })?;
        if tidy {
            self.ctx.queue.enqueue(guid.clone(), Stage::TidyUp, delay);
        }
        Ok(())
    }

    async fn fail(&self, guid: &Guid, stage: Stage, error: &EngineError) -> Result<()> {
        let message = error.to_string();
        tracing::error!("[{}] {} failed: {}", guid, stage, message);
        let now = self.ctx.now();
        let mut settled = false;
        let updated = self.ctx.store.update(guid, &mut |task| {
            task.next_stages.retain(|s| s.stage != stage);
            settled = task.settle(TaskState::Failure, now)?;
            if settled {
                task.message = Some(message.clone());
            }
            task.touch(now);
            Ok(())
        });
        let task = match updated {
            Ok(task) => task,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.ctx.record(&task, &message);
        // Already settled: keep the outcome message.
        if settled {
            self.ctx.publish(&task, &message).await;
        }
        self.schedule_cleanup(guid)
    }

    /// Stores the terminal outcome of a task and queues its cleanup.
    async fn conclude(&self, guid: &Guid, state: TaskState, message: String) -> Result<Task> {
        let now = self.ctx.now();
        let task = self.ctx.store.update(guid, &mut |task| {
            task.settle(state, now)?;
            task.message = Some(message.clone());
            task.touch(now);
            Ok(())
        })?;
        tracing::info!("[{}] {}", guid, message);
        self.ctx.record(&task, &message);
        self.ctx.publish(&task, &message).await;
        self.schedule_cleanup(guid)?;
        Ok(task)
    }

    /// Stores a progress message on a live task and pushes it.
    fn note(&self, guid: &Guid, message: &str, apply: &mut dyn FnMut(&mut Task)) -> Result<Task> {
        let now = self.ctx.now();
        let task = self.ctx.store.update(guid, &mut |task| {
            apply(task);
            task.message = Some(message.to_string());
            task.touch(now);
            Ok(())
        })?;
        tracing::info!("[{}] {}", guid, message);
        self.ctx.record(&task, message);
        Ok(task)
    }
}
