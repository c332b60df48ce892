//! Entry point for everything outside the engine: creating and cancelling
//! tasks, queries, and the long-running service loop.

use crate::context::EngineContext;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::lock::SingleFlightLock;
use crate::pipeline::Pipeline;
use crate::watchdog::Watchdog;
use orchard_core::constants::defaults;
use orchard_core::model::{Guid, Stage, Task, TaskState};
use orchard_core::workflow::WorkflowConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for a new task beyond its owner, agent and workflow.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub name: Option<String>,
    pub owner_email: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<EngineContext>,
    pipeline: Pipeline,
}

impl Orchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let pipeline = Pipeline::new(ctx.clone());
        Self { ctx, pipeline }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn create_task(
        &self,
        owner: &str,
        agent: &str,
        workflow: WorkflowConfig,
        submission: Submission,
    ) -> Result<Task> {
        workflow.check()?;
        let agent = self.ctx.agents.get(agent)?;
        if !agent.healthy {
            tracing::warn!("Agent '{}' failed its last health check", agent.name);
        }
        let mut task = Task::new(owner, &agent, workflow, submission.name, self.ctx.now());
        task.owner_email = submission.owner_email;
        task.message = Some(format!("Created on {}", agent.name));
        self.ctx.store.put(&task)?;
        tracing::info!("[{}] Created task '{}' for {} on {}", task.guid, task.name, owner, agent.name);
        self.ctx.record(&task, &format!("Created task '{}' on {}", task.name, agent.name));
        Ok(task)
    }

    /// Queues the first stage after the configured initial delay.
    pub fn enqueue_pipeline(&self, guid: &Guid) -> Result<()> {
        self.pipeline.schedule(
            guid,
            Stage::PrepareEnvironment,
            self.ctx.config.tasks.initial_delay(),
        )
    }

    pub fn submit(
        &self,
        owner: &str,
        agent: &str,
        workflow: WorkflowConfig,
        submission: Submission,
    ) -> Result<Task> {
        let task = self.create_task(owner, agent, workflow, submission)?;
        self.enqueue_pipeline(&task.guid)?;
        self.ctx.store.load(&task.guid)
    }

    /// Marks the task canceled, stops its jobs on the scheduler (best
    /// effort) and queues cleanup. Cancelling a finished task changes nothing.
    pub async fn cancel(&self, guid: &Guid) -> Result<Task> {
        let task = self.ctx.store.load(guid)?;
        if task.is_terminal() {
            tracing::info!("[{}] Already {}, nothing to cancel", guid, task.state);
            return Ok(task);
        }

        if !task.job_ids.is_empty() {
            match self.ctx.agents.get(&task.agent) {
                Ok(agent) => {
                    let scheduler = self.ctx.scheduler(&agent);
                    let dir = agent.task_dir(&task);
                    for job_id in task.job_ids.iter().rev() {
                        if let Err(e) = scheduler.cancel(&dir, job_id).await {
                            tracing::warn!("[{}] Could not cancel job {}: {}", guid, job_id, e);
                        }
                    }
                }
                Err(e) => tracing::warn!("[{}] Cannot reach agent to cancel jobs: {}", guid, e),
            }
        }

        let now = self.ctx.now();
        let message = "Canceled by user".to_string();
        let task = self.ctx.store.update(guid, &mut |t| {
            if t.settle(TaskState::Canceled, now)? {
                t.message = Some(message.clone());
                t.touch(now);
            }
            Ok(())
        })?;
        if task.state == TaskState::Canceled {
            self.ctx.record(&task, &message);
            self.ctx.publish(&task, &message).await;
        }
        self.pipeline.schedule_cleanup(guid)?;
        self.ctx.store.load(guid)
    }

    pub fn task(&self, guid: &Guid) -> Result<Task> {
        self.ctx.store.load(guid)
    }

    /// Looks a task up by full guid or by a unique prefix.
    pub fn find(&self, id: &str) -> Result<Task> {
        if let Some(task) = self.ctx.store.get(&Guid::from(id))? {
            return Ok(task);
        }
        let mut matches: Vec<Task> = self
            .ctx
            .store
            .list()?
            .into_iter()
            .filter(|t| t.guid.0.starts_with(id))
            .collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            _ => Err(crate::error::EngineError::NotFound(Guid::from(id))),
        }
    }

    pub fn tasks(&self, owner: Option<&str>) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .ctx
            .store
            .list()?
            .into_iter()
            .filter(|t| owner.map_or(true, |o| t.owner == o))
            .collect();
        tasks.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(tasks)
    }

    pub fn status_log(&self, guid: &Guid) -> Result<Vec<String>> {
        self.ctx.status_log.read(guid)
    }

    /// Queues every stage recorded on stored tasks. Returns how many were queued.
    pub fn adopt(&self) -> Result<usize> {
        let now = self.ctx.now();
        let mut count = 0;
        for task in self.ctx.store.list()? {
            for scheduled in &task.next_stages {
                let delay = (scheduled.at - now).to_std().unwrap_or(Duration::ZERO);
                self.ctx
                    .queue
                    .enqueue(task.guid.clone(), scheduled.stage, delay);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Runs workers, the watchdog and health checks until `shutdown` fires.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let adopted = self.adopt()?;
        if adopted > 0 {
            tracing::info!("Resumed {} scheduled stage(s)", adopted);
        }

        let dispatcher = Dispatcher::new(self.pipeline.clone(), self.ctx.config.tasks.workers);
        let workers = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(shutdown).await })
        };

        let settings = &self.ctx.config.tasks;
        let lock = SingleFlightLock::new(self.ctx.cache.clone());
        let watchdog = Watchdog::new(self.pipeline.clone());
        let health = Arc::new(HealthMonitor::new(self.ctx.clone()));
        let mut health_run: Option<tokio::task::JoinHandle<()>> = None;
        let ttl = Duration::from_secs(defaults::LOCK_TTL_SECONDS);
        let mut sweep = tokio::time::interval(settings.refresh_interval().max(Duration::from_secs(1)));
        let mut checks =
            tokio::time::interval(settings.healthcheck_interval().max(Duration::from_secs(1)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        checks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => {
                    lock.run("watchdog", ttl, || async {
                        if let Err(e) = self.adopt() {
                            tracing::error!("Could not resume stored stages: {}", e);
                        }
                        if let Err(e) = watchdog.sweep() {
                            tracing::error!("Watchdog sweep failed: {}", e);
                        }
                    })
                    .await;
                }
                _ = checks.tick() => {
                    if health_run.as_ref().is_some_and(|run| !run.is_finished()) {
                        tracing::debug!("Previous health check still running");
                    } else {
                        let health = health.clone();
                        let shutdown = shutdown.clone();
                        health_run = Some(tokio::spawn(async move {
                            tokio::select! {
                                _ = shutdown.cancelled() => {}
                                _ = health.check_all() => {}
                            }
                        }));
                    }
                }
            }
        }
        if let Some(run) = health_run {
            if let Err(e) = run.await {
                tracing::error!("Health check ended abnormally: {}", e);
            }
        }

        tracing::info!("Shutting down, waiting for running stages");
        if let Err(e) = workers.await {
            tracing::error!("Worker pool ended abnormally: {}", e);
        }
        Ok(())
    }
}
