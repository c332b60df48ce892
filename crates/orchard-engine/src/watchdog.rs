use crate::error::Result;
use crate::pipeline::Pipeline;
use orchard_core::model::{Guid, Stage, TaskState};
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle for more than twice the refresh interval.
    pub stalled: Vec<Guid>,
    /// Idle for more than five intervals and put back on the poll loop.
    pub rescued: Vec<Guid>,
    /// Idle for more than five intervals with nothing to poll.
    pub orphaned: Vec<Guid>,
}

/// Finds running tasks whose poll loop stopped advancing.
pub struct Watchdog {
    pipeline: Pipeline,
}

impl Watchdog {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let ctx = self.pipeline.context();
        let now = ctx.now();
        let refresh = chrono::Duration::from_std(ctx.config.tasks.refresh_interval())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut report = SweepReport::default();

        for task in ctx.store.list()? {
            if task.state != TaskState::Running {
                continue;
            }
            let idle = now - task.updated;
            if idle > refresh * 5 {
                if task.job_id.is_some() && !task.results_retrieved {
                    tracing::warn!(
                        "[{}] No progress for {}s, resuming the poll loop",
                        task.guid,
                        idle.num_seconds()
                    );
                    self.pipeline
                        .schedule(&task.guid, Stage::PollJobs, Duration::ZERO)?;
                    report.rescued.push(task.guid);
                } else {
                    tracing::error!(
                        "[{}] No progress for {}s and no job to poll",
                        task.guid,
                        idle.num_seconds()
                    );
                    report.orphaned.push(task.guid);
                }
            } else if idle > refresh * 2 {
                tracing::warn!(
                    "[{}] No progress for {}s",
                    task.guid,
                    idle.num_seconds()
                );
                report.stalled.push(task.guid);
            }
        }
        Ok(report)
    }
}
