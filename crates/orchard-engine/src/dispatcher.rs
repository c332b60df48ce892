use crate::pipeline::Pipeline;
use crate::queue::{Admission, StageQueue};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay before retrying a message whose task is busy with another stage.
const BUSY_RETRY: Duration = Duration::from_secs(1);

/// Fixed pool of workers pulling stage messages off the queue.
pub struct Dispatcher {
    pipeline: Pipeline,
    queue: Arc<StageQueue>,
    workers: usize,
}

impl Dispatcher {
    /// `workers == 0` means one worker per CPU.
    pub fn new(pipeline: Pipeline, workers: usize) -> Self {
        let queue = pipeline.context().queue.clone();
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        Self {
            pipeline,
            queue,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs until `shutdown` fires. Stages already running are allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Starting {} stage worker(s)", self.workers);
        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                let pipeline = self.pipeline.clone();
                let queue = self.queue.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker(id, pipeline, queue, shutdown).await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Stage worker ended abnormally: {}", e);
            }
        }
        tracing::info!("All stage workers stopped");
    }
}

async fn worker(id: usize, pipeline: Pipeline, queue: Arc<StageQueue>, shutdown: CancellationToken) {
    while let Some(message) = queue.next(&shutdown).await {
        match queue.try_begin(&message) {
            Admission::Started => {}
            Admission::Duplicate => {
                tracing::debug!(
                    "[{}] {} is already running, dropping duplicate",
                    message.guid,
                    message.stage
                );
                continue;
            }
            Admission::Busy(running) => {
                tracing::trace!(
                    "[{}] Busy with {}, retrying {} shortly",
                    message.guid,
                    running,
                    message.stage
                );
                queue.enqueue(message.guid, message.stage, BUSY_RETRY);
                continue;
            }
        }

        tracing::trace!("worker {} took {} for {}", id, message.stage, message.guid);
        let outcome = AssertUnwindSafe(pipeline.run(&message.guid, message.stage))
            .catch_unwind()
            .await;
        queue.finish(&message.guid);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(
                "[{}] Could not record outcome of {}: {}",
                message.guid,
                message.stage,
                e
            ),
            Err(_) => tracing::error!("[{}] {} panicked", message.guid, message.stage),
        }
    }
}
