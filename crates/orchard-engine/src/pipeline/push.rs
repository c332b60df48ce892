use super::results::results_key;
use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_core::model::{Task, TaskState};

/// Confirms the push job delivered every found result, then settles the task.
pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    let guid = &task.guid;
    let Some(to) = task.workflow.output.to.clone() else {
        pipeline
            .conclude(guid, TaskState::Completed, "Completed".to_string())
            .await?;
        return Ok(StageOutcome::Halt);
    };

    let expected: Vec<String> = match ctx.cache.get(&results_key(guid)) {
        Some(cached) => serde_json::from_str(&cached)?,
        None => {
            tracing::warn!("[{}] No cached results, checking the destination only", guid);
            Vec::new()
        }
    };

    let listed = ctx.transfer.storage().list_files(&to).await?;
    let verified = ctx.transfer.verify_push(&to, &expected, &listed);

    // Recorded whether or not verification passes.
    ctx.store.update(guid, &mut |t| {
        t.transferred = true;
        t.results_transferred = expected.len();
        Ok(())
    })?;
    let count = verified?;
    let message = format!("Transferred {} result(s) to {}", count, to);
    pipeline.conclude(guid, TaskState::Completed, message).await?;
    Ok(StageOutcome::Halt)
}
