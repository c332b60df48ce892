use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_core::model::{Stage, Task};

pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    if !ctx.transfer.needs_sharing(&task) {
        tracing::debug!("[{}] Owned by the service account, nothing to share", task.guid);
        return Ok(StageOutcome::Next(Stage::SubmitJobs));
    }
    let paths = ctx.transfer.share(&task).await?;
    if !paths.is_empty() {
        ctx.store.update(&task.guid, &mut |t| {
            t.shared_paths = paths.clone();
            Ok(())
        })?;
    }
    Ok(StageOutcome::Next(Stage::SubmitJobs))
}
