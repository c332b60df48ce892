use crate::error::CliError;
use colored::{ColoredString, Colorize};
use orchard_core::config::Config;
use orchard_core::model::TaskState;
use orchard_core::workflow::WorkflowConfig;
use orchard_engine::{EngineContext, Orchestrator};
use std::path::Path;

pub mod agents;
pub mod serve;
pub mod submit;
pub mod tasks;
pub mod validate;

pub(crate) fn orchestrator(config: Config) -> Result<Orchestrator, CliError> {
    let ctx = EngineContext::builder(config).build()?;
    Ok(Orchestrator::new(ctx))
}

pub(crate) fn load_workflow(path: &Path) -> Result<WorkflowConfig, CliError> {
    let source = fs_err::read_to_string(path)?;
    Ok(WorkflowConfig::from_yaml(&source)?)
}

pub(crate) fn colored_state(state: TaskState) -> ColoredString {
    let text = state.to_string();
    match state {
        TaskState::Created => text.normal(),
        TaskState::Running => text.cyan(),
        TaskState::Completed => text.green(),
        TaskState::Failure | TaskState::Timeout => text.red(),
        TaskState::Canceled => text.yellow(),
    }
}
