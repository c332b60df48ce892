use orchard_core::model::{Guid, Stage};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] orchard_core::errors::ConfigError),

    #[error(transparent)]
    Configuration(#[from] orchard_core::errors::ConfigurationError),

    #[error(transparent)]
    State(#[from] orchard_core::errors::StateError),

    #[error(transparent)]
    Executor(#[from] orchard_executor::ExecutorError),

    #[error(transparent)]
    Client(#[from] orchard_client::ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize task data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task '{0}' not found.")]
    NotFound(Guid),

    #[error("Storage error at '{path}': {message}")]
    Storage { path: String, message: String },

    #[error("{0}")]
    TransferVerification(String),

    #[error("{0}")]
    DeadlineExceeded(String),

    #[error("Task '{0}' has no submitted job to poll.")]
    NoJob(Guid),

    #[error("Stage {stage} exceeded its time limit of {limit:?}.")]
    StageTimedOut { stage: Stage, limit: Duration },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
