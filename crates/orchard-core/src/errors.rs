use crate::model::{Guid, TaskState};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Agent '{0}' is not defined in the configuration.")]
    AgentNotFound(String),

    #[error("Could not determine the {0} directory.")]
    DirectoryNotFound(&'static str),
}

/// Every problem found in a workflow configuration, collected in one pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid workflow configuration: {}", errors.join("; "))]
pub struct ConfigurationError {
    pub errors: Vec<String>,
}

impl ConfigurationError {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Task '{guid}' cannot move from {from} to {to}.")]
    IllegalTransition {
        guid: Guid,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task '{guid}' already has job id '{existing}'.")]
    JobIdAlreadySet { guid: Guid, existing: String },
}
