use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] orchard_core::errors::ConfigError),

    #[error(transparent)]
    Configuration(#[from] orchard_core::errors::ConfigurationError),

    #[error(transparent)]
    Executor(#[from] orchard_executor::ExecutorError),

    #[error("Failed to parse job ID from '{0}'")]
    JobIdParse(String),

    #[error("Scheduler on '{agent}' returned no output for '{command}'")]
    EmptySubmission { agent: String, command: String },

    #[error("Failed to write job manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
