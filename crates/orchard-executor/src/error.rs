use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] orchard_core::errors::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not reach '{target}': {message}")]
    Connectivity { target: String, message: String },

    #[error("Command '{command}' on '{target}' failed with exit code {code}.\n--- STDERR ---\n{stderr}")]
    CommandFailed {
        target: String,
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Command '{command}' on '{target}' wrote to stderr:\n{stderr}")]
    UnexpectedStderr {
        target: String,
        command: String,
        stderr: String,
    },

    #[error("Failed to upload '{path}' to '{target}': {message}")]
    UploadFailed {
        target: String,
        path: String,
        message: String,
    },
}

impl ExecutorError {
    /// Network-layer failures; these are the only errors worth retrying.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ExecutorError::Connectivity { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
