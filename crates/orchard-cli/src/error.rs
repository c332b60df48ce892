use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] orchard_core::errors::ConfigError),

    #[error(transparent)]
    Workflow(#[from] orchard_core::errors::ConfigurationError),

    #[error(transparent)]
    Engine(#[from] orchard_engine::EngineError),

    #[error(transparent)]
    Client(#[from] orchard_client::ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("No owner given. Pass --owner or set USER.")]
    MissingOwner,
}
