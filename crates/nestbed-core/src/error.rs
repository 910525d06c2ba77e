use thiserror::Error;

#[derive(Debug, Error)]
pub enum NestbedError {
    // Container runtime / network / image / sidecar
    #[error("Runtime error on {resource}: {message}")]
    Runtime { resource: String, message: String },

    // Host ports
    #[error("Port allocation error: {0}")]
    PortAllocation(String),

    // Database liveness
    #[error("Connection error: {0}")]
    Connection(String),

    // Lifecycle
    #[error("Cannot {operation}: {state}")]
    InvalidState { operation: String, state: String },

    #[error("Cancelled before {0}")]
    Cancelled(String),

    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0}; run `nestbed init` first")]
    ConfigNotFound(String),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

impl NestbedError {
    /// Build a runtime error that names the resource it failed on.
    pub fn runtime(resource: impl Into<String>, err: impl std::fmt::Display) -> Self {
        NestbedError::Runtime {
            resource: resource.into(),
            message: format!("{err:#}"),
        }
    }

    /// `state` completes the sentence "Cannot <operation>: <state>".
    pub fn invalid_state(operation: &str, state: impl std::fmt::Display) -> Self {
        NestbedError::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, NestbedError::Runtime { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, NestbedError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, NestbedError>;
