use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("command data is nil")]
    MissingCommand,
    #[error("invalid command data: {0}")]
    InvalidCommand(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}
