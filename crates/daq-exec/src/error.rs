use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("spawned process has no pid")]
    NoPid,
    #[error("signal to process group {pgid} failed: {reason}")]
    Signal { pgid: i32, reason: String },
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
