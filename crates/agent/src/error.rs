use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("file {0} not found")]
    FileNotFound(String),

    #[error("file {0} is no longer available on disk")]
    FileUnavailable(String),

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("agent is not registered with the directory")]
    NotRegistered,

    #[error("directory request failed: {0}")]
    Directory(#[from] reqwest::Error),

    #[error("directory responded with status {0}")]
    DirectoryStatus(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
