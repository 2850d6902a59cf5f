use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("retry scheduler is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RetryError>;

/// Failure signal returned by a message handler.
///
/// Any error type works; the scheduler only logs it and reschedules.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
