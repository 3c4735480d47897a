use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Admission attempted after `end_service`.
    #[error("scheduler is shutting down, cannot add new tasks")]
    ShuttingDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
