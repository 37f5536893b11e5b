/// Shared error type used across all relay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("run cancelled")]
    Cancelled,

    /// Sentinel raised by tools (or the `end_run` tool) to terminate the
    /// step loop with a completed status. Not a failure.
    #[error("end of run requested")]
    EndRun,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
