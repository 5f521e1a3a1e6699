use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    /// A migration unit reported failure or raised an error while running.
    /// `output` carries whatever the unit produced, for diagnosis.
    #[error(
        "migration {version} failed for module {module} after {:.3}s: {output}",
        .elapsed.as_secs_f64()
    )]
    Execution {
        module: String,
        version: String,
        output: String,
        elapsed: Duration,
    },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came from running migration code rather than from
    /// the engine's own plumbing.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }
}
