use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown scope '{name}'")]
    UnknownScope { name: String },

    #[error("Invalid aggregate key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid timestamp '{value}' in delta record {id}")]
    InvalidTimestamp { id: i64, value: String },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RollupResult<T> = Result<T, RollupError>;
