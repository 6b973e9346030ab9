use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("invalid index parameters: {0}")]
    InvalidParams(String),

    #[error("unknown document '{0}'")]
    UnknownDocument(String),

    #[error("write-ahead log error: {0}")]
    Wal(#[source] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
