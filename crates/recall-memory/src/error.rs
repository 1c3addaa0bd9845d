use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Malformed graph record at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Entity not found: {name}")]
    EntityNotFound { name: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Memory transport failed: {0}")]
    Transport(String),
}
