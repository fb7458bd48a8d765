use thiserror::Error;

/// Top-level error type for Cinegraph operations.
#[derive(Debug, Error)]
pub enum CinegraphError {
    // --- Hard dependency errors (run cannot continue) ---
    #[error("Neo4j error: {0}")]
    Neo4j(String),

    #[error("Source error: {0}")]
    Source(String),

    // --- Pipeline errors ---
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Batch commit error: {0}")]
    BatchCommit(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl CinegraphError {
    /// Whether this error comes from an external dependency (store or feed)
    /// rather than from the data itself.
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::Neo4j(_) | Self::Source(_))
    }

    /// Whether this error was caused by the contents of a source row.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

/// Result type alias for Cinegraph operations.
pub type Result<T> = std::result::Result<T, CinegraphError>;
