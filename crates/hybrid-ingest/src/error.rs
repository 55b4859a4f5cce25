//! Error types for the ingestion pipeline

use thiserror::Error;

use crate::types::{Severity, Stage};

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input file is missing, empty or unreadable
    #[error("Invalid input '{filename}': {message}")]
    InvalidInput { filename: String, message: String },

    /// Document parsing service failed
    #[error("Failed to parse file '{filename}': {message}")]
    Parse { filename: String, message: String },

    /// Nothing left to ingest after section extraction and its fallbacks
    #[error("No extractable content in '{0}'")]
    EmptyContent(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Graph store / entity extraction error
    #[error("Graph extraction error: {0}")]
    Graph(String),

    /// Vision description error
    #[error("Image description failed: {0}")]
    Vision(String),

    /// Tokenizer loading or encoding error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// A collaborator did not answer a health check
    #[error("{service} is unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// A unit of work exceeded its stage timeout
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    /// Illegal stage status change
    #[error("Invalid transition for {stage}: {from} -> {to}")]
    InvalidTransition {
        stage: Stage,
        from: &'static str,
        to: &'static str,
    },

    /// A stage ran and ended in failure
    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    /// Put on a queue that was already marked done
    #[error("Queue '{0}' is closed")]
    QueueClosed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create a graph extraction error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph(message.into())
    }

    /// Create a vision error
    pub fn vision(message: impl Into<String>) -> Self {
        Self::Vision(message.into())
    }

    /// Create an unavailable-service error
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a stage failure
    pub fn stage_failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Severity used when this error is appended to a pipeline state.
    ///
    /// Image description problems are advisory; everything else is an error.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Vision(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Error::vision("no model").severity(), Severity::Warning);
        assert_eq!(Error::embedding("down").severity(), Severity::Error);
        assert_eq!(
            Error::Timeout { stage: Stage::Embedding, secs: 5 }.severity(),
            Severity::Error
        );
    }

    #[test]
    fn test_display() {
        let err = Error::Timeout { stage: Stage::GraphExtraction, secs: 30 };
        assert_eq!(err.to_string(), "graph_extraction timed out after 30s");

        let err = Error::invalid_input("a.pdf", "empty file");
        assert_eq!(err.to_string(), "Invalid input 'a.pdf': empty file");
    }
}
