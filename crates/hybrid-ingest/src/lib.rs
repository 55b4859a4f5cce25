//! hybrid-ingest: streaming ingestion of parsed documents into a hybrid
//! vector + knowledge-graph store
//!
//! A document flows through resource check, parsing, image enrichment,
//! section-aware adaptive chunking, embedding and graph extraction. The last
//! two stages run as bounded producer/consumer worker pools. Every document
//! carries a [`processing::PipelineState`] recording stage status, timing,
//! errors and retries, and progress is published as throttled snapshots.
//!
//! External services (parser, vision model, embedder, vector store, graph
//! store) are reached through the async traits in [`providers`].

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod telemetry;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use ingestion::{adaptive_chunking, integrate_images, AdaptiveChunker, SectionExtractor};
pub use processing::{
    DocumentPipeline, DocumentReport, PipelineState, ProgressSnapshot, QueueMessage, StageQueue,
    StreamingOrchestrator,
};
pub use types::{Chunk, DocumentSource, Section, Stage, StageStatus};
