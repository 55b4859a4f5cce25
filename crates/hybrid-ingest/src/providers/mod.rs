//! Provider abstractions for the external collaborators of the pipeline
//!
//! Parsing, vision, embedding, vector storage and graph extraction all sit
//! behind async traits so backends can be swapped without touching the
//! pipeline. `mock` holds deterministic in-memory implementations.

pub mod embedding;
pub mod graph_store;
pub mod mock;
pub mod parser;
pub mod vector_store;
pub mod vision;

pub use embedding::EmbeddingProvider;
pub use graph_store::GraphStoreProvider;
pub use parser::DocumentParser;
pub use vector_store::VectorStoreProvider;
pub use vision::VisionProvider;
