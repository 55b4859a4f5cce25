//! Core data types

pub mod document;
pub mod embedding;
pub mod geometry;
pub mod parsed;
pub mod stage;

pub use document::{
    Chunk, ChunkKind, ChunkMetadata, DocumentSource, FileType, ImageAnnotation, ImageDescription,
    Section, SectionMetadata,
};
pub use embedding::{EmbeddedChunk, Embedding, ExtractionOutcome, GraphRecord, SparseVector, VectorPoint};
pub use geometry::{BoundingBox, PageSize};
pub use parsed::{DocNode, ImageBitmap, NodeLabel, ParsedDocument, ParsedPicture, TextFormatting};
pub use stage::{Severity, Stage, StageStatus};
