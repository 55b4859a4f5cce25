//! Section extraction, image matching and adaptive chunking

mod chunker;
pub mod images;
pub mod sections;
pub mod tokenizer;

pub use chunker::{adaptive_chunking, AdaptiveChunker};
pub use images::{integrate_images, iou, IntegrationReport, IOU_MATCH_THRESHOLD};
pub use sections::{HeadingStrategy, SectionExtractor, FALLBACK_HEADING};
pub use tokenizer::{HfTokenCounter, TokenCounter, TokenizerRegistry, WordTokenCounter};
