//! Section-aware adaptive chunking
//!
//! Small neighbouring sections are merged up to `max_tokens`; sections above
//! `large_section_threshold` always stand alone. Document order is never
//! changed.

use crate::config::ChunkingConfig;
use crate::types::{Chunk, Section};

/// Adaptive chunker with configurable token bounds
#[derive(Debug, Clone)]
pub struct AdaptiveChunker {
    /// Chunks below this are flagged undersized
    min_tokens: usize,
    /// Upper bound for a merged batch
    max_tokens: usize,
    /// Sections above this are emitted on their own
    large_threshold: usize,
}

impl AdaptiveChunker {
    /// Create a new chunker
    pub fn new(min_tokens: usize, max_tokens: usize, large_threshold: usize) -> Self {
        Self {
            min_tokens,
            max_tokens,
            large_threshold,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(
            config.min_tokens,
            config.max_tokens,
            config.large_section_threshold,
        )
    }

    /// Partition sections into chunks, preserving order
    pub fn chunk(&self, sections: &[Section]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut batch: Vec<Section> = Vec::new();
        let mut batch_tokens = 0usize;

        for section in sections {
            if section.token_count > self.large_threshold {
                self.flush(&mut batch, &mut batch_tokens, &mut chunks);
                chunks.push(Chunk::from_sections(
                    chunks.len(),
                    std::slice::from_ref(section),
                    self.min_tokens,
                ));
                continue;
            }

            if !batch.is_empty() && batch_tokens + section.token_count > self.max_tokens {
                self.flush(&mut batch, &mut batch_tokens, &mut chunks);
            }
            batch_tokens += section.token_count;
            batch.push(section.clone());
        }

        self.flush(&mut batch, &mut batch_tokens, &mut chunks);

        tracing::debug!(
            "Chunked {} sections into {} chunks ({} undersized)",
            sections.len(),
            chunks.len(),
            chunks.iter().filter(|c| c.metadata.undersized).count()
        );

        chunks
    }

    fn flush(&self, batch: &mut Vec<Section>, batch_tokens: &mut usize, chunks: &mut Vec<Chunk>) {
        if batch.is_empty() {
            return;
        }
        chunks.push(Chunk::from_sections(chunks.len(), batch, self.min_tokens));
        batch.clear();
        *batch_tokens = 0;
    }
}

impl Default for AdaptiveChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Functional form of [`AdaptiveChunker::chunk`]
pub fn adaptive_chunking(
    sections: &[Section],
    min_tokens: usize,
    max_tokens: usize,
    large_threshold: usize,
) -> Vec<Chunk> {
    AdaptiveChunker::new(min_tokens, max_tokens, large_threshold).chunk(sections)
}
