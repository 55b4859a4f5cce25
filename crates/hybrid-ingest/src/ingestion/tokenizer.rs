//! Pluggable token counting
//!
//! The section extractor and chunker receive a [`TokenCounter`] at
//! construction. Loading a Hugging Face tokenizer is expensive, so loaded
//! counters are cached per model id in a [`TokenizerRegistry`].

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

/// Text -> token count
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Model identifier, for logging
    fn name(&self) -> &str;
}

/// Counts Unicode words. Used when no tokenizer file is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenCounter;

impl TokenCounter for WordTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.unicode_words().count()
    }

    fn name(&self) -> &str {
        "unicode-words"
    }
}

/// Token counter backed by a `tokenizer.json`
pub struct HfTokenCounter {
    model: String,
    tokenizer: tokenizers::Tokenizer,
}

impl HfTokenCounter {
    pub fn from_file(model: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| Error::Tokenizer(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self {
            model: model.into(),
            tokenizer,
        })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!("[{}] encode failed, counting words instead: {}", self.model, e);
                WordTokenCounter.count(text)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

static PROCESS_REGISTRY: Lazy<TokenizerRegistry> = Lazy::new(TokenizerRegistry::new);

/// Cache of loaded token counters keyed by model id
#[derive(Default)]
pub struct TokenizerRegistry {
    counters: DashMap<String, Arc<dyn TokenCounter>>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Registry shared by the whole process
    pub fn process_wide() -> &'static TokenizerRegistry {
        &PROCESS_REGISTRY
    }

    /// Return the cached counter for `model`, loading it on first use
    pub fn get_or_load<F>(&self, model: &str, load: F) -> Result<Arc<dyn TokenCounter>>
    where
        F: FnOnce() -> Result<Arc<dyn TokenCounter>>,
    {
        if let Some(existing) = self.counters.get(model) {
            return Ok(existing.clone());
        }

        let counter = load()?;
        // A concurrent loader may have won; keep whichever landed first
        let entry = self
            .counters
            .entry(model.to_string())
            .or_insert_with(|| counter);
        Ok(entry.value().clone())
    }

    /// Resolve the counter described by the chunking configuration
    pub fn for_config(&self, config: &ChunkingConfig) -> Result<Arc<dyn TokenCounter>> {
        match &config.tokenizer_path {
            Some(path) => self.get_or_load(&config.tokenizer_model, || {
                tracing::info!(
                    "Loading tokenizer '{}' from {}",
                    config.tokenizer_model,
                    path.display()
                );
                let counter = HfTokenCounter::from_file(config.tokenizer_model.clone(), path)?;
                Ok(Arc::new(counter) as Arc<dyn TokenCounter>)
            }),
            None => self.get_or_load(&config.tokenizer_model, || {
                Ok(Arc::new(WordTokenCounter) as Arc<dyn TokenCounter>)
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
