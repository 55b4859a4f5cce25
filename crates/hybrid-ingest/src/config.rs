//! Configuration for the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main ingestion configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Section chunking bounds
    pub chunking: ChunkingConfig,
    /// Stage-to-stage queue capacities
    pub queues: QueueConfig,
    /// Worker pool sizes
    pub workers: WorkerConfig,
    /// Per-item timeouts
    pub timeouts: TimeoutConfig,
    /// Per-document retry policy
    pub retry: RetryConfig,
    /// Progress emission
    pub progress: ProgressConfig,
    /// Memory budget checks
    pub resources: ResourceConfig,
    /// Vector store writes
    pub vector_store: VectorStoreConfig,
}

impl IngestConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML text. Missing tables fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: IngestConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.min_tokens == 0 || c.min_tokens > c.max_tokens {
            return Err(Error::Config(format!(
                "chunking.min_tokens ({}) must be in 1..=max_tokens ({})",
                c.min_tokens, c.max_tokens
            )));
        }
        if c.large_section_threshold == 0 || c.large_section_threshold > c.max_tokens {
            return Err(Error::Config(format!(
                "chunking.large_section_threshold ({}) must be in 1..=max_tokens ({})",
                c.large_section_threshold, c.max_tokens
            )));
        }
        if self.queues.chunk_capacity == 0 || self.queues.embedding_capacity == 0 {
            return Err(Error::Config("queue capacities must be at least 1".to_string()));
        }
        for (name, value) in [
            ("workers.embedding", self.workers.embedding),
            ("workers.extraction", self.workers.extraction),
            ("workers.vision", self.workers.vision),
        ] {
            if value == Some(0) {
                return Err(Error::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.vector_store.upsert_batch_size == 0 {
            return Err(Error::Config(
                "vector_store.upsert_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Section chunking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Chunks below this many tokens are flagged as undersized
    pub min_tokens: usize,
    /// Upper bound for a merged batch of small sections
    pub max_tokens: usize,
    /// Sections above this many tokens are never merged
    pub large_section_threshold: usize,
    /// Tokenizer model identifier used for token counts
    pub tokenizer_model: String,
    /// Optional `tokenizer.json` for `tokenizer_model`; word counting otherwise
    pub tokenizer_path: Option<std::path::PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: 800,
            max_tokens: 1800,
            large_section_threshold: 1200,
            tokenizer_model: "unicode-words".to_string(),
            tokenizer_path: None,
        }
    }
}

/// Bounded queue capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Chunks awaiting embedding
    pub chunk_capacity: usize,
    /// Embedded chunks awaiting extraction
    pub embedding_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 64,
            embedding_capacity: 32,
        }
    }
}

/// Worker pool sizes. `None` picks a default from the CPU count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub embedding: Option<usize>,
    pub extraction: Option<usize>,
    pub vision: Option<usize>,
}

impl WorkerConfig {
    pub fn embedding_workers(&self) -> usize {
        self.embedding.unwrap_or_else(|| num_cpus::get().min(4))
    }

    pub fn extraction_workers(&self) -> usize {
        self.extraction.unwrap_or_else(|| num_cpus::get().min(2))
    }

    pub fn vision_workers(&self) -> usize {
        self.vision.unwrap_or(1)
    }
}

/// Per-item timeouts in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-document parse
    pub parse_secs: u64,
    /// One picture description
    pub describe_secs: u64,
    /// One chunk embedding
    pub embed_secs: u64,
    /// One chunk extraction
    pub extract_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            parse_secs: 300,
            describe_secs: 60,
            embed_secs: 60,
            extract_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn parse(&self) -> Duration {
        Duration::from_secs(self.parse_secs)
    }

    pub fn describe(&self) -> Duration {
        Duration::from_secs(self.describe_secs)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn extract(&self) -> Duration {
        Duration::from_secs(self.extract_secs)
    }
}

/// Per-document retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before attempt `n` is `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

/// Progress snapshot emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Minimum interval between two emitted snapshots
    pub min_emit_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_emit_interval_ms: 250,
        }
    }
}

/// Memory budget checked before parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Below this, worker pools shrink to a single worker
    pub min_available_memory_mb: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            min_available_memory_mb: 1024,
        }
    }
}

/// Vector store write configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Points per upsert call, per embedding worker
    pub upsert_batch_size: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: 16,
        }
    }
}
