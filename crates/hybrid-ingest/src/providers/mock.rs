//! In-memory collaborators for tests and local experiments
//!
//! Every mock is deterministic. Failures can be injected either globally
//! (`failing`) or for texts containing a marker string (`fail_on`).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{DocumentParser, EmbeddingProvider, GraphStoreProvider, VectorStoreProvider, VisionProvider};
use crate::error::{Error, Result};
use crate::types::{
    DocumentSource, Embedding, ExtractionOutcome, GraphRecord, ImageBitmap, ParsedDocument,
    SparseVector, VectorPoint,
};

fn simple_hash(text: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in text.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

/// Returns a fixed parsed document, optionally failing the first `n` calls
pub struct MockParser {
    document: ParsedDocument,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MockParser {
    pub fn new(document: ParsedDocument) -> Self {
        Self {
            document,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` parse calls
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentParser for MockParser {
    async fn parse(&self, source: &DocumentSource) -> Result<ParsedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::parse(&source.filename, "parser service unavailable"));
        }
        let mut document = self.document.clone();
        document.filename = source.filename.clone();
        Ok(document)
    }

    fn name(&self) -> &str {
        "mock-parser"
    }
}

/// Deterministic hash-based embeddings
pub struct MockEmbedder {
    dimensions: usize,
    hybrid: bool,
    latency: Duration,
    fail_on: Option<String>,
    healthy: bool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            hybrid: false,
            latency: Duration::ZERO,
            fail_on: None,
            healthy: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Return dense + sparse embeddings
    pub fn hybrid(mut self) -> Self {
        self.hybrid = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every text containing `marker`
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on = Some(marker.into());
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn dense(&self, text: &str) -> Vec<f32> {
        let hash = simple_hash(text);
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                ((hash.wrapping_add(i as u64).wrapping_mul(2654435761)) % 10000) as f32 / 10000.0 - 0.5
            })
            .collect();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn sparse(&self, text: &str) -> SparseVector {
        let mut indices: Vec<u32> = text
            .split_whitespace()
            .map(|w| (simple_hash(&w.to_lowercase()) % 30_000) as u32)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        let values = vec![1.0; indices.len()];
        SparseVector { indices, values }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(Error::embedding(format!("refused text containing '{}'", marker)));
            }
        }
        let dense = self.dense(text);
        Ok(if self.hybrid {
            Embedding::hybrid(dense, self.sparse(text))
        } else {
            Embedding::dense(dense)
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }

    fn name(&self) -> &str {
        "mock-embedder"
    }
}

/// Keeps upserted points in memory
#[derive(Default)]
pub struct MockVectorStore {
    points: Mutex<Vec<VectorPoint>>,
    upsert_calls: AtomicUsize,
    fail_on: Option<String>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any batch containing a point whose text includes `marker`
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on = Some(marker.into());
        self
    }

    pub fn points(&self) -> Vec<VectorPoint> {
        self.points.lock().clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStoreProvider for MockVectorStore {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_on {
            let rejected = points.iter().any(|p| {
                p.payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .is_some_and(|t| t.contains(marker.as_str()))
            });
            if rejected {
                return Err(Error::vector_store("batch rejected"));
            }
        }

        let mut stored = self.points.lock();
        for point in points {
            stored.retain(|p| p.id != point.id);
            stored.push(point.clone());
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &Uuid) -> Result<usize> {
        let id = document_id.to_string();
        let mut stored = self.points.lock();
        let before = stored.len();
        stored.retain(|p| p.payload.get("document_id").and_then(|v| v.as_str()) != Some(id.as_str()));
        Ok(before - stored.len())
    }

    fn name(&self) -> &str {
        "mock-vector-store"
    }
}

/// Counts capitalized words as entities, adjacent pairs as relations
#[derive(Default)]
pub struct MockGraphStore {
    records: Mutex<Vec<(String, GraphRecord)>>,
    fail_on: Option<String>,
    latency: Duration,
}

impl MockGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on = Some(marker.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `(namespace, record)` pairs received so far
    pub fn records(&self) -> Vec<(String, GraphRecord)> {
        self.records.lock().clone()
    }

    /// Outcome this store reports for a text
    pub fn outcome_for(text: &str) -> ExtractionOutcome {
        let entities = text
            .split_whitespace()
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
            .count();
        ExtractionOutcome {
            entities,
            relations: entities.saturating_sub(1),
        }
    }
}

#[async_trait]
impl GraphStoreProvider for MockGraphStore {
    async fn insert_records(&self, namespace: &str, records: &[GraphRecord]) -> Result<ExtractionOutcome> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut outcome = ExtractionOutcome::default();
        for record in records {
            if let Some(marker) = &self.fail_on {
                if record.text.contains(marker.as_str()) {
                    return Err(Error::graph(format!("extraction failed for record {}", record.index)));
                }
            }
            outcome += Self::outcome_for(&record.text);
        }

        let mut stored = self.records.lock();
        stored.extend(records.iter().cloned().map(|r| (namespace.to_string(), r)));
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "mock-graph-store"
    }
}

/// Describes a picture by its size
pub struct MockVision {
    failing: bool,
}

impl MockVision {
    pub fn new() -> Self {
        Self { failing: false }
    }

    pub fn failing() -> Self {
        Self { failing: true }
    }
}

impl Default for MockVision {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionProvider for MockVision {
    async fn describe(&self, image: &ImageBitmap) -> Result<String> {
        if self.failing {
            return Err(Error::vision("vision model not loaded"));
        }
        Ok(format!("A {} image of {} bytes", image.mime_type, image.data.len()))
    }

    fn model(&self) -> &str {
        "mock-vision"
    }
}
