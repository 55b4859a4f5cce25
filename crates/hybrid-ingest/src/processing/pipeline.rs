//! Per-document pipeline driver
//!
//! Sequences resource check, parsing, enrichment, chunking and the streaming
//! embedding/extraction stages for one document, records every outcome on
//! the document's `PipelineState` and retries failed attempts from the first
//! stage that did not complete.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

use super::orchestrator::{OrchestratorSettings, StreamInput, StreamingOrchestrator};
use super::progress::{ProgressSink, ProgressTracker, ThrottledEmitter, TracingProgressSink};
use super::resources::{check_memory, MemoryVerdict, ResourceMonitor, SystemResourceMonitor};
use super::state::{PipelineState, StageError};
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingestion::{integrate_images, AdaptiveChunker, SectionExtractor, TokenizerRegistry};
use crate::providers::{
    DocumentParser, EmbeddingProvider, GraphStoreProvider, VectorStoreProvider, VisionProvider,
};
use crate::types::{
    Chunk, DocumentSource, EmbeddedChunk, ImageDescription, ParsedDocument, Stage, StageStatus,
};

/// Final per-stage figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub status: StageStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: Option<u64>,
}

/// Outcome of ingesting one document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub filename: String,
    pub namespace: String,
    pub content_hash: String,
    pub status: StageStatus,
    /// Attempts made, including the first
    pub attempts: u32,
    pub progress: f64,
    pub stages: BTreeMap<Stage, StageReport>,
    /// Chunks produced by the chunker
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub errors: Vec<StageError>,
}

impl DocumentReport {
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Intermediate results kept across attempts so a retry resumes where the
/// previous attempt stopped
#[derive(Default)]
struct Artifacts {
    memory_low: bool,
    parsed: Option<ParsedDocument>,
    descriptions: Option<Vec<ImageDescription>>,
    chunks: Option<Vec<Chunk>>,
    embedded: Option<Vec<EmbeddedChunk>>,
}

/// Ingests documents through all stages
pub struct DocumentPipeline {
    config: IngestConfig,
    parser: Arc<dyn DocumentParser>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    graph_store: Arc<dyn GraphStoreProvider>,
    vision: Option<Arc<dyn VisionProvider>>,
    monitor: Arc<dyn ResourceMonitor>,
    sink: Arc<dyn ProgressSink>,
    tokenizers: &'static TokenizerRegistry,
}

impl DocumentPipeline {
    pub fn new(
        config: IngestConfig,
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        graph_store: Arc<dyn GraphStoreProvider>,
    ) -> Self {
        Self {
            config,
            parser,
            embedder,
            vector_store,
            graph_store,
            vision: None,
            monitor: Arc::new(SystemResourceMonitor::new()),
            sink: Arc::new(TracingProgressSink),
            tokenizers: TokenizerRegistry::process_wide(),
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_resource_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest several documents under one batch id, at most `parallel`
    /// at a time. Reports come back in input order.
    pub async fn ingest_batch(&self, sources: Vec<DocumentSource>, parallel: usize) -> Vec<DocumentReport> {
        let batch_id = Uuid::new_v4();
        let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
        tracing::info!("Batch {}: ingesting {} documents", batch_id, sources.len());

        let futures: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    self.ingest(source.with_batch(batch_id)).await
                }
            })
            .collect();

        let reports = join_all(futures).await;
        let failed = reports.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            "Batch {}: {} completed, {} failed",
            batch_id,
            reports.len() - failed,
            failed
        );
        reports
    }

    /// Ingest one document. Failures are reported, never returned.
    pub async fn ingest(&self, source: DocumentSource) -> DocumentReport {
        let filename = source.filename.clone();
        let state = PipelineState::new(source.id, source.batch_id, self.config.retry.max_retries);
        let tracker = ProgressTracker::new(state).with_emitter(ThrottledEmitter::new(
            self.sink.clone(),
            Duration::from_millis(self.config.progress.min_emit_interval_ms),
        ));

        tracing::info!(
            "[{}] Starting ingestion ({} bytes, namespace '{}')",
            filename,
            source.data.len(),
            source.namespace
        );

        let mut artifacts = Artifacts::default();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.run_attempt(&source, &tracker, &mut artifacts).await {
                Ok(()) => break,
                Err(e) => e,
            };

            tracing::error!("[{}] Attempt {} failed: {}", filename, attempts, error);
            if !is_retryable(&error) {
                tracing::error!("[{}] Not retrying: {}", filename, error);
                break;
            }
            let retry = tracker.with_state(|s| {
                if s.should_retry() {
                    s.record_retry();
                    Some(s.retry_count)
                } else {
                    None
                }
            });
            let Some(retry) = retry else {
                tracing::error!("[{}] Giving up after {} attempts", filename, attempts);
                break;
            };

            let delay = Duration::from_millis(self.config.retry.backoff_ms * retry as u64);
            let resume = tracker
                .with_state(|s| s.resume_stage())
                .unwrap_or(Stage::ResourceCheck);
            tracing::warn!(
                "[{}] Retry {}/{} from {} in {}ms",
                filename,
                retry,
                self.config.retry.max_retries,
                resume,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        tracker.publish(true);
        let report = build_report(&source, &tracker, attempts, &artifacts);
        match report.status {
            StageStatus::Completed => tracing::info!(
                "[{}] COMPLETE: {} chunks, {} entities, {} relations ({} errors recorded)",
                filename,
                report.chunks,
                report.entities,
                report.relations,
                report.errors.len()
            ),
            status => tracing::error!("[{}] Ingestion ended as {}", filename, status),
        }
        report
    }

    /// One pass over every stage that has not completed yet
    async fn run_attempt(
        &self,
        source: &DocumentSource,
        tracker: &ProgressTracker,
        artifacts: &mut Artifacts,
    ) -> Result<()> {
        if !is_completed(tracker, Stage::ResourceCheck) {
            artifacts.memory_low = self
                .run_stage(tracker, Stage::ResourceCheck, self.check_resources(source, tracker))
                .await?;
        }

        if !is_completed(tracker, Stage::Parsing) || artifacts.parsed.is_none() {
            tracker.begin_items(Stage::Parsing, 1);
            let parsed = self
                .run_stage(tracker, Stage::Parsing, self.parse(source))
                .await
                .inspect_err(|_| tracker.count_failed(Stage::Parsing))?;
            tracker.record_success(Stage::Parsing);
            artifacts.parsed = Some(parsed);
        }
        let parsed = artifacts
            .parsed
            .as_ref()
            .ok_or_else(|| Error::internal("parsed document missing"))?;

        if !is_completed(tracker, Stage::Enrichment) || artifacts.descriptions.is_none() {
            let workers = if artifacts.memory_low {
                1
            } else {
                self.config.workers.vision_workers()
            };
            let descriptions = self
                .run_stage(tracker, Stage::Enrichment, self.enrich(parsed, tracker, workers))
                .await?;
            artifacts.descriptions = Some(descriptions);
        }

        if !is_completed(tracker, Stage::Chunking) || artifacts.chunks.is_none() {
            let descriptions = artifacts.descriptions.clone().unwrap_or_default();
            let chunks = self
                .run_stage(tracker, Stage::Chunking, async {
                    self.chunk(parsed, descriptions, tracker)
                })
                .await?;
            artifacts.chunks = Some(chunks);
        }

        let input = match (&artifacts.embedded, tracker.with_state(|s| s.status(Stage::Embedding))) {
            (Some(embedded), StageStatus::Completed) => StreamInput::Embedded(embedded.clone()),
            _ => {
                if tracker.with_state(|s| s.retry_count) > 0 {
                    self.clear_stored_points(source).await;
                }
                StreamInput::Chunks(artifacts.chunks.clone().unwrap_or_default())
            }
        };

        let mut settings = OrchestratorSettings::from_config(&self.config);
        if artifacts.memory_low {
            settings = settings.clamp_workers(1);
        }
        let orchestrator = StreamingOrchestrator::new(
            self.embedder.clone(),
            self.vector_store.clone(),
            self.graph_store.clone(),
            settings,
        );
        let output = orchestrator
            .run(&source.filename, &source.namespace, input, tracker)
            .await?;

        if tracker.with_state(|s| s.status(Stage::Embedding)) == StageStatus::Completed {
            artifacts.embedded = Some(output.embedded);
        }
        match output.fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run a single-shot stage, recording its transitions and outcome
    async fn run_stage<T>(
        &self,
        tracker: &ProgressTracker,
        stage: Stage,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tracker.with_state(|s| s.start(stage))?;
        tracker.publish(false);

        let result = work.await;
        match &result {
            Ok(_) => tracker.with_state(|s| s.complete(stage))?,
            Err(e) => {
                tracing::error!("Stage {} failed: {}", stage, e);
                tracker.with_state(|s| s.fail(stage, e.to_string()))?;
            }
        }
        tracker.publish(false);
        result
    }

    /// Returns whether memory is low
    async fn check_resources(&self, source: &DocumentSource, tracker: &ProgressTracker) -> Result<bool> {
        tracker.begin_items(Stage::ResourceCheck, 1);
        if let Err(e) = self.config.validate() {
            tracing::error!("[{}] Invalid configuration: {}", source.filename, e);
            tracker.count_failed(Stage::ResourceCheck);
            return Err(e);
        }
        let required_mb = self.config.resources.min_available_memory_mb;

        let memory_low = match check_memory(self.monitor.as_ref(), required_mb) {
            MemoryVerdict::Sufficient(available_mb) => {
                tracing::debug!("[{}] {} MiB available", source.filename, available_mb);
                false
            }
            MemoryVerdict::Low { available_mb, required_mb } => {
                let message = format!(
                    "only {} MiB available (want {} MiB), running single worker pools",
                    available_mb, required_mb
                );
                tracing::warn!("[{}] {}", source.filename, message);
                tracker.record_warning(Stage::ResourceCheck, message);
                true
            }
            MemoryVerdict::Unknown => {
                tracing::debug!("[{}] Available memory unknown", source.filename);
                false
            }
        };

        let name = self.embedder.name().to_string();
        let health = timeout(self.config.timeouts.embed(), self.embedder.health_check()).await;
        let result = match health {
            Ok(Ok(true)) => Ok(memory_low),
            Ok(Ok(false)) => Err(Error::unavailable(name, "health check failed")),
            Ok(Err(e)) => Err(Error::unavailable(name, e.to_string())),
            Err(_) => Err(Error::unavailable(name, "health check timed out")),
        };
        match &result {
            Ok(_) => tracker.record_success(Stage::ResourceCheck),
            Err(_) => tracker.count_failed(Stage::ResourceCheck),
        }
        result
    }

    async fn parse(&self, source: &DocumentSource) -> Result<ParsedDocument> {
        let timeout_duration = self.config.timeouts.parse();
        let result = async {
            if source.data.is_empty() {
                return Err(Error::invalid_input(&source.filename, "file is empty"));
            }
            let file_type = source.file_type();
            if !file_type.is_supported() {
                return Err(Error::invalid_input(
                    &source.filename,
                    format!("unsupported file type '{}'", file_type.as_str()),
                ));
            }

            tracing::info!(
                "[{}] Parsing with {} (sha256 {})",
                source.filename,
                self.parser.name(),
                source.content_hash()
            );
            match timeout(timeout_duration, self.parser.parse(source)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        "[{}] TIMEOUT: Parser took >{}s",
                        source.filename,
                        timeout_duration.as_secs()
                    );
                    Err(Error::Timeout {
                        stage: Stage::Parsing,
                        secs: timeout_duration.as_secs(),
                    })
                }
            }
        }
        .await;

        result.inspect(|parsed| {
            tracing::info!(
                "[{}] Parsed {} pages, {} pictures",
                source.filename,
                parsed.pages.len(),
                parsed.pictures.len()
            );
        })
    }

    /// Describe every picture. Individual failures are warnings.
    async fn enrich(
        &self,
        parsed: &ParsedDocument,
        tracker: &ProgressTracker,
        workers: usize,
    ) -> Result<Vec<ImageDescription>> {
        tracker.begin_items(Stage::Enrichment, parsed.pictures.len());
        if parsed.pictures.is_empty() {
            return Ok(Vec::new());
        }
        let Some(vision) = &self.vision else {
            let message = format!(
                "no vision provider configured, {} pictures left undescribed",
                parsed.pictures.len()
            );
            tracing::warn!("[{}] {}", parsed.filename, message);
            tracker.record_warning(Stage::Enrichment, message);
            return Ok(Vec::new());
        };

        let describe_timeout = self.config.timeouts.describe();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let futures: Vec<_> = parsed
            .pictures
            .iter()
            .map(|picture| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    if picture.image.is_empty() {
                        return Err(Error::vision(format!("picture {} has no bitmap", picture.reference)));
                    }
                    match timeout(describe_timeout, vision.describe(&picture.image)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::vision(format!(
                            "describing {} timed out after {}s",
                            picture.reference,
                            describe_timeout.as_secs()
                        ))),
                    }
                }
            })
            .collect();

        let mut descriptions = Vec::new();
        for (picture, result) in parsed.pictures.iter().zip(join_all(futures).await) {
            match result {
                Ok(description) => {
                    tracker.record_success(Stage::Enrichment);
                    descriptions.push(ImageDescription {
                        picture_ref: picture.reference.clone(),
                        page: picture.page,
                        bbox: parsed.normalize_bbox(picture.page, picture.bbox.as_ref()),
                        abs_bbox: picture.bbox,
                        description,
                        model: vision.model().to_string(),
                    });
                }
                Err(e) => {
                    // image descriptions are advisory
                    let e = if matches!(e, Error::Vision(_)) {
                        e
                    } else {
                        Error::vision(e.to_string())
                    };
                    tracing::warn!("[{}] {}", parsed.filename, e);
                    tracker.record_failure(Stage::Enrichment, &e);
                }
            }
            tracker.publish(false);
        }

        tracing::info!(
            "[{}] Described {}/{} pictures",
            parsed.filename,
            descriptions.len(),
            parsed.pictures.len()
        );
        Ok(descriptions)
    }

    /// Sections, image attachment and adaptive chunking
    fn chunk(
        &self,
        parsed: &ParsedDocument,
        descriptions: Vec<ImageDescription>,
        tracker: &ProgressTracker,
    ) -> Result<Vec<Chunk>> {
        let counter = self.tokenizers.for_config(&self.config.chunking)?;
        let extractor = SectionExtractor::new(counter);

        let (sections, strategy) = extractor.extract_with_strategy(parsed);
        tracker.begin_items(Stage::Chunking, sections.len());
        if sections.is_empty() {
            return Err(Error::EmptyContent(parsed.filename.clone()));
        }
        tracing::info!(
            "[{}] Extracted {} sections ({:?} headings)",
            parsed.filename,
            sections.len(),
            strategy
        );

        let (sections, report) = integrate_images(sections, descriptions);
        if !report.unattached.is_empty() {
            tracker.record_warning(
                Stage::Chunking,
                format!("{} image descriptions could not be attached", report.unattached.len()),
            );
        }
        if report.matched + report.fallback > 0 {
            tracing::info!(
                "[{}] Attached {} images ({} by overlap, {} by fallback)",
                parsed.filename,
                report.matched + report.fallback,
                report.matched,
                report.fallback
            );
        }

        let chunks = AdaptiveChunker::from_config(&self.config.chunking).chunk(&sections);
        for _ in 0..sections.len() {
            tracker.record_success(Stage::Chunking);
        }
        tracing::info!(
            "[{}] Created {} chunks from {} sections",
            parsed.filename,
            chunks.len(),
            sections.len()
        );
        Ok(chunks)
    }

    async fn clear_stored_points(&self, source: &DocumentSource) {
        match self.vector_store.delete_by_document(&source.id).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("[{}] Removed {} points from earlier attempt", source.filename, n),
            Err(e) => tracing::warn!("[{}] Could not remove earlier points: {}", source.filename, e),
        }
    }
}

fn is_completed(tracker: &ProgressTracker, stage: Stage) -> bool {
    tracker.with_state(|s| s.status(stage)) == StageStatus::Completed
}

/// Errors that will fail the same way on every attempt are not retried
fn is_retryable(error: &Error) -> bool {
    !matches!(
        error,
        Error::InvalidInput { .. }
            | Error::EmptyContent(_)
            | Error::Config(_)
            | Error::Tokenizer(_)
            | Error::InvalidTransition { .. }
            | Error::Internal(_)
    )
}

fn build_report(
    source: &DocumentSource,
    tracker: &ProgressTracker,
    attempts: u32,
    artifacts: &Artifacts,
) -> DocumentReport {
    let state = tracker.state();
    let outcome = tracker.outcome();
    let stages = state
        .stages()
        .map(|(stage, record)| {
            let counters = tracker.counters(stage);
            (
                stage,
                StageReport {
                    status: record.status,
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                    duration_ms: record.duration_ms(),
                },
            )
        })
        .collect();

    DocumentReport {
        document_id: source.id,
        batch_id: source.batch_id,
        filename: source.filename.clone(),
        namespace: source.namespace.clone(),
        content_hash: source.content_hash(),
        status: state.document_status(),
        attempts,
        progress: state.overall_progress(),
        stages,
        chunks: artifacts.chunks.as_ref().map_or(0, Vec::len),
        entities: outcome.entities,
        relations: outcome.relations,
        errors: state.errors().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&Error::parse("a.pdf", "503")));
        assert!(is_retryable(&Error::unavailable("embedder", "down")));
        assert!(is_retryable(&Error::stage_failed(Stage::Embedding, "all failed")));
        assert!(!is_retryable(&Error::invalid_input("a.pdf", "empty")));
        assert!(!is_retryable(&Error::EmptyContent("a.pdf".to_string())));
    }
}
