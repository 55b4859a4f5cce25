//! Streaming embedding and graph-extraction stages
//!
//! producer -> chunk queue -> embedding workers -> embedding queue -> extraction workers
//!
//! Both queues are bounded, so a slow extraction pool back-pressures the
//! embedding pool, which back-pressures the producer. Per-item failures are
//! recorded on the shared tracker and never stop sibling workers.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::progress::ProgressTracker;
use super::queue::{QueueItem, QueueMessage, StageQueue};
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, GraphStoreProvider, VectorStoreProvider};
use crate::types::{Chunk, EmbeddedChunk, ExtractionOutcome, GraphRecord, Stage, VectorPoint};

/// Worker counts, capacities and timeouts of one streaming run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub embedding_workers: usize,
    pub extraction_workers: usize,
    pub chunk_capacity: usize,
    pub embedding_capacity: usize,
    pub embed_timeout: Duration,
    pub extract_timeout: Duration,
    pub upsert_batch_size: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            embedding_workers: config.workers.embedding_workers().max(1),
            extraction_workers: config.workers.extraction_workers().max(1),
            chunk_capacity: config.queues.chunk_capacity.max(1),
            embedding_capacity: config.queues.embedding_capacity.max(1),
            embed_timeout: config.timeouts.embed(),
            extract_timeout: config.timeouts.extract(),
            upsert_batch_size: config.vector_store.upsert_batch_size.max(1),
        }
    }

    /// Limit every pool to at most `max` workers
    pub fn clamp_workers(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.embedding_workers = self.embedding_workers.clamp(1, max);
        self.extraction_workers = self.extraction_workers.clamp(1, max);
        self
    }
}

/// What the streaming stages start from
#[derive(Debug, Clone)]
pub enum StreamInput {
    /// Fresh chunks: embed, store, then extract
    Chunks(Vec<Chunk>),
    /// Chunks embedded and stored by an earlier attempt: extract only
    Embedded(Vec<EmbeddedChunk>),
}

impl StreamInput {
    pub fn len(&self) -> usize {
        match self {
            StreamInput::Chunks(chunks) => chunks.len(),
            StreamInput::Embedded(embedded) => embedded.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a streaming run
#[derive(Debug)]
pub struct StreamOutput {
    /// Chunks embedded and stored, sorted by chunk index
    pub embedded: Vec<EmbeddedChunk>,
    /// Chunk indices that went through graph extraction, sorted
    pub extracted: Vec<usize>,
    pub outcome: ExtractionOutcome,
    /// Set when a whole stage failed; the document cannot complete
    pub fatal: Option<Error>,
}

/// Runs the embedding and extraction worker pools for one document
pub struct StreamingOrchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    graph_store: Arc<dyn GraphStoreProvider>,
    settings: OrchestratorSettings,
}

/// Shared per-run context handed to each worker task
struct RunContext {
    document_id: Uuid,
    filename: String,
    namespace: String,
    tracker: ProgressTracker,
    settings: OrchestratorSettings,
}

impl StreamingOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        graph_store: Arc<dyn GraphStoreProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            graph_store,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Stream `input` through the remaining stages.
    ///
    /// Stage statuses are updated on `tracker`. `Err` is returned only for
    /// bookkeeping failures; a failed stage is reported in `fatal`.
    pub async fn run(
        &self,
        filename: &str,
        namespace: &str,
        input: StreamInput,
        tracker: &ProgressTracker,
    ) -> Result<StreamOutput> {
        let ctx = Arc::new(RunContext {
            document_id: tracker.document_id(),
            filename: filename.to_string(),
            namespace: namespace.to_string(),
            tracker: tracker.clone(),
            settings: self.settings.clone(),
        });

        let embedding_queue: Arc<StageQueue<QueueItem<EmbeddedChunk>>> =
            Arc::new(StageQueue::new("embedding", self.settings.embedding_capacity));
        let resumed = matches!(input, StreamInput::Embedded(_));

        tracker.begin_items(Stage::GraphExtraction, input.len());
        if !resumed {
            tracker.begin_items(Stage::Embedding, input.len());
            tracker.with_state(|s| s.start(Stage::Embedding))?;
        }
        tracker.with_state(|s| s.start(Stage::GraphExtraction))?;
        tracker.publish(false);

        tracing::info!(
            "[{}] Streaming {} chunks ({} embedding / {} extraction workers{})",
            filename,
            input.len(),
            self.settings.embedding_workers,
            self.settings.extraction_workers,
            if resumed { ", resuming from stored embeddings" } else { "" }
        );

        let extraction_handles: Vec<_> = (0..self.settings.extraction_workers)
            .map(|worker| {
                tokio::spawn(extraction_worker(
                    worker,
                    ctx.clone(),
                    self.graph_store.clone(),
                    embedding_queue.clone(),
                ))
            })
            .collect();

        let (embedded, embedding_fatal) = match input {
            StreamInput::Chunks(chunks) => {
                self.run_embedding(&ctx, chunks, embedding_queue.clone()).await?
            }
            StreamInput::Embedded(embedded) => {
                for (index, item) in embedded.iter().enumerate() {
                    let item = QueueItem::new(index, ctx.document_id, item.clone());
                    if let Err(e) = embedding_queue.put(item).await {
                        tracing::error!("[{}] Could not enqueue stored chunk: {}", filename, e);
                        break;
                    }
                }
                embedding_queue.mark_done();
                (embedded, None)
            }
        };

        let mut extracted = Vec::new();
        for result in join_all(extraction_handles).await {
            match result {
                Ok(indices) => extracted.extend(indices),
                Err(e) => {
                    tracing::error!("[{}] Extraction worker crashed: {}", filename, e);
                    tracker.record_failure(Stage::GraphExtraction, &Error::internal(e.to_string()));
                }
            }
        }
        extracted.sort_unstable();

        let extraction_fatal = self.finish_extraction(&ctx, embedding_fatal.is_some())?;
        tracker.publish(false);

        Ok(StreamOutput {
            embedded,
            extracted,
            outcome: tracker.outcome(),
            fatal: embedding_fatal.or(extraction_fatal),
        })
    }

    /// Producer plus embedding pool. Marks the embedding queue done once
    /// every embedding worker has exited.
    async fn run_embedding(
        &self,
        ctx: &Arc<RunContext>,
        chunks: Vec<Chunk>,
        embedding_queue: Arc<StageQueue<QueueItem<EmbeddedChunk>>>,
    ) -> Result<(Vec<EmbeddedChunk>, Option<Error>)> {
        let chunk_queue: Arc<StageQueue<QueueItem<Chunk>>> =
            Arc::new(StageQueue::new("chunks", self.settings.chunk_capacity));

        let producer = {
            let queue = chunk_queue.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for (index, chunk) in chunks.into_iter().enumerate() {
                    if let Err(e) = queue.put(QueueItem::new(index, ctx.document_id, chunk)).await {
                        tracing::error!("[{}] Producer stopped: {}", ctx.filename, e);
                        break;
                    }
                }
                queue.mark_done();
            })
        };

        let handles: Vec<JoinHandle<Vec<QueueItem<EmbeddedChunk>>>> = (0..self.settings.embedding_workers)
            .map(|worker| {
                tokio::spawn(embedding_worker(
                    worker,
                    ctx.clone(),
                    self.embedder.clone(),
                    self.vector_store.clone(),
                    chunk_queue.clone(),
                    embedding_queue.clone(),
                ))
            })
            .collect();

        let mut stored = Vec::new();
        for result in join_all(handles).await {
            match result {
                Ok(items) => stored.extend(items),
                Err(e) => {
                    tracing::error!("[{}] Embedding worker crashed: {}", ctx.filename, e);
                    ctx.tracker
                        .record_failure(Stage::Embedding, &Error::internal(e.to_string()));
                }
            }
        }
        embedding_queue.mark_done();
        if let Err(e) = producer.await {
            tracing::error!("[{}] Producer crashed: {}", ctx.filename, e);
        }

        stored.sort_by_key(|item| item.index);
        let embedded: Vec<EmbeddedChunk> = stored.into_iter().map(|item| item.payload).collect();

        let counters = ctx.tracker.counters(Stage::Embedding);
        // extraction only ever sees what was stored
        ctx.tracker.set_total(Stage::GraphExtraction, counters.succeeded);

        tracing::info!(
            "[{}] Embedding finished: {} stored, {} failed",
            ctx.filename,
            counters.succeeded,
            counters.failed
        );

        let fatal = if counters.total > 0 && counters.succeeded == 0 {
            let message = format!("all {} chunks failed to embed or store", counters.total);
            ctx.tracker.with_state(|s| s.fail(Stage::Embedding, message.clone()))?;
            Some(Error::stage_failed(Stage::Embedding, message))
        } else {
            ctx.tracker.with_state(|s| s.complete(Stage::Embedding))?;
            None
        };
        Ok((embedded, fatal))
    }

    fn finish_extraction(&self, ctx: &RunContext, upstream_failed: bool) -> Result<Option<Error>> {
        let counters = ctx.tracker.counters(Stage::GraphExtraction);
        tracing::info!(
            "[{}] Graph extraction finished: {} succeeded, {} failed",
            ctx.filename,
            counters.succeeded,
            counters.failed
        );

        let message = if counters.processed() > 0 && counters.succeeded == 0 {
            Some(format!("all {} chunks failed graph extraction", counters.processed()))
        } else if counters.processed() == 0 && upstream_failed {
            Some("no stored chunks to extract from".to_string())
        } else {
            None
        };

        match message {
            Some(message) => {
                ctx.tracker
                    .with_state(|s| s.fail(Stage::GraphExtraction, message.clone()))?;
                Ok(Some(Error::stage_failed(Stage::GraphExtraction, message)))
            }
            None => {
                ctx.tracker.with_state(|s| s.complete(Stage::GraphExtraction))?;
                Ok(None)
            }
        }
    }
}

/// Pulls chunks, embeds them and upserts them in batches. Returns the
/// items that were stored; those are also forwarded to extraction.
async fn embedding_worker(
    worker: usize,
    ctx: Arc<RunContext>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    chunks: Arc<StageQueue<QueueItem<Chunk>>>,
    embedded: Arc<StageQueue<QueueItem<EmbeddedChunk>>>,
) -> Vec<QueueItem<EmbeddedChunk>> {
    let mut pending: Vec<QueueItem<EmbeddedChunk>> = Vec::new();
    let mut stored = Vec::new();
    let embed_timeout = ctx.settings.embed_timeout;

    while let QueueMessage::Item(item) = chunks.get().await {
        match timeout(embed_timeout, embedder.embed(&item.payload.text)).await {
            Ok(Ok(embedding)) => {
                pending.push(item.map(|chunk| EmbeddedChunk { chunk, embedding }));
                if pending.len() >= ctx.settings.upsert_batch_size {
                    let batch = std::mem::take(&mut pending);
                    stored.extend(flush_batch(worker, &ctx, vector_store.as_ref(), &embedded, batch).await);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("[{}] Embedding failed for chunk {}: {}", ctx.filename, item.index, e);
                ctx.tracker.record_failure(Stage::Embedding, &e);
            }
            Err(_) => {
                tracing::error!(
                    "[{}] TIMEOUT: Embedding chunk {} took >{}s",
                    ctx.filename,
                    item.index,
                    embed_timeout.as_secs()
                );
                ctx.tracker.record_failure(
                    Stage::Embedding,
                    &Error::Timeout {
                        stage: Stage::Embedding,
                        secs: embed_timeout.as_secs(),
                    },
                );
            }
        }
        ctx.tracker.publish(false);
    }

    if !pending.is_empty() {
        stored.extend(flush_batch(worker, &ctx, vector_store.as_ref(), &embedded, pending).await);
    }
    tracing::debug!("[{}] Embedding worker {} exiting", ctx.filename, worker);
    stored
}

/// Upsert one batch; forward stored items downstream
async fn flush_batch(
    worker: usize,
    ctx: &RunContext,
    vector_store: &dyn VectorStoreProvider,
    embedded: &StageQueue<QueueItem<EmbeddedChunk>>,
    batch: Vec<QueueItem<EmbeddedChunk>>,
) -> Vec<QueueItem<EmbeddedChunk>> {
    let points: Vec<VectorPoint> = batch
        .iter()
        .map(|item| VectorPoint::from_embedded(ctx.document_id, &item.payload))
        .collect();

    let result = match timeout(ctx.settings.embed_timeout, vector_store.upsert(&points)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage: Stage::Embedding,
            secs: ctx.settings.embed_timeout.as_secs(),
        }),
    };

    if let Err(e) = result {
        tracing::error!(
            "[{}] Worker {}: upsert of {} points to {} failed: {}",
            ctx.filename,
            worker,
            points.len(),
            vector_store.name(),
            e
        );
        ctx.tracker.record_failures(Stage::Embedding, batch.len(), &e);
        return Vec::new();
    }

    let mut forwarded = Vec::with_capacity(batch.len());
    for item in batch {
        ctx.tracker.record_success(Stage::Embedding);
        if let Err(e) = embedded.put(item.clone()).await {
            tracing::error!("[{}] Could not forward chunk {}: {}", ctx.filename, item.index, e);
        }
        forwarded.push(item);
    }
    forwarded
}

/// Sends each embedded chunk to the graph store. Returns the chunk indices
/// that were extracted.
async fn extraction_worker(
    worker: usize,
    ctx: Arc<RunContext>,
    graph_store: Arc<dyn GraphStoreProvider>,
    embedded: Arc<StageQueue<QueueItem<EmbeddedChunk>>>,
) -> Vec<usize> {
    let mut extracted = Vec::new();
    let extract_timeout = ctx.settings.extract_timeout;

    while let QueueMessage::Item(item) = embedded.get().await {
        let record = GraphRecord::from_chunk(&item.payload.chunk);
        let result = timeout(
            extract_timeout,
            graph_store.insert_records(&ctx.namespace, std::slice::from_ref(&record)),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                ctx.tracker.add_outcome(outcome);
                ctx.tracker.record_success(Stage::GraphExtraction);
                extracted.push(item.payload.chunk.chunk_index);
            }
            Ok(Err(e)) => {
                tracing::warn!("[{}] Graph extraction failed for chunk {}: {}", ctx.filename, record.index, e);
                ctx.tracker.record_failure(Stage::GraphExtraction, &e);
            }
            Err(_) => {
                tracing::error!(
                    "[{}] TIMEOUT: Graph extraction of chunk {} took >{}s",
                    ctx.filename,
                    record.index,
                    extract_timeout.as_secs()
                );
                ctx.tracker.record_failure(
                    Stage::GraphExtraction,
                    &Error::Timeout {
                        stage: Stage::GraphExtraction,
                        secs: extract_timeout.as_secs(),
                    },
                );
            }
        }
        ctx.tracker.publish(false);
    }

    tracing::debug!("[{}] Extraction worker {} exiting", ctx.filename, worker);
    extracted
}
