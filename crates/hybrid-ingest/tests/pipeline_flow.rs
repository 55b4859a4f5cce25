mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hybrid_ingest::processing::{
    DocumentPipeline, FixedResourceMonitor, ProgressSink, WatchProgressSink,
};
use hybrid_ingest::providers::mock::{
    MockEmbedder, MockGraphStore, MockParser, MockVectorStore, MockVision,
};
use hybrid_ingest::providers::GraphStoreProvider;
use hybrid_ingest::types::{
    DocNode, DocumentSource, ExtractionOutcome, FileType, GraphRecord, NodeLabel, ParsedDocument,
    Severity, Stage, StageStatus,
};
use hybrid_ingest::config::IngestConfig;
use hybrid_ingest::{Error, Result};

use common::{report_document, test_config};

struct Harness {
    parser: Arc<MockParser>,
    embedder: Arc<MockEmbedder>,
    vectors: Arc<MockVectorStore>,
    graph: Arc<MockGraphStore>,
}

impl Harness {
    fn new(parser: MockParser, embedder: MockEmbedder) -> Self {
        Self {
            parser: Arc::new(parser),
            embedder: Arc::new(embedder),
            vectors: Arc::new(MockVectorStore::new()),
            graph: Arc::new(MockGraphStore::new()),
        }
    }

    fn pipeline(&self) -> DocumentPipeline {
        self.pipeline_with(test_config())
    }

    fn pipeline_with(&self, config: IngestConfig) -> DocumentPipeline {
        DocumentPipeline::new(
            config,
            self.parser.clone(),
            self.embedder.clone(),
            self.vectors.clone(),
            self.graph.clone(),
        )
        .with_vision(Arc::new(MockVision::new()))
        .with_resource_monitor(Arc::new(FixedResourceMonitor(Some(16 * 1024))))
    }
}

fn source() -> DocumentSource {
    DocumentSource::new("report.pdf", b"%PDF-1.7 fake".to_vec(), "tenant-a")
}

#[tokio::test]
async fn test_full_ingestion() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(16).hybrid());
    let (sink, rx) = WatchProgressSink::new();
    let pipeline = h.pipeline().with_progress_sink(Arc::new(sink));

    let report = pipeline.ingest(source()).await;

    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.progress, 1.0);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.namespace, "tenant-a");
    for stage in Stage::ALL {
        assert_eq!(report.stages[&stage].status, StageStatus::Completed, "{}", stage);
    }
    assert_eq!(report.stages[&Stage::Embedding].succeeded, 3);
    assert_eq!(report.stages[&Stage::GraphExtraction].succeeded, 3);
    assert_eq!(report.stages[&Stage::Enrichment].succeeded, 1);

    let points = h.vectors.points();
    assert_eq!(points.len(), 3);
    assert!(points.iter().all(|p| p.payload["has_sparse"] == serde_json::json!(true)));
    let revenue = points
        .iter()
        .find(|p| p.payload["primary_section"] == "Revenue")
        .unwrap();
    assert!(revenue.payload.contains_key("image_descriptions"));

    let records = h.graph.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|(ns, _)| ns == "tenant-a"));
    let expected: ExtractionOutcome = records.iter().fold(Default::default(), |mut acc, (_, r)| {
        acc += MockGraphStore::outcome_for(&r.text);
        acc
    });
    assert_eq!(report.entities, expected.entities);
    assert_eq!(report.relations, expected.relations);

    let last = rx.borrow().clone().unwrap();
    assert_eq!(last.status, StageStatus::Completed);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.estimated_remaining_ms, Some(0));
}

#[tokio::test]
async fn test_single_chunk_failure_is_recoverable() {
    let h = Harness::new(
        MockParser::new(report_document("POISON")),
        MockEmbedder::new(8).fail_on("POISON"),
    );
    let report = h.pipeline().ingest(source()).await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stages[&Stage::Embedding].succeeded, 2);
    assert_eq!(report.stages[&Stage::Embedding].failed, 1);
    assert_eq!(report.stages[&Stage::GraphExtraction].succeeded, 2);
    assert_eq!(h.vectors.points().len(), 2);
    assert_eq!(h.graph.records().len(), 2);

    let embedding_errors: Vec<_> = report
        .errors
        .iter()
        .filter(|e| e.stage == Stage::Embedding)
        .collect();
    assert_eq!(embedding_errors.len(), 1);
    assert_eq!(embedding_errors[0].severity, Severity::Error);
}

#[tokio::test]
async fn test_rejected_upsert_batch_fails_its_items() {
    let h = Harness {
        parser: Arc::new(MockParser::new(report_document("POISON"))),
        embedder: Arc::new(MockEmbedder::new(8)),
        vectors: Arc::new(MockVectorStore::new().fail_on("POISON")),
        graph: Arc::new(MockGraphStore::new()),
    };
    let mut config = test_config();
    config.workers.embedding = Some(1);
    config.vector_store.upsert_batch_size = 1;
    let pipeline = DocumentPipeline::new(
        config,
        h.parser.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        h.graph.clone(),
    )
    .with_resource_monitor(Arc::new(FixedResourceMonitor(None)));

    let report = pipeline.ingest(source()).await;
    assert!(report.is_success());
    assert_eq!(report.stages[&Stage::Embedding].failed, 1);
    assert_eq!(h.graph.records().len(), 2);
    assert!(h
        .graph
        .records()
        .iter()
        .all(|(_, r)| !r.text.contains("POISON")));
}

#[tokio::test]
async fn test_all_embeddings_failing_exhausts_retries() {
    let h = Harness::new(
        MockParser::new(report_document("")),
        MockEmbedder::new(8).fail_on("0"),
    );
    let report = h.pipeline().ingest(source()).await;

    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.attempts, 4);
    assert_eq!(report.stages[&Stage::Embedding].status, StageStatus::Failed);
    assert_eq!(report.stages[&Stage::GraphExtraction].status, StageStatus::Failed);
    // earlier stages ran once and kept their results
    assert_eq!(h.parser.calls(), 1);
    assert_eq!(report.stages[&Stage::Chunking].status, StageStatus::Completed);
    assert!(report.progress < 1.0);
    assert!(h.graph.records().is_empty());
}

#[tokio::test]
async fn test_parse_retry_then_success() {
    let h = Harness::new(
        MockParser::new(report_document("")).failing_first(2),
        MockEmbedder::new(8),
    );
    let report = h.pipeline().ingest(source()).await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 3);
    assert_eq!(h.parser.calls(), 3);
    let parse_errors = report
        .errors
        .iter()
        .filter(|e| e.stage == Stage::Parsing)
        .count();
    assert_eq!(parse_errors, 2);
    assert_eq!(report.stages[&Stage::Parsing].status, StageStatus::Completed);
}

#[tokio::test]
async fn test_empty_input_is_not_retried() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8));
    let report = h
        .pipeline()
        .ingest(DocumentSource::new("report.pdf", Vec::<u8>::new(), "tenant-a"))
        .await;

    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(h.parser.calls(), 0);
    assert_eq!(report.stages[&Stage::Parsing].status, StageStatus::Failed);
    assert_eq!(report.stages[&Stage::Parsing].failed, 1);
    assert_eq!(report.stages[&Stage::Enrichment].status, StageStatus::Pending);
}

#[tokio::test]
async fn test_document_without_text_fails_as_empty_content() {
    let root = DocNode::group(vec![DocNode::leaf(NodeLabel::PageFooter, "Page 1", 1)]);
    let parsed = ParsedDocument::new("blank.pdf", FileType::Pdf, root);
    let h = Harness::new(MockParser::new(parsed), MockEmbedder::new(8));

    let report = h.pipeline().ingest(source()).await;
    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stages[&Stage::Chunking].status, StageStatus::Failed);
    assert_eq!(report.chunks, 0);
    assert!(report.errors.iter().any(|e| e.message.contains("No extractable content")));
}

#[tokio::test]
async fn test_unhealthy_embedder_fails_resource_check() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8).unhealthy());
    let report = h.pipeline().ingest(source()).await;

    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.stages[&Stage::ResourceCheck].status, StageStatus::Failed);
    assert_eq!(report.stages[&Stage::ResourceCheck].failed, 1);
    assert_eq!(h.parser.calls(), 0);
    assert_eq!(report.attempts, 4);
}

#[tokio::test]
async fn test_invalid_config_fails_without_retry() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8));
    let mut config = test_config();
    config.workers.extraction = Some(0);
    config.queues.embedding_capacity = 1;

    let report = tokio::time::timeout(Duration::from_secs(5), h.pipeline_with(config).ingest(source()))
        .await
        .expect("ingestion must finish");

    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stages[&Stage::ResourceCheck].status, StageStatus::Failed);
    assert_eq!(report.stages[&Stage::ResourceCheck].failed, 1);
    assert_eq!(h.parser.calls(), 0);
    assert!(report.errors.iter().any(|e| e.message.contains("workers.extraction")));
}

#[tokio::test]
async fn test_low_memory_runs_with_single_workers() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8));
    let pipeline = h
        .pipeline()
        .with_resource_monitor(Arc::new(FixedResourceMonitor(Some(10))));

    let report = pipeline.ingest(source()).await;
    assert!(report.is_success());
    let warning = report
        .errors
        .iter()
        .find(|e| e.stage == Stage::ResourceCheck)
        .unwrap();
    assert_eq!(warning.severity, Severity::Warning);
}

#[tokio::test]
async fn test_vision_failure_is_a_warning() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8));
    let pipeline = h.pipeline().with_vision(Arc::new(MockVision::failing()));

    let report = pipeline.ingest(source()).await;
    assert!(report.is_success());
    assert_eq!(report.stages[&Stage::Enrichment].status, StageStatus::Completed);
    assert_eq!(report.stages[&Stage::Enrichment].failed, 1);
    let warnings: Vec<_> = report
        .errors
        .iter()
        .filter(|e| e.stage == Stage::Enrichment)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert!(h.vectors.points().iter().all(|p| !p.payload.contains_key("image_descriptions")));
}

#[tokio::test(start_paused = true)]
async fn test_embedding_timeout_is_recorded() {
    let h = Harness::new(
        MockParser::new(report_document("")),
        MockEmbedder::new(8).with_latency(Duration::from_secs(30)),
    );
    let mut config = test_config();
    config.timeouts.embed_secs = 1;
    config.retry.max_retries = 0;
    let pipeline = DocumentPipeline::new(
        config,
        h.parser.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        h.graph.clone(),
    )
    .with_resource_monitor(Arc::new(FixedResourceMonitor(None)));

    let report = pipeline.ingest(source()).await;
    assert_eq!(report.status, StageStatus::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stages[&Stage::Embedding].failed, 3);
    assert!(report.errors.iter().any(|e| e.message.contains("timed out after 1s")));
}

/// Fails every call until `failures` calls have been rejected
struct FlakyGraph {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl GraphStoreProvider for FlakyGraph {
    async fn insert_records(&self, _namespace: &str, records: &[GraphRecord]) -> Result<ExtractionOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::graph("graph store unreachable"));
        }
        Ok(ExtractionOutcome {
            entities: records.len(),
            relations: 0,
        })
    }

    fn name(&self) -> &str {
        "flaky-graph"
    }
}

#[tokio::test]
async fn test_extraction_retry_reuses_embeddings() {
    let parser = Arc::new(MockParser::new(report_document("")));
    let embedder = Arc::new(MockEmbedder::new(8));
    let vectors = Arc::new(MockVectorStore::new());
    let graph = Arc::new(FlakyGraph {
        failures: 3,
        calls: AtomicUsize::new(0),
    });
    let mut config = test_config();
    config.workers.extraction = Some(1);
    let pipeline = DocumentPipeline::new(config, parser, embedder.clone(), vectors.clone(), graph.clone())
        .with_resource_monitor(Arc::new(FixedResourceMonitor(None)));

    let report = pipeline.ingest(source()).await;

    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.attempts, 2);
    assert_eq!(embedder.calls(), 3);
    assert_eq!(vectors.points().len(), 3);
    assert_eq!(graph.calls.load(Ordering::SeqCst), 6);
    assert_eq!(report.entities, 3);
    assert_eq!(report.stages[&Stage::GraphExtraction].succeeded, 3);
}

#[tokio::test]
async fn test_batch_reports_in_input_order() {
    let h = Harness::new(MockParser::new(report_document("")), MockEmbedder::new(8));
    let pipeline = h.pipeline();
    let sources = vec![
        DocumentSource::new("a.pdf", b"a".to_vec(), "tenant-a"),
        DocumentSource::new("b.pdf", Vec::<u8>::new(), "tenant-a"),
        DocumentSource::new("c.pdf", b"c".to_vec(), "tenant-a"),
    ];

    let reports = pipeline.ingest_batch(sources, 2).await;
    let names: Vec<_> = reports.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf"]);
    assert!(reports[0].is_success());
    assert!(!reports[1].is_success());
    assert!(reports[2].is_success());
    let batch = reports[0].batch_id.unwrap();
    assert!(reports.iter().all(|r| r.batch_id == Some(batch)));
}

#[test]
fn test_progress_sink_is_object_safe() {
    let (sink, _rx) = WatchProgressSink::new();
    let _boxed: Arc<dyn ProgressSink> = Arc::new(sink);
}
