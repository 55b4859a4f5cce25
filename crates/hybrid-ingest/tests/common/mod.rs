#![allow(dead_code)]

use hybrid_ingest::config::IngestConfig;
use hybrid_ingest::types::{
    BoundingBox, DocNode, FileType, ImageBitmap, NodeLabel, PageSize, ParsedDocument, ParsedPicture,
};

/// `n` distinct words
pub fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Three sections on two pages:
/// "Annual Report" (100 words), "Revenue" (1300 words), "Outlook" (200 words),
/// plus one picture covering the Revenue section on page 1.
pub fn report_document(revenue_marker: &str) -> ParsedDocument {
    let revenue_body = format!("{} {}", revenue_marker, words("rev", 1300));
    let root = DocNode::group(vec![
        DocNode::leaf(NodeLabel::PageHeader, "ACME Corp confidential", 1),
        DocNode::leaf(NodeLabel::Title, "Annual Report", 1)
            .with_bbox(BoundingBox::new(50.0, 50.0, 550.0, 80.0)),
        DocNode::leaf(NodeLabel::Paragraph, words("intro", 100), 1)
            .with_bbox(BoundingBox::new(50.0, 90.0, 550.0, 280.0)),
        DocNode::leaf(NodeLabel::SectionHeader, "Revenue", 1)
            .with_bbox(BoundingBox::new(50.0, 300.0, 550.0, 320.0)),
        DocNode::leaf(NodeLabel::Paragraph, revenue_body, 1)
            .with_bbox(BoundingBox::new(50.0, 330.0, 550.0, 700.0)),
        DocNode::leaf(NodeLabel::SectionHeader, "Outlook", 2)
            .with_bbox(BoundingBox::new(50.0, 50.0, 550.0, 80.0)),
        DocNode::leaf(NodeLabel::Paragraph, words("next", 200), 2)
            .with_bbox(BoundingBox::new(50.0, 90.0, 550.0, 400.0)),
    ]);

    let mut doc = ParsedDocument::new("report.pdf", FileType::Pdf, root);
    doc.pages.insert(1, PageSize::new(600.0, 800.0));
    doc.pages.insert(2, PageSize::new(600.0, 800.0));
    doc.pictures.push(ParsedPicture {
        reference: "#/pictures/0".to_string(),
        page: Some(1),
        bbox: Some(BoundingBox::new(50.0, 300.0, 550.0, 700.0)),
        image: ImageBitmap::new(vec![0u8; 64], "image/png"),
    });
    doc
}

/// Fast, deterministic settings for pipeline tests
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.retry.backoff_ms = 0;
    config.workers.embedding = Some(2);
    config.workers.extraction = Some(2);
    config.vector_store.upsert_batch_size = 2;
    config.progress.min_emit_interval_ms = 0;
    config
}
