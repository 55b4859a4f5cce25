//! Heading-delimited section extraction from a parsed node tree

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::tokenizer::TokenCounter;
use crate::types::{
    BoundingBox, DocNode, NodeLabel, ParsedDocument, Section, SectionMetadata, TextFormatting,
};

/// Heading used for text that has no heading above it
pub const FALLBACK_HEADING: &str = "Document";

const HEURISTIC_MAX_WORDS: usize = 12;
const HEURISTIC_MAX_CHARS: usize = 100;
const HEURISTIC_FONT_RATIO: f32 = 1.2;

static OUTLINE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\S").expect("static regex")
});

/// Text-bearing node in document order
struct FlatNode<'a> {
    label: &'a NodeLabel,
    text: &'a str,
    page: Option<u32>,
    bbox: Option<BoundingBox>,
    formatting: Option<&'a TextFormatting>,
}

/// Which strategy decided the headings of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingStrategy {
    /// Parser layout labels
    Labels,
    /// Short emphasized or outline-numbered lines
    Formatting,
    /// No headings found, one synthetic section
    SingleSection,
}

/// Walks a parsed document and emits ordered sections
pub struct SectionExtractor {
    counter: Arc<dyn TokenCounter>,
}

impl SectionExtractor {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Extract sections. Never fails; an empty tree gives an empty list.
    pub fn extract(&self, doc: &ParsedDocument) -> Vec<Section> {
        self.extract_with_strategy(doc).0
    }

    /// Extract sections and report which heading strategy was used
    pub fn extract_with_strategy(&self, doc: &ParsedDocument) -> (Vec<Section>, HeadingStrategy) {
        let mut nodes = Vec::new();
        flatten(&doc.root, doc, &mut nodes);

        if nodes.is_empty() {
            return (Vec::new(), HeadingStrategy::SingleSection);
        }

        let metadata = SectionMetadata {
            source: doc.filename.clone(),
            file_type: doc.file_type.clone(),
        };

        let label_levels: Vec<Option<u8>> = nodes.iter().map(|n| n.label.heading_level()).collect();
        if label_levels.iter().any(Option::is_some) {
            return (self.build(&nodes, &label_levels, &metadata), HeadingStrategy::Labels);
        }

        tracing::debug!(
            "[{}] no labelled headings, trying formatting heuristic",
            doc.filename
        );
        let heuristic_levels = heuristic_levels(&nodes);
        if heuristic_levels.iter().any(Option::is_some) {
            return (
                self.build(&nodes, &heuristic_levels, &metadata),
                HeadingStrategy::Formatting,
            );
        }

        tracing::debug!("[{}] no headings found, using a single section", doc.filename);
        let none = vec![None; nodes.len()];
        (self.build(&nodes, &none, &metadata), HeadingStrategy::SingleSection)
    }

    fn build(&self, nodes: &[FlatNode<'_>], levels: &[Option<u8>], metadata: &SectionMetadata) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current: Option<Section> = None;

        for (node, level) in nodes.iter().zip(levels) {
            match level {
                Some(level) => {
                    if let Some(done) = current.take() {
                        sections.push(self.finish(done));
                    }
                    let mut section = Section::new(
                        node.text,
                        *level,
                        node.page.unwrap_or(1),
                        metadata.clone(),
                    );
                    section.bbox = node.bbox;
                    current = Some(section);
                }
                None => {
                    let section = current.get_or_insert_with(|| {
                        Section::new(FALLBACK_HEADING, 1, node.page.unwrap_or(1), metadata.clone())
                    });
                    if !section.text.is_empty() {
                        section.text.push_str("\n\n");
                    }
                    section.text.push_str(node.text);

                    if node.page.unwrap_or(section.page) == section.page {
                        if let Some(bbox) = node.bbox {
                            section.bbox = Some(match section.bbox {
                                Some(existing) => existing.union(&bbox),
                                None => bbox,
                            });
                        }
                    }
                }
            }
        }

        if let Some(done) = current.take() {
            sections.push(self.finish(done));
        }
        sections
    }

    fn finish(&self, mut section: Section) -> Section {
        section.token_count = self.counter.count(&section.text);
        section
    }
}

/// Depth-first, parent text before children. Skips furniture and blank nodes.
fn flatten<'a>(node: &'a DocNode, doc: &ParsedDocument, out: &mut Vec<FlatNode<'a>>) {
    if node.label.is_furniture() {
        return;
    }
    if node.label != NodeLabel::Picture {
        if let Some(text) = node.text_content() {
            out.push(FlatNode {
                label: &node.label,
                text,
                page: node.page,
                bbox: doc.normalize_bbox(node.page, node.bbox.as_ref()),
                formatting: node.formatting.as_ref(),
            });
        }
    }
    for child in &node.children {
        flatten(child, doc, out);
    }
}

fn heuristic_levels(nodes: &[FlatNode<'_>]) -> Vec<Option<u8>> {
    let median = median_font_size(nodes);
    nodes.iter().map(|n| heuristic_level(n, median)).collect()
}

fn heuristic_level(node: &FlatNode<'_>, median_font: Option<f32>) -> Option<u8> {
    if !matches!(node.label, NodeLabel::Paragraph | NodeLabel::Text) {
        return None;
    }

    let text = node.text;
    if text.chars().count() > HEURISTIC_MAX_CHARS
        || text.split_whitespace().count() > HEURISTIC_MAX_WORDS
        || text.contains('\n')
        || text.ends_with(['.', ',', ';'])
    {
        return None;
    }

    let numbering_depth = OUTLINE_NUMBER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split('.').count());

    let emphasized = node.formatting.is_some_and(|f| {
        f.bold
            || matches!((f.font_size, median_font), (Some(size), Some(median)) if size >= median * HEURISTIC_FONT_RATIO)
    });

    if let Some(depth) = numbering_depth {
        return Some(depth.clamp(1, 3) as u8);
    }
    if !emphasized {
        return None;
    }

    let has_letters = text.chars().any(char::is_alphabetic);
    if has_letters && !text.chars().any(char::is_lowercase) {
        Some(1)
    } else {
        Some(2)
    }
}

fn median_font_size(nodes: &[FlatNode<'_>]) -> Option<f32> {
    let mut sizes: Vec<f32> = nodes
        .iter()
        .filter_map(|n| n.formatting.and_then(|f| f.font_size))
        .filter(|s| s.is_finite() && *s > 0.0)
        .collect();
    if sizes.is_empty() {
        return None;
    }
    sizes.sort_by(|a, b| a.total_cmp(b));
    Some(sizes[sizes.len() / 2])
}
