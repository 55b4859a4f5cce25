//! Source documents, sections and chunks with page/box provenance

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::geometry::BoundingBox;

/// Supported input formats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// Old Microsoft Word document (.doc)
    Doc,
    /// Microsoft PowerPoint presentation (.pptx)
    Pptx,
    /// Old Microsoft PowerPoint (.ppt)
    Ppt,
    /// Excel spreadsheet (.xlsx)
    Xlsx,
    /// OpenDocument Text
    Odt,
    /// OpenDocument Presentation
    Odp,
    /// HTML document
    Html,
    /// Markdown file
    Markdown,
    /// Plain text file
    Txt,
    /// Standalone image
    Image,
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "doc" => Self::Doc,
            "pptx" => Self::Pptx,
            "ppt" => Self::Ppt,
            "xlsx" => Self::Xlsx,
            "odt" => Self::Odt,
            "odp" => Self::Odp,
            "html" | "htm" => Self::Html,
            "md" | "markdown" => Self::Markdown,
            "txt" | "text" => Self::Txt,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tiff" | "tif" => Self::Image,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a filename's extension
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit_once('.') {
            Some((_, ext)) => Self::from_extension(ext),
            None => Self::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Slide decks, where a page is a slide
    pub fn is_presentation(&self) -> bool {
        matches!(self, Self::Pptx | Self::Ppt | Self::Odp)
    }

    /// Short identifier stored in section and chunk metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Pptx => "pptx",
            Self::Ppt => "ppt",
            Self::Xlsx => "xlsx",
            Self::Odt => "odt",
            Self::Odp => "odp",
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::Txt => "txt",
            Self::Image => "image",
            Self::Unknown => "unknown",
        }
    }
}

/// A raw document submitted for ingestion
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub id: Uuid,
    pub filename: String,
    pub data: Bytes,
    /// Tenant namespace for the graph store
    pub namespace: String,
    /// Batch this document was submitted with
    pub batch_id: Option<Uuid>,
}

impl DocumentSource {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>, namespace: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            data: data.into(),
            namespace: namespace.into(),
            batch_id: None,
        }
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_filename(&self.filename)
    }

    /// SHA-256 of the raw bytes, hex encoded
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

/// Where a section or chunk came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMetadata {
    /// Original filename
    pub source: String,
    pub file_type: FileType,
}

/// A vision-model description attached to a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnnotation {
    pub picture_ref: String,
    pub page: Option<u32>,
    /// Page-normalized box
    pub bbox: Option<BoundingBox>,
    /// Absolute box in page units
    pub abs_bbox: Option<BoundingBox>,
    /// IoU of the match, 0.0 for fallback attachments
    pub confidence: f64,
    pub description: String,
    pub model: String,
}

/// Output of the vision model for one picture, before it is matched to a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub picture_ref: String,
    pub page: Option<u32>,
    /// Page-normalized box
    pub bbox: Option<BoundingBox>,
    pub abs_bbox: Option<BoundingBox>,
    pub description: String,
    pub model: String,
}

impl ImageDescription {
    /// Attach with the given match confidence
    pub fn into_annotation(self, confidence: f64) -> ImageAnnotation {
        ImageAnnotation {
            picture_ref: self.picture_ref,
            page: self.page,
            bbox: self.bbox,
            abs_bbox: self.abs_bbox,
            confidence,
            description: self.description,
            model: self.model,
        }
    }
}

/// A heading-delimited unit of document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    /// Hierarchy level, 1-3
    pub level: u8,
    /// 1-indexed page of the heading
    pub page: u32,
    /// Page-normalized box
    pub bbox: Option<BoundingBox>,
    /// Body text under the heading
    pub text: String,
    pub token_count: usize,
    pub metadata: SectionMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_annotations: Vec<ImageAnnotation>,
}

impl Section {
    pub fn new(heading: impl Into<String>, level: u8, page: u32, metadata: SectionMetadata) -> Self {
        Self {
            heading: heading.into(),
            level: level.clamp(1, 3),
            page,
            bbox: None,
            text: String::new(),
            token_count: 0,
            metadata,
            image_annotations: Vec::new(),
        }
    }

    /// Heading followed by body, as embedded into chunk text
    pub fn render(&self) -> String {
        if self.text.is_empty() {
            self.heading.clone()
        } else {
            format!("{}\n\n{}", self.heading, self.text)
        }
    }
}

/// How a chunk was formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Exactly one section
    Standalone,
    /// Several consecutive small sections
    Merged,
}

/// Merge provenance of a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub file_type: FileType,
    pub num_sections: usize,
    pub kind: ChunkKind,
    /// Total tokens fell below the configured minimum
    pub undersized: bool,
}

/// A retrieval unit built from one or more sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    /// Position within the document
    pub chunk_index: usize,
    pub text: String,
    /// Sum of the contributing sections' token counts
    pub token_count: usize,
    pub section_headings: Vec<String>,
    pub section_pages: Vec<u32>,
    pub section_bboxes: Vec<Option<BoundingBox>>,
    /// Heading of the first contributing section
    pub primary_section: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_annotations: Vec<ImageAnnotation>,
}

impl Chunk {
    /// Build a chunk from consecutive sections. `sections` must be non-empty.
    pub(crate) fn from_sections(chunk_index: usize, sections: &[Section], min_tokens: usize) -> Self {
        let token_count: usize = sections.iter().map(|s| s.token_count).sum();
        let text = sections
            .iter()
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n\n");

        let (source, file_type) = sections
            .first()
            .map(|s| (s.metadata.source.clone(), s.metadata.file_type.clone()))
            .unwrap_or_else(|| (String::new(), FileType::Unknown));

        Self {
            id: Uuid::new_v4(),
            chunk_index,
            text,
            token_count,
            section_headings: sections.iter().map(|s| s.heading.clone()).collect(),
            section_pages: sections.iter().map(|s| s.page).collect(),
            section_bboxes: sections.iter().map(|s| s.bbox).collect(),
            primary_section: sections.first().map(|s| s.heading.clone()).unwrap_or_default(),
            metadata: ChunkMetadata {
                source,
                file_type,
                num_sections: sections.len(),
                kind: if sections.len() == 1 {
                    ChunkKind::Standalone
                } else {
                    ChunkKind::Merged
                },
                undersized: token_count < min_tokens,
            },
            image_annotations: sections
                .iter()
                .flat_map(|s| s.image_annotations.iter().cloned())
                .collect(),
        }
    }

    /// Payload stored next to the vectors
    pub fn to_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut meta = serde_json::Map::new();
        meta.insert("chunk_id".to_string(), serde_json::json!(self.id.to_string()));
        meta.insert("chunk_index".to_string(), serde_json::json!(self.chunk_index));
        meta.insert("text".to_string(), serde_json::json!(self.text));
        meta.insert("token_count".to_string(), serde_json::json!(self.token_count));
        meta.insert("primary_section".to_string(), serde_json::json!(self.primary_section));
        meta.insert("section_headings".to_string(), serde_json::json!(self.section_headings));
        meta.insert("section_pages".to_string(), serde_json::json!(self.section_pages));
        meta.insert("source".to_string(), serde_json::json!(self.metadata.source));
        meta.insert("file_type".to_string(), serde_json::json!(self.metadata.file_type));
        meta.insert("num_sections".to_string(), serde_json::json!(self.metadata.num_sections));

        if !self.image_annotations.is_empty() {
            let descriptions: Vec<&str> = self
                .image_annotations
                .iter()
                .map(|a| a.description.as_str())
                .collect();
            meta.insert("image_descriptions".to_string(), serde_json::json!(descriptions));
        }

        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SectionMetadata {
        SectionMetadata {
            source: "deck.pptx".to_string(),
            file_type: FileType::Pptx,
        }
    }

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_filename("report.PDF"), FileType::Pdf);
        assert_eq!(FileType::from_filename("slides.pptx"), FileType::Pptx);
        assert_eq!(FileType::from_filename("README"), FileType::Unknown);
        assert!(FileType::Odp.is_presentation());
        assert!(!FileType::Unknown.is_supported());
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = DocumentSource::new("a.txt", b"hello".to_vec(), "ns");
        let b = DocumentSource::new("b.txt", b"hello".to_vec(), "ns");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_chunk_from_sections_keeps_parallel_arrays() {
        let mut first = Section::new("Intro", 1, 1, meta());
        first.text = "alpha".to_string();
        first.token_count = 10;
        first.bbox = Some(BoundingBox::new(0.0, 0.0, 1.0, 0.5));
        let mut second = Section::new("Usage", 2, 2, meta());
        second.token_count = 5;

        let chunk = Chunk::from_sections(3, &[first, second], 20);
        assert_eq!(chunk.chunk_index, 3);
        assert_eq!(chunk.token_count, 15);
        assert_eq!(chunk.primary_section, "Intro");
        assert_eq!(chunk.section_headings, vec!["Intro", "Usage"]);
        assert_eq!(chunk.section_pages, vec![1, 2]);
        assert_eq!(chunk.section_bboxes.len(), 2);
        assert_eq!(chunk.metadata.num_sections, 2);
        assert_eq!(chunk.metadata.kind, ChunkKind::Merged);
        assert!(chunk.metadata.undersized);
        assert_eq!(chunk.text, "Intro\n\nalpha\n\nUsage");
    }

    #[test]
    fn test_payload_contains_provenance() {
        let mut section = Section::new("Only", 1, 4, meta());
        section.token_count = 1;
        let chunk = Chunk::from_sections(0, &[section], 0);
        let payload = chunk.to_payload();
        assert_eq!(payload["primary_section"], "Only");
        assert_eq!(payload["file_type"], "pptx");
        assert!(!payload.contains_key("image_descriptions"));
    }
}
