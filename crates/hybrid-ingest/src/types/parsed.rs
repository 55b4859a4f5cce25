//! Structured output of the document-parsing service

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::document::FileType;
use super::geometry::{BoundingBox, PageSize};

/// Layout label assigned to a node by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Title,
    SectionHeader,
    SubsectionHeader,
    Paragraph,
    Text,
    ListItem,
    Caption,
    Table,
    Code,
    Formula,
    Footnote,
    Picture,
    PageHeader,
    PageFooter,
    /// Structural container without text of its own
    Group,
}

impl NodeLabel {
    /// Heading level for heading labels, `None` for body labels
    pub fn heading_level(&self) -> Option<u8> {
        match self {
            NodeLabel::Title => Some(1),
            NodeLabel::SectionHeader => Some(2),
            NodeLabel::SubsectionHeader => Some(3),
            _ => None,
        }
    }

    /// Page furniture repeated on every page
    pub fn is_furniture(&self) -> bool {
        matches!(self, NodeLabel::PageHeader | NodeLabel::PageFooter)
    }
}

/// Text formatting hints reported by the parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextFormatting {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub font_size: Option<f32>,
}

/// One node of the parsed document tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocNode {
    pub label: NodeLabel,
    #[serde(default)]
    pub text: Option<String>,
    /// 1-indexed page number
    #[serde(default)]
    pub page: Option<u32>,
    /// Absolute box in page units
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub formatting: Option<TextFormatting>,
    #[serde(default)]
    pub children: Vec<DocNode>,
}

impl DocNode {
    /// Create a container node
    pub fn group(children: Vec<DocNode>) -> Self {
        Self {
            label: NodeLabel::Group,
            text: None,
            page: None,
            bbox: None,
            formatting: None,
            children,
        }
    }

    /// Create a text-bearing leaf node
    pub fn leaf(label: NodeLabel, text: impl Into<String>, page: u32) -> Self {
        Self {
            label,
            text: Some(text.into()),
            page: Some(page),
            bbox: None,
            formatting: None,
            children: Vec::new(),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_formatting(mut self, formatting: TextFormatting) -> Self {
        self.formatting = Some(formatting);
        self
    }

    /// Non-blank text, trimmed
    pub fn text_content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Encoded picture bytes
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBitmap {
    pub data: Bytes,
    pub mime_type: String,
}

impl ImageBitmap {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A picture embedded in a parsed document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPicture {
    /// Stable reference within the document (e.g. `#/pictures/3`)
    pub reference: String,
    pub page: Option<u32>,
    /// Absolute box in page units
    pub bbox: Option<BoundingBox>,
    pub image: ImageBitmap,
}

/// Parsed document handle handed over by the parsing service
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub filename: String,
    pub file_type: FileType,
    pub root: DocNode,
    /// Page number -> page dimensions
    pub pages: BTreeMap<u32, PageSize>,
    pub pictures: Vec<ParsedPicture>,
}

impl ParsedDocument {
    pub fn new(filename: impl Into<String>, file_type: FileType, root: DocNode) -> Self {
        Self {
            filename: filename.into(),
            file_type,
            root,
            pages: BTreeMap::new(),
            pictures: Vec::new(),
        }
    }

    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        self.pages.get(&page).copied()
    }

    /// Normalize an absolute box on `page`, if that page's size is known
    pub fn normalize_bbox(&self, page: Option<u32>, bbox: Option<&BoundingBox>) -> Option<BoundingBox> {
        let size = self.page_size(page?)?;
        bbox?.normalize(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_levels() {
        assert_eq!(NodeLabel::Title.heading_level(), Some(1));
        assert_eq!(NodeLabel::SectionHeader.heading_level(), Some(2));
        assert_eq!(NodeLabel::SubsectionHeader.heading_level(), Some(3));
        assert_eq!(NodeLabel::Paragraph.heading_level(), None);
    }

    #[test]
    fn test_text_content_trims_blank() {
        let node = DocNode::leaf(NodeLabel::Text, "   ", 1);
        assert_eq!(node.text_content(), None);

        let node = DocNode::leaf(NodeLabel::Text, "  hello ", 1);
        assert_eq!(node.text_content(), Some("hello"));
    }

    #[test]
    fn test_node_tree_deserializes() {
        let json = r#"{
            "label": "group",
            "children": [
                {"label": "title", "text": "Intro", "page": 1,
                 "bbox": {"left": 10.0, "top": 10.0, "right": 100.0, "bottom": 30.0}},
                {"label": "paragraph", "text": "Body", "page": 1}
            ]
        }"#;
        let root: DocNode = serde_json::from_str(json).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].label, NodeLabel::Title);
    }

    #[test]
    fn test_normalize_bbox_requires_page_size() {
        let mut doc = ParsedDocument::new("a.pdf", FileType::Pdf, DocNode::group(vec![]));
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
        assert!(doc.normalize_bbox(Some(1), Some(&bbox)).is_none());

        doc.pages.insert(1, PageSize::new(100.0, 100.0));
        let norm = doc.normalize_bbox(Some(1), Some(&bbox)).unwrap();
        assert_eq!(norm, BoundingBox::new(0.0, 0.0, 0.5, 0.5));
        assert!(doc.normalize_bbox(None, Some(&bbox)).is_none());
    }
}
