//! Matching vision-model image descriptions to sections by box overlap

use crate::types::{BoundingBox, ImageDescription, Section};

/// IoU above which a match counts as high confidence
pub const IOU_MATCH_THRESHOLD: f64 = 0.5;

/// Intersection-over-Union of two boxes
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    a.iou(b)
}

/// Outcome of integrating a batch of descriptions
#[derive(Debug, Default)]
pub struct IntegrationReport {
    /// Attached with IoU above the threshold
    pub matched: usize,
    /// Attached to a fallback section with confidence 0.0
    pub fallback: usize,
    /// Returned because there was no section at all
    pub unattached: Vec<ImageDescription>,
}

/// Attach every description to exactly one section.
///
/// Sections are consumed and returned with their `image_annotations` filled.
/// If `sections` is empty nothing can be attached and every description comes
/// back in [`IntegrationReport::unattached`].
pub fn integrate_images(
    mut sections: Vec<Section>,
    images: Vec<ImageDescription>,
) -> (Vec<Section>, IntegrationReport) {
    let mut report = IntegrationReport::default();

    if sections.is_empty() {
        report.unattached = images;
        return (sections, report);
    }

    for image in images {
        let (index, confidence) = match_section(&sections, &image);
        if confidence > IOU_MATCH_THRESHOLD {
            report.matched += 1;
        } else {
            report.fallback += 1;
        }
        tracing::trace!(
            "image {} -> section {} ('{}') iou={:.3}",
            image.picture_ref,
            index,
            sections[index].heading,
            confidence
        );
        sections[index]
            .image_annotations
            .push(image.into_annotation(confidence));
    }

    (sections, report)
}

/// Pick the target section index and confidence for one image.
///
/// `sections` must be non-empty. Equal IoU keeps the lowest section index.
pub fn match_section(sections: &[Section], image: &ImageDescription) -> (usize, f64) {
    let Some(bbox) = image.bbox else {
        return (0, 0.0);
    };
    let Some(page) = image.page else {
        return (0, 0.0);
    };

    let mut best: Option<(usize, f64)> = None;
    for (index, section) in sections.iter().enumerate() {
        if section.page != page {
            continue;
        }
        let Some(section_box) = section.bbox else {
            continue;
        };
        let score = bbox.iou(&section_box);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }

    match best {
        Some((index, score)) if score > IOU_MATCH_THRESHOLD => (index, score),
        _ => {
            let first_on_page = sections.iter().position(|s| s.page == page).unwrap_or(0);
            (first_on_page, 0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileType, SectionMetadata};

    fn section(heading: &str, page: u32, bbox: Option<BoundingBox>) -> Section {
        let mut s = Section::new(
            heading,
            2,
            page,
            SectionMetadata {
                source: "deck.pdf".to_string(),
                file_type: FileType::Pdf,
            },
        );
        s.bbox = bbox;
        s
    }

    fn image(name: &str, page: Option<u32>, bbox: Option<BoundingBox>) -> ImageDescription {
        ImageDescription {
            picture_ref: name.to_string(),
            page,
            bbox,
            abs_bbox: None,
            description: format!("a picture called {}", name),
            model: "vision-test".to_string(),
        }
    }

    fn count_annotations(sections: &[Section]) -> usize {
        sections.iter().map(|s| s.image_annotations.len()).sum()
    }

    #[test]
    fn test_high_confidence_match() {
        let sections = vec![
            section("Cover", 1, Some(BoundingBox::new(0.0, 0.0, 1.0, 0.1))),
            section("Chart", 1, Some(BoundingBox::new(0.1, 0.2, 0.5, 0.6))),
        ];
        let images = vec![image(
            "fig1",
            Some(1),
            Some(BoundingBox::new(0.15, 0.25, 0.55, 0.65)),
        )];

        let (sections, report) = integrate_images(sections, images);
        assert_eq!(report.matched, 1);
        assert_eq!(sections[1].image_annotations.len(), 1);
        let annotation = &sections[1].image_annotations[0];
        assert!(annotation.confidence > 0.5);
        assert_eq!(annotation.model, "vision-test");
    }

    #[test]
    fn test_low_overlap_falls_back_to_first_on_page() {
        let sections = vec![
            section("Page one", 1, Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0))),
            section("Page two top", 2, Some(BoundingBox::new(0.0, 0.0, 1.0, 0.2))),
            section("Page two body", 2, Some(BoundingBox::new(0.0, 0.2, 1.0, 0.9))),
        ];
        let images = vec![image("small", Some(2), Some(BoundingBox::new(0.4, 0.4, 0.5, 0.5)))];

        let (sections, report) = integrate_images(sections, images);
        assert_eq!(report.fallback, 1);
        assert_eq!(sections[1].image_annotations.len(), 1);
        assert_eq!(sections[1].image_annotations[0].confidence, 0.0);
    }

    #[test]
    fn test_no_bbox_goes_to_first_section() {
        let sections = vec![section("A", 1, None), section("B", 2, None)];
        let (sections, _) = integrate_images(sections, vec![image("nobox", Some(2), None)]);
        assert_eq!(sections[0].image_annotations.len(), 1);
        assert_eq!(sections[0].image_annotations[0].confidence, 0.0);
    }

    #[test]
    fn test_page_without_sections_goes_to_first_section() {
        let sections = vec![section("A", 1, Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)))];
        let (sections, report) = integrate_images(
            sections,
            vec![image("orphan", Some(7), Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)))],
        );
        assert_eq!(report.fallback, 1);
        assert_eq!(sections[0].image_annotations.len(), 1);
    }

    #[test]
    fn test_tie_keeps_lowest_index() {
        let same = BoundingBox::new(0.1, 0.1, 0.6, 0.6);
        let sections = vec![
            section("Intro", 1, Some(BoundingBox::new(0.0, 0.0, 0.05, 0.05))),
            section("First twin", 1, Some(same)),
            section("Second twin", 1, Some(same)),
        ];
        let (index, confidence) = match_section(&sections, &image("x", Some(1), Some(same)));
        assert_eq!(index, 1);
        assert!((confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_image_attached_once() {
        let sections = vec![
            section("A", 1, Some(BoundingBox::new(0.0, 0.0, 1.0, 0.5))),
            section("B", 1, Some(BoundingBox::new(0.0, 0.5, 1.0, 1.0))),
            section("C", 2, None),
        ];
        let images = vec![
            image("1", Some(1), Some(BoundingBox::new(0.0, 0.0, 1.0, 0.45))),
            image("2", Some(1), Some(BoundingBox::new(0.0, 0.55, 1.0, 1.0))),
            image("3", Some(2), Some(BoundingBox::new(0.2, 0.2, 0.3, 0.3))),
            image("4", None, None),
            image("5", Some(9), None),
        ];
        let (sections, report) = integrate_images(sections, images);
        assert_eq!(count_annotations(&sections), 5);
        assert_eq!(report.matched + report.fallback, 5);
        assert!(report.unattached.is_empty());

        let mut refs: Vec<String> = sections
            .iter()
            .flat_map(|s| s.image_annotations.iter().map(|a| a.picture_ref.clone()))
            .collect();
        refs.sort();
        assert_eq!(refs, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_no_sections_returns_images() {
        let (sections, report) = integrate_images(Vec::new(), vec![image("lost", Some(1), None)]);
        assert!(sections.is_empty());
        assert_eq!(report.unattached.len(), 1);
    }
}
