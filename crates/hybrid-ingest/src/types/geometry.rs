//! Page geometry: bounding boxes and page sizes

use serde::{Deserialize, Serialize};

/// Page dimensions in the parser's page units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box with a top-left origin.
///
/// Used both in absolute page units and in page-normalized `[0, 1]`
/// coordinates; [`BoundingBox::normalize`] converts the former to the latter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Convert an absolute box to page-normalized coordinates, clamped to `[0, 1]`.
    ///
    /// Returns `None` for degenerate pages.
    pub fn normalize(&self, page: PageSize) -> Option<Self> {
        if page.width <= 0.0 || page.height <= 0.0 {
            return None;
        }
        Some(Self {
            left: (self.left / page.width).clamp(0.0, 1.0),
            top: (self.top / page.height).clamp(0.0, 1.0),
            right: (self.right / page.width).clamp(0.0, 1.0),
            bottom: (self.bottom / page.height).clamp(0.0, 1.0),
        })
    }

    /// Smallest box covering both
    pub fn union(&self, other: &Self) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Overlap area, zero when the boxes do not intersect
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);

        if right <= left || bottom <= top {
            return 0.0;
        }
        (right - left) * (bottom - top)
    }

    /// Intersection-over-Union.
    ///
    /// Non-overlapping pairs return 0.0 before any division, so degenerate
    /// boxes never divide by a zero union.
    pub fn iou(&self, other: &Self) -> f64 {
        let intersection = self.intersection_area(other);
        if intersection <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.1, 0.1, 0.4, 0.5);
        assert!((a.iou(&a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
        let b = BoundingBox::new(0.5, 0.5, 0.9, 0.9);
        assert_eq!(a.iou(&b), 0.0);

        // Touching edges do not overlap
        let c = BoundingBox::new(0.2, 0.0, 0.4, 0.2);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let point = BoundingBox::new(0.3, 0.3, 0.3, 0.3);
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let image = BoundingBox::new(0.15, 0.25, 0.55, 0.65);
        let section = BoundingBox::new(0.1, 0.2, 0.5, 0.6);
        // 0.35 * 0.35 / (0.16 + 0.16 - 0.1225)
        let expected = 0.1225 / 0.1975;
        assert!((image.iou(&section) - expected).abs() < 1e-9);
        assert!(image.iou(&section) > 0.5);
    }

    #[test]
    fn test_normalize() {
        let abs = BoundingBox::new(61.2, 79.2, 306.0, 396.0);
        let norm = abs.normalize(PageSize::new(612.0, 792.0)).unwrap();
        assert!((norm.left - 0.1).abs() < 1e-9);
        assert!((norm.top - 0.1).abs() < 1e-9);
        assert!((norm.right - 0.5).abs() < 1e-9);
        assert!((norm.bottom - 0.5).abs() < 1e-9);

        assert!(abs.normalize(PageSize::new(0.0, 792.0)).is_none());
    }

    #[test]
    fn test_union() {
        let a = BoundingBox::new(0.1, 0.2, 0.3, 0.4);
        let b = BoundingBox::new(0.2, 0.1, 0.5, 0.3);
        assert_eq!(a.union(&b), BoundingBox::new(0.1, 0.1, 0.5, 0.4));
    }

    fn bbox() -> impl Strategy<Value = BoundingBox> {
        (0.0..1.0f64, 0.0..1.0f64, 0.0..1.0f64, 0.0..1.0f64)
            .prop_map(|(left, top, w, h)| BoundingBox::new(left, top, left + w, top + h))
    }

    proptest! {
        #[test]
        fn prop_iou_symmetric_and_bounded(a in bbox(), b in bbox()) {
            let ab = a.iou(&b);
            prop_assert_eq!(ab, b.iou(&a));
            prop_assert!((0.0..=1.0).contains(&ab));
            if a.area() > 0.0 {
                prop_assert!((a.iou(&a) - 1.0).abs() < 1e-12);
            }
        }
    }
}
