//! Coordinate spaces and per-page scale factors
//!
//! Two spaces are in play:
//! - overlay space: pixels of the rendered page raster, origin top-left, y down
//! - page space: PDF points (1/72 inch) of the page box, origin top-left, y down
//!
//! Annotations are stored in page space. `PageScale` converts between the two
//! for one page at one render size; it must be rebuilt whenever either size
//! changes because pages in a document may differ in size.

use pdf_engine::PageSize;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryError {
    #[error("overlay size {width}x{height} must be non-zero")]
    EmptyOverlay { width: u32, height: u32 },
    #[error("page size {width}x{height}pt must be positive")]
    EmptyPage { width: f32, height: f32 },
}

/// Point in page space (PDF points, top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: f32,
    pub y: f32,
}

impl PagePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PagePoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Component-wise difference `self - other`
    pub fn offset_from(&self, other: &PagePoint) -> PagePoint {
        PagePoint::new(self.x - other.x, self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Point in overlay space (rendered-raster pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayPoint {
    pub x: f32,
    pub y: f32,
}

impl OverlayPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Pixel dimensions of a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlaySize {
    pub width: u32,
    pub height: u32,
}

impl OverlaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Raster size for a page box at the given pixels-per-point factor
    pub fn for_page(page: PageSize, pixels_per_point: f32) -> Self {
        Self {
            width: (page.width_pt * pixels_per_point).round().max(1.0) as u32,
            height: (page.height_pt * pixels_per_point).round().max(1.0) as u32,
        }
    }
}

/// Scale factors between overlay pixels and page points for one page.
///
/// `scale_x = page_width_pt / overlay_width_px`, likewise for y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageScale {
    scale_x: f32,
    scale_y: f32,
}

impl PageScale {
    pub fn new(overlay: OverlaySize, page: PageSize) -> Result<Self, GeometryError> {
        if overlay.width == 0 || overlay.height == 0 {
            return Err(GeometryError::EmptyOverlay {
                width: overlay.width,
                height: overlay.height,
            });
        }
        if !(page.width_pt > 0.0 && page.height_pt > 0.0) {
            return Err(GeometryError::EmptyPage { width: page.width_pt, height: page.height_pt });
        }
        Ok(Self {
            scale_x: page.width_pt / overlay.width as f32,
            scale_y: page.height_pt / overlay.height as f32,
        })
    }

    pub fn identity() -> Self {
        Self { scale_x: 1.0, scale_y: 1.0 }
    }

    pub fn scale_x(&self) -> f32 {
        self.scale_x
    }

    pub fn scale_y(&self) -> f32 {
        self.scale_y
    }

    pub fn to_page(&self, point: OverlayPoint) -> PagePoint {
        PagePoint::new(point.x * self.scale_x, point.y * self.scale_y)
    }

    pub fn to_overlay(&self, point: PagePoint) -> OverlayPoint {
        OverlayPoint::new(point.x / self.scale_x, point.y / self.scale_y)
    }

    /// Convert a pixel length (stroke width, font size) to points.
    ///
    /// Lengths have no axis, so the mean of both factors is used.
    pub fn length_to_page(&self, pixels: f32) -> f32 {
        pixels * (self.scale_x + self.scale_y) * 0.5
    }

    pub fn length_to_overlay(&self, points: f32) -> f32 {
        points * 2.0 / (self.scale_x + self.scale_y)
    }

    /// Transform mapping page space onto overlay pixels
    pub fn overlay_transform(&self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_scale(1.0 / self.scale_x, 1.0 / self.scale_y)
    }
}

/// Axis-aligned box in page space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn from_origin(origin: PagePoint, width: f32, height: f32) -> Self {
        Self::new(origin.x, origin.y, origin.x + width, origin.y + height)
    }

    /// Bounding box of a point set; `None` when empty
    pub fn enclosing(points: &[PagePoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self::new(first.x, first.y, first.x, first.y);
        for point in &points[1..] {
            bounds.min_x = bounds.min_x.min(point.x);
            bounds.min_y = bounds.min_y.min(point.y);
            bounds.max_x = bounds.max_x.max(point.x);
            bounds.max_y = bounds.max_y.max(point.y);
        }
        Some(bounds)
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, point: &PagePoint) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    pub fn inflate(&self, amount: f32) -> Self {
        Self::new(self.min_x - amount, self.min_y - amount, self.max_x + amount, self.max_y + amount)
    }

    pub fn to_rect(&self) -> Option<tiny_skia::Rect> {
        tiny_skia::Rect::from_ltrb(self.min_x, self.min_y, self.max_x, self.max_y)
    }
}
