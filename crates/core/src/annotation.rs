//! Annotation data model
//!
//! An annotation is a user-authored mark on one page: a freehand stroke, a
//! text label, or a stamp image. All geometry is stored in page space
//! (points, top-left origin) so marks keep their position across zoom levels
//! and render sizes.

use crate::geometry::{Bounds, PagePoint};
use crate::text::TextMetrics;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unique identifier for an annotation
///
/// Stable for the lifetime of the annotation, including draft round-trips.
pub type AnnotationId = uuid::Uuid;

/// Identifier of a document under review, as assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
}

impl Default for Color {
    fn default() -> Self {
        Self::RED
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid color {0:?}, expected #rrggbb or #rrggbbaa")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    /// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || ParseColorError(s.to_string());
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, alpha))
    }
}

/// Encoded raster bytes (PNG or JPEG) of a stamp.
///
/// Shared so clones of an annotation do not copy the image. Serialized as
/// standard base64.
#[derive(Clone, PartialEq, Eq)]
pub struct StampImage(Arc<[u8]>);

impl StampImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for StampImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StampImage({} bytes)", self.0.len())
    }
}

impl Serialize for StampImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for StampImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)?;
        Ok(Self::new(bytes))
    }
}

/// Kind of mark, used for logging and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Stroke,
    Label,
    Stamp,
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stroke => "stroke",
            Self::Label => "label",
            Self::Stamp => "stamp",
        })
    }
}

/// Kind-specific payload of an annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    /// Freehand polyline
    #[serde(rename_all = "camelCase")]
    Stroke { points: Vec<PagePoint>, color: Color, thickness: f32 },

    /// Single-line text; `position` is the left end of the baseline
    #[serde(rename_all = "camelCase")]
    Label { text: String, position: PagePoint, font_size: f32, color: Color },

    /// Raster image; `position` is the top-left corner of its footprint
    #[serde(rename_all = "camelCase")]
    Stamp { image: StampImage, position: PagePoint, width: f32, height: f32 },
}

/// A mark anchored to one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    id: AnnotationId,
    /// 1-based page number
    page: u32,
    #[serde(flatten)]
    mark: Mark,
}

impl Annotation {
    pub fn new(page: u32, mark: Mark) -> Self {
        Self { id: AnnotationId::new_v4(), page, mark }
    }

    pub fn stroke(page: u32, points: Vec<PagePoint>, color: Color, thickness: f32) -> Self {
        Self::new(page, Mark::Stroke { points, color, thickness })
    }

    pub fn label(
        page: u32,
        text: impl Into<String>,
        position: PagePoint,
        font_size: f32,
        color: Color,
    ) -> Self {
        Self::new(page, Mark::Label { text: text.into(), position, font_size, color })
    }

    pub fn stamp(page: u32, image: StampImage, position: PagePoint, width: f32, height: f32) -> Self {
        Self::new(page, Mark::Stamp { image, position, width, height })
    }

    /// Replace the generated id (used when restoring persisted annotations)
    pub fn with_id(mut self, id: AnnotationId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn mark(&self) -> &Mark {
        &self.mark
    }

    pub fn kind(&self) -> AnnotationKind {
        match self.mark {
            Mark::Stroke { .. } => AnnotationKind::Stroke,
            Mark::Label { .. } => AnnotationKind::Label,
            Mark::Stamp { .. } => AnnotationKind::Stamp,
        }
    }

    /// Labels and stamps can be dragged; strokes cannot
    pub fn is_relocatable(&self) -> bool {
        !matches!(self.mark, Mark::Stroke { .. })
    }

    /// Anchor position: first point of a stroke, baseline origin of a label,
    /// top-left corner of a stamp
    pub fn position(&self) -> Option<PagePoint> {
        match &self.mark {
            Mark::Stroke { points, .. } => points.first().copied(),
            Mark::Label { position, .. } | Mark::Stamp { position, .. } => Some(*position),
        }
    }

    pub(crate) fn set_position(&mut self, to: PagePoint) {
        match &mut self.mark {
            Mark::Label { position, .. } | Mark::Stamp { position, .. } => *position = to,
            Mark::Stroke { .. } => {}
        }
    }

    /// A copy of this annotation anchored at `to`, keeping its id
    pub fn moved_to(&self, to: PagePoint) -> Self {
        let mut moved = self.clone();
        moved.set_position(to);
        moved
    }

    /// Page-space box covered by the mark.
    ///
    /// Label boxes span measured text width by font size, above the
    /// baseline. Stamp boxes span the stored footprint.
    pub fn bounds(&self, metrics: &dyn TextMetrics) -> Option<Bounds> {
        match &self.mark {
            Mark::Stroke { points, thickness, .. } => {
                Bounds::enclosing(points).map(|b| b.inflate(thickness * 0.5))
            }
            Mark::Label { text, position, font_size, .. } => {
                let width = metrics.text_width(text, *font_size);
                Some(Bounds::new(position.x, position.y - font_size, position.x + width, position.y))
            }
            Mark::Stamp { position, width, height, .. } => {
                Some(Bounds::from_origin(*position, *width, *height))
            }
        }
    }

    /// Reason this annotation cannot be stored, if any
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.page == 0 {
            return Err("page numbers start at 1");
        }
        match &self.mark {
            Mark::Stroke { points, thickness, .. } => {
                if points.len() < 2 {
                    return Err("stroke needs at least two points");
                }
                if !points.iter().all(PagePoint::is_finite) {
                    return Err("stroke point is not finite");
                }
                if !(*thickness > 0.0 && thickness.is_finite()) {
                    return Err("stroke thickness must be positive");
                }
            }
            Mark::Label { text, position, font_size, .. } => {
                if text.trim().is_empty() {
                    return Err("label text is empty");
                }
                if !position.is_finite() {
                    return Err("label position is not finite");
                }
                if !(*font_size > 0.0 && font_size.is_finite()) {
                    return Err("label font size must be positive");
                }
            }
            Mark::Stamp { image, position, width, height } => {
                if image.is_empty() {
                    return Err("stamp image is empty");
                }
                if !position.is_finite() {
                    return Err("stamp position is not finite");
                }
                if !(*width > 0.0 && *height > 0.0 && width.is_finite() && height.is_finite()) {
                    return Err("stamp footprint must be positive");
                }
            }
        }
        Ok(())
    }
}
