//! Label font: text measurement and glyph outlines
//!
//! Labels are drawn as filled glyph outlines, so the same font produces the
//! same shapes in the interactive overlay and in a baked PDF. DejaVu Sans is
//! bundled; a different TrueType/OpenType face can be supplied at runtime.

use crate::geometry::PagePoint;
use std::sync::Arc;
use ttf_parser::{Face, GlyphId, OutlineBuilder};

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Horizontal text measurement, in the same units as `font_size`
pub trait TextMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32;
}

#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("font data could not be parsed: {0}")]
    Parse(#[from] ttf_parser::FaceParsingError),
    #[error("font reports zero units per em")]
    ZeroUnitsPerEm,
}

/// A parsed font face shared between painters
#[derive(Clone)]
pub struct LabelFont {
    data: Arc<[u8]>,
    units_per_em: f32,
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont")
            .field("bytes", &self.data.len())
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl LabelFont {
    /// The bundled DejaVu Sans face
    pub fn bundled() -> Result<Self, FontError> {
        Self::from_bytes(BUNDLED_FONT.to_vec())
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FontError> {
        let face = Face::parse(&data, 0)?;
        let units_per_em = face.units_per_em();
        if units_per_em == 0 {
            return Err(FontError::ZeroUnitsPerEm);
        }
        Ok(Self { data: data.into(), units_per_em: units_per_em as f32 })
    }

    // Parsing only reads the table directory; validated in the constructor.
    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, 0).ok()
    }

    fn glyph(face: &Face<'_>, ch: char) -> GlyphId {
        face.glyph_index(ch).unwrap_or(GlyphId(0))
    }

    fn advance(&self, face: &Face<'_>, glyph: GlyphId) -> f32 {
        face.glyph_hor_advance(glyph).map(f32::from).unwrap_or(self.units_per_em * 0.5)
    }

    /// Glyph outlines of `text` with the baseline starting at `origin`.
    ///
    /// Coordinates are in page space (y down). Returns `None` when the text
    /// has no visible outlines, e.g. only whitespace.
    pub fn text_path(&self, text: &str, font_size: f32, origin: PagePoint) -> Option<tiny_skia::Path> {
        let face = self.face()?;
        let scale = font_size / self.units_per_em;
        let mut sink = GlyphSink {
            builder: tiny_skia::PathBuilder::new(),
            scale,
            x: origin.x,
            y: origin.y,
        };

        for ch in text.chars() {
            let glyph = Self::glyph(&face, ch);
            face.outline_glyph(glyph, &mut sink);
            sink.x += self.advance(&face, glyph) * scale;
        }

        sink.builder.finish()
    }
}

impl TextMetrics for LabelFont {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Some(face) = self.face() else {
            return 0.0;
        };
        let units: f32 = text.chars().map(|ch| self.advance(&face, Self::glyph(&face, ch))).sum();
        units * font_size / self.units_per_em
    }
}

/// Collects font-unit outlines into a page-space path, flipping y
struct GlyphSink {
    builder: tiny_skia::PathBuilder,
    scale: f32,
    x: f32,
    y: f32,
}

impl GlyphSink {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.scale, self.y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphSink {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}
