//! Annotation painting
//!
//! `Painter` draws committed annotations onto a pixmap through a
//! page-to-raster scale. The same code path serves the interactive overlay
//! (scale from the rendered page size) and the bake (scale from the bake
//! raster size), so a baked page matches what the reviewer saw.

use crate::annotation::{Annotation, AnnotationId, Mark, StampImage};
use crate::geometry::{PagePoint, PageScale};
use crate::surface::OverlaySurface;
use crate::text::{LabelFont, TextMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_skia::{
    ColorU8, FillRule, FilterQuality, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint,
    Stroke, StrokeDash, Transform,
};

/// Largest stamp edge accepted, in pixels
const MAX_STAMP_EDGE: u32 = 8192;

/// Selection frame colour
const SELECTION_COLOR: (u8, u8, u8, u8) = (0, 120, 215, 255);

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image is empty")]
    Empty,
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image is {width}x{height}, larger than {max}px on a side")]
    TooLarge { width: u32, height: u32, max: u32 },
}

/// Decode stamp bytes into a premultiplied pixmap
pub fn decode_stamp(image: &StampImage) -> Result<Pixmap, DecodeError> {
    if image.is_empty() {
        return Err(DecodeError::Empty);
    }
    let rgba = image::load_from_memory(image.bytes())?.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width > MAX_STAMP_EDGE || height > MAX_STAMP_EDGE {
        return Err(DecodeError::TooLarge { width, height, max: MAX_STAMP_EDGE });
    }
    let mut pixmap = Pixmap::new(width, height).ok_or(DecodeError::Empty)?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PaintError {
    #[error("stamp {id} could not be decoded: {reason}")]
    Stamp { id: AnnotationId, reason: String },
}

/// Interactive decorations layered over the committed annotations
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Affordance {
    /// Annotation under the pointer, framed as a move target
    pub hovered: Option<AnnotationId>,
    /// Annotation being dragged and its live position
    pub dragging: Option<(AnnotationId, PagePoint)>,
}

impl Affordance {
    pub fn none() -> Self {
        Self::default()
    }

    fn framed(&self, id: AnnotationId) -> bool {
        self.hovered == Some(id) || self.dragging.is_some_and(|(dragged, _)| dragged == id)
    }
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub painted: usize,
    pub skipped: Vec<PaintError>,
}

enum CachedStamp {
    Ready(Arc<Pixmap>),
    Failed(String),
}

/// Paints annotations; owns the label font and decoded stamp images
pub struct Painter {
    font: LabelFont,
    stamps: HashMap<AnnotationId, CachedStamp>,
}

impl std::fmt::Debug for Painter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Painter")
            .field("font", &self.font)
            .field("cached_stamps", &self.stamps.len())
            .finish()
    }
}

impl Painter {
    pub fn new(font: LabelFont) -> Self {
        Self { font, stamps: HashMap::new() }
    }

    pub fn font(&self) -> &LabelFont {
        &self.font
    }

    /// Drop cached stamp images
    pub fn forget_stamps(&mut self) {
        self.stamps.clear();
    }

    /// Clear `surface` and repaint every given annotation in order.
    ///
    /// Deterministic: replaying the same annotations onto a surface of the
    /// same size produces identical pixels.
    pub fn replay<'a>(
        &mut self,
        surface: &mut OverlaySurface,
        annotations: impl IntoIterator<Item = &'a Annotation>,
        affordance: &Affordance,
    ) -> ReplayReport {
        surface.clear();
        let scale = surface.scale();
        let mut report = ReplayReport::default();

        for annotation in annotations {
            let moved;
            let annotation = match affordance.dragging {
                Some((id, position)) if id == annotation.id() => {
                    moved = annotation.moved_to(position);
                    &moved
                }
                _ => annotation,
            };
            let framed = affordance.framed(annotation.id());

            match self.paint(surface.pixmap_mut(), &scale, annotation, framed) {
                Ok(()) => report.painted += 1,
                Err(error) => {
                    tracing::warn!(%error, "annotation skipped during replay");
                    report.skipped.push(error);
                }
            }
        }
        report
    }

    /// Paint one annotation through `scale`. With `framed`, a dashed
    /// selection frame is drawn behind it.
    pub fn paint(
        &mut self,
        pixmap: &mut Pixmap,
        scale: &PageScale,
        annotation: &Annotation,
        framed: bool,
    ) -> Result<(), PaintError> {
        let transform = scale.overlay_transform();
        if framed {
            self.paint_frame(pixmap, scale, annotation);
        }

        match annotation.mark() {
            Mark::Stroke { points, color, thickness } => {
                let Some(path) = polyline(points) else {
                    return Ok(());
                };
                let mut paint = Paint::default();
                paint.set_color(color.to_skia());
                let stroke = Stroke {
                    width: *thickness,
                    line_cap: LineCap::Round,
                    line_join: LineJoin::Round,
                    ..Stroke::default()
                };
                pixmap.stroke_path(&path, &paint, &stroke, transform, None);
            }
            Mark::Label { text, position, font_size, color } => {
                if let Some(path) = self.font.text_path(text, *font_size, *position) {
                    let mut paint = Paint::default();
                    paint.set_color(color.to_skia());
                    pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);
                }
            }
            Mark::Stamp { image, position, width, height } => {
                let stamp = self.stamp(annotation.id(), image)?;
                let placement = Transform::from_row(
                    width / stamp.width() as f32,
                    0.0,
                    0.0,
                    height / stamp.height() as f32,
                    position.x,
                    position.y,
                );
                let paint = PixmapPaint { quality: FilterQuality::Bilinear, ..PixmapPaint::default() };
                pixmap.draw_pixmap(
                    0,
                    0,
                    Pixmap::as_ref(&stamp),
                    &paint,
                    transform.pre_concat(placement),
                    None,
                );
            }
        }
        Ok(())
    }

    fn stamp(&mut self, id: AnnotationId, image: &StampImage) -> Result<Arc<Pixmap>, PaintError> {
        let entry = self.stamps.entry(id).or_insert_with(|| match decode_stamp(image) {
            Ok(pixmap) => CachedStamp::Ready(Arc::new(pixmap)),
            Err(error) => CachedStamp::Failed(error.to_string()),
        });
        match entry {
            CachedStamp::Ready(pixmap) => Ok(Arc::clone(pixmap)),
            CachedStamp::Failed(reason) => Err(PaintError::Stamp { id, reason: reason.clone() }),
        }
    }

    fn paint_frame(&self, pixmap: &mut Pixmap, scale: &PageScale, annotation: &Annotation) {
        let one_px = scale.length_to_page(1.0);
        let Some(rect) = annotation
            .bounds(&self.font as &dyn TextMetrics)
            .and_then(|b| b.inflate(2.0 * one_px).to_rect())
        else {
            return;
        };
        let path = PathBuilder::from_rect(rect);
        let (r, g, b, a) = SELECTION_COLOR;
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, a);
        let stroke = Stroke {
            width: one_px,
            dash: StrokeDash::new(vec![4.0 * one_px, 3.0 * one_px], 0.0),
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &stroke, scale.overlay_transform(), None);
    }
}

fn polyline(points: &[PagePoint]) -> Option<tiny_skia::Path> {
    let (first, rest) = points.split_first()?;
    let mut builder = PathBuilder::new();
    builder.move_to(first.x, first.y);
    for point in rest {
        builder.line_to(point.x, point.y);
    }
    builder.finish()
}
