//! Per-page overlay rasters
//!
//! Each rendered page gets a transparent RGBA surface matching its pixel
//! size. Surfaces are recreated (cleared) on resize and discarded when the
//! reviewer leaves the page; the annotation store is the only durable state.

use crate::annotation::Color;
use crate::geometry::{GeometryError, OverlaySize, PagePoint, PageScale};
use pdf_engine::{PageSize, RgbaImage};
use std::collections::HashMap;
use tiny_skia::{BlendMode, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke};

/// Transparent raster aligned with one rendered page
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    pixmap: Pixmap,
    scale: PageScale,
}

impl OverlaySurface {
    pub fn new(size: OverlaySize, page: PageSize) -> Result<Self, GeometryError> {
        let scale = PageScale::new(size, page)?;
        let pixmap = Pixmap::new(size.width, size.height).ok_or(GeometryError::EmptyOverlay {
            width: size.width,
            height: size.height,
        })?;
        Ok(Self { pixmap, scale })
    }

    pub fn size(&self) -> OverlaySize {
        OverlaySize::new(self.pixmap.width(), self.pixmap.height())
    }

    pub fn scale(&self) -> PageScale {
        self.scale
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Premultiplied RGBA bytes, row-major
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    /// Whether any pixel has non-zero alpha
    pub fn has_ink(&self) -> bool {
        self.pixmap.pixels().iter().any(|p| p.alpha() > 0)
    }

    /// Paint one live segment of an in-progress stroke.
    ///
    /// `thickness` is in points. With `erase` the segment removes overlay
    /// pixels instead of adding them.
    pub fn paint_segment(
        &mut self,
        from: PagePoint,
        to: PagePoint,
        color: Color,
        thickness: f32,
        erase: bool,
    ) {
        let mut builder = PathBuilder::new();
        builder.move_to(from.x, from.y);
        if from == to {
            // Zero-length segments draw nothing; nudge so round caps produce a dot.
            builder.line_to(to.x + 0.01, to.y);
        } else {
            builder.line_to(to.x, to.y);
        }
        let Some(path) = builder.finish() else {
            return;
        };

        let mut paint = Paint::default();
        paint.anti_alias = true;
        if erase {
            paint.set_color(tiny_skia::Color::BLACK);
            paint.blend_mode = BlendMode::DestinationOut;
        } else {
            paint.set_color(color.to_skia());
        }
        let stroke = Stroke {
            width: thickness,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        self.pixmap.stroke_path(&path, &paint, &stroke, self.scale.overlay_transform(), None);
    }

    /// Straight (non-premultiplied) RGBA copy of the surface
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut image = RgbaImage::new(self.pixmap.width(), self.pixmap.height());
        for (dst, src) in image.pixels_mut().zip(self.pixmap.pixels()) {
            let color = src.demultiply();
            dst.0 = [color.red(), color.green(), color.blue(), color.alpha()];
        }
        image
    }
}

/// Overlay surfaces keyed by 1-based page number
#[derive(Debug, Default)]
pub struct SurfaceMap {
    surfaces: HashMap<u32, OverlaySurface>,
}

impl SurfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or resize the surface for a page. A resize always yields a
    /// cleared surface with a fresh scale.
    pub fn prepare(
        &mut self,
        page: u32,
        size: OverlaySize,
        page_size: PageSize,
    ) -> Result<&mut OverlaySurface, GeometryError> {
        let surface = OverlaySurface::new(size, page_size)?;
        tracing::trace!(page, width = size.width, height = size.height, "overlay surface prepared");
        self.surfaces.insert(page, surface);
        self.surfaces
            .get_mut(&page)
            .ok_or(GeometryError::EmptyOverlay { width: size.width, height: size.height })
    }

    pub fn get(&self, page: u32) -> Option<&OverlaySurface> {
        self.surfaces.get(&page)
    }

    pub fn get_mut(&mut self, page: u32) -> Option<&mut OverlaySurface> {
        self.surfaces.get_mut(&page)
    }

    pub fn remove(&mut self, page: u32) -> Option<OverlaySurface> {
        self.surfaces.remove(&page)
    }

    /// Drop every surface except the one for `page`
    pub fn retain_only(&mut self, page: u32) {
        self.surfaces.retain(|&p, _| p == page);
    }

    pub fn clear(&mut self) {
        self.surfaces.clear();
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
