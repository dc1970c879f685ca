//! Active tool and its settings
//!
//! Sizes here are in overlay pixels, as the reviewer sees them. They are
//! converted to page points when a mark is committed.

use crate::annotation::{Color, StampImage};
use crate::config::ToolDefaults;
use crate::geometry::PagePoint;
use crate::render::{decode_stamp, DecodeError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pencil,
    Eraser,
    Text,
    Stamp,
}

/// A decoded stamp image waiting to be placed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStamp {
    image: StampImage,
    width_px: u32,
    height_px: u32,
}

impl PendingStamp {
    pub fn image(&self) -> &StampImage {
        &self.image
    }

    /// Intrinsic pixel size of the image
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Footprint for a given width, keeping the image aspect ratio
    pub fn footprint(&self, width: f32) -> (f32, f32) {
        let aspect = self.height_px as f32 / self.width_px.max(1) as f32;
        (width, width * aspect)
    }
}

#[derive(Debug, Clone)]
pub struct ToolState {
    tool: Tool,
    color: Color,
    thickness_px: f32,
    font_size_px: f32,
    stamp_width_px: f32,
    pending_stamp: Option<PendingStamp>,
    pending_text_at: Option<PagePoint>,
}

impl Default for ToolState {
    fn default() -> Self {
        Self::from_defaults(&ToolDefaults::default())
    }
}

impl ToolState {
    pub fn from_defaults(defaults: &ToolDefaults) -> Self {
        Self {
            tool: Tool::default(),
            color: defaults.color,
            thickness_px: defaults.thickness_px,
            font_size_px: defaults.font_size_px,
            stamp_width_px: defaults.stamp_width_px,
            pending_stamp: None,
            pending_text_at: None,
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        if self.tool != tool {
            tracing::debug!(from = ?self.tool, to = ?tool, "tool changed");
            self.pending_text_at = None;
        }
        self.tool = tool;
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn thickness_px(&self) -> f32 {
        self.thickness_px
    }

    /// Non-positive or non-finite values are ignored
    pub fn set_thickness(&mut self, px: f32) {
        if px.is_finite() && px > 0.0 {
            self.thickness_px = px;
        }
    }

    pub fn font_size_px(&self) -> f32 {
        self.font_size_px
    }

    /// Non-positive or non-finite values are ignored
    pub fn set_font_size(&mut self, px: f32) {
        if px.is_finite() && px > 0.0 {
            self.font_size_px = px;
        }
    }

    pub fn stamp_width_px(&self) -> f32 {
        self.stamp_width_px
    }

    pub fn pending_stamp(&self) -> Option<&PendingStamp> {
        self.pending_stamp.as_ref()
    }

    /// Decode and hold a stamp image for placement.
    ///
    /// On failure the previously loaded image, if any, stays selected.
    pub fn load_stamp(&mut self, bytes: Vec<u8>) -> Result<(), DecodeError> {
        let image = StampImage::new(bytes);
        let decoded = decode_stamp(&image)?;
        self.pending_stamp = Some(PendingStamp {
            image,
            width_px: decoded.width(),
            height_px: decoded.height(),
        });
        Ok(())
    }

    pub fn clear_stamp(&mut self) {
        self.pending_stamp = None;
    }

    pub fn pending_text_at(&self) -> Option<PagePoint> {
        self.pending_text_at
    }

    pub(crate) fn set_pending_text_at(&mut self, at: Option<PagePoint>) {
        self.pending_text_at = at;
    }
}
