//! Pointer interaction state machine
//!
//! Translates pointer gestures into effects for the session to apply. The
//! machine never mutates the store itself: strokes, labels, stamps and moves
//! are handed back as `Effect`s, so abandoning a gesture (page switch, tool
//! change, close) can never leave a partial commit behind.
//!
//! All points are in page space; the session converts pointer positions
//! before calling in.

use crate::annotation::{Annotation, AnnotationId, Color};
use crate::geometry::{PagePoint, PageScale};
use crate::render::Affordance;
use crate::store::AnnotationStore;
use crate::text::TextMetrics;
use crate::tool::{Tool, ToolState};

/// What a pending placement will create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    Label,
    Stamp,
}

/// Stroke being drawn, in page space
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeInProgress {
    points: Vec<PagePoint>,
    color: Color,
    /// Width in points
    thickness: f32,
    erasing: bool,
}

impl StrokeInProgress {
    pub fn points(&self) -> &[PagePoint] {
        &self.points
    }

    pub fn is_erasing(&self) -> bool {
        self.erasing
    }
}

/// Relocation of a label or stamp in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragState {
    pub annotation_id: AnnotationId,
    /// Anchor position when the drag started
    pub original_position: PagePoint,
    /// Pointer offset from the anchor at grab time
    pub grab_offset: PagePoint,
    /// Live anchor position
    pub current_position: PagePoint,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum InteractionState {
    #[default]
    Idle,
    Drawing(StrokeInProgress),
    Dragging(DragState),
    AwaitingPlacement(PlacementKind),
}

/// Work the session must perform after an input event
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Paint the newest stroke segment onto the live overlay
    PaintSegment { from: PagePoint, to: PagePoint, color: Color, thickness: f32, erase: bool },
    /// Repaint the overlay from the store (decorations changed)
    Replay,
    /// Ask the host for label text; the label's top-left corner is `at`
    PromptText { at: PagePoint },
    /// Add a new annotation
    Commit(Annotation),
    /// Move an existing annotation
    Relocate { id: AnnotationId, to: PagePoint },
    /// Repaint from the store to drop an abandoned gesture's pixels, then
    /// apply the follow-up
    ReplayThen(Box<Effect>),
}

/// Everything the machine may consult while handling one event
pub struct InputContext<'a> {
    /// 1-based page the pointer is on
    pub page: u32,
    pub scale: PageScale,
    pub tools: &'a mut ToolState,
    pub store: &'a AnnotationStore,
    pub metrics: &'a dyn TextMetrics,
    /// Hit-test slack in overlay pixels
    pub hit_tolerance_px: f32,
}

impl InputContext<'_> {
    fn hit(&self, point: PagePoint) -> Option<&Annotation> {
        let tolerance = self.scale.length_to_page(self.hit_tolerance_px);
        self.store.hit_test(self.page, point, self.metrics, tolerance)
    }
}

#[derive(Debug, Default)]
pub struct Interaction {
    state: InteractionState,
    hovered: Option<AnnotationId>,
}

impl Interaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == InteractionState::Idle
    }

    /// Decorations for the current state
    pub fn affordance(&self) -> Affordance {
        let dragging = match &self.state {
            InteractionState::Dragging(drag) => Some((drag.annotation_id, drag.current_position)),
            _ => None,
        };
        Affordance { hovered: self.hovered, dragging }
    }

    /// Align the state with the selected tool: the stamp tool waits for an
    /// image before clicks can place anything.
    pub fn sync_tool(&mut self, tools: &ToolState) {
        let needs_image = tools.tool() == Tool::Stamp && tools.pending_stamp().is_none();
        match (&self.state, needs_image) {
            (InteractionState::Idle, true) => {
                self.state = InteractionState::AwaitingPlacement(PlacementKind::Stamp);
            }
            (InteractionState::AwaitingPlacement(PlacementKind::Stamp), false) => {
                self.state = InteractionState::Idle;
            }
            _ => {}
        }
    }

    pub fn pointer_down(&mut self, ctx: &mut InputContext<'_>, point: PagePoint) -> Effect {
        match self.state {
            // Text entry is modal; clicks wait until it resolves.
            InteractionState::AwaitingPlacement(PlacementKind::Label) => return Effect::None,
            InteractionState::AwaitingPlacement(PlacementKind::Stamp) => {
                return self.place_stamp(ctx, point);
            }
            InteractionState::Drawing(_) | InteractionState::Dragging(_) => {
                tracing::debug!("stale gesture abandoned on pointer down");
                self.state = InteractionState::Idle;
                let next = self.start_gesture(ctx, point);
                return Effect::ReplayThen(Box::new(next));
            }
            InteractionState::Idle => {}
        }
        self.start_gesture(ctx, point)
    }

    fn start_gesture(&mut self, ctx: &mut InputContext<'_>, point: PagePoint) -> Effect {
        // Only the freehand tools pick up existing marks.
        if matches!(ctx.tools.tool(), Tool::Pencil | Tool::Eraser) {
            if let Some(effect) = self.begin_drag(ctx, point) {
                return effect;
            }
        }

        match ctx.tools.tool() {
            Tool::Pencil | Tool::Eraser => {
                let erasing = ctx.tools.tool() == Tool::Eraser;
                let color = ctx.tools.color();
                let thickness = ctx.scale.length_to_page(ctx.tools.thickness_px());
                self.hovered = None;
                self.state = InteractionState::Drawing(StrokeInProgress {
                    points: vec![point],
                    color,
                    thickness,
                    erasing,
                });
                Effect::PaintSegment { from: point, to: point, color, thickness, erase: erasing }
            }
            Tool::Text => {
                ctx.tools.set_pending_text_at(Some(point));
                self.state = InteractionState::AwaitingPlacement(PlacementKind::Label);
                Effect::PromptText { at: point }
            }
            Tool::Stamp => self.place_stamp(ctx, point),
        }
    }

    pub fn pointer_move(&mut self, ctx: &mut InputContext<'_>, point: PagePoint) -> Effect {
        match &mut self.state {
            InteractionState::Drawing(stroke) => {
                let Some(&last) = stroke.points.last() else {
                    return Effect::None;
                };
                if last == point {
                    return Effect::None;
                }
                stroke.points.push(point);
                Effect::PaintSegment {
                    from: last,
                    to: point,
                    color: stroke.color,
                    thickness: stroke.thickness,
                    erase: stroke.erasing,
                }
            }
            InteractionState::Dragging(drag) => {
                drag.current_position = point.offset_from(&drag.grab_offset);
                Effect::Replay
            }
            InteractionState::AwaitingPlacement(_) => Effect::None,
            InteractionState::Idle => {
                let hovered = ctx.hit(point).map(Annotation::id);
                if hovered == self.hovered {
                    return Effect::None;
                }
                self.hovered = hovered;
                Effect::Replay
            }
        }
    }

    pub fn pointer_up(&mut self, ctx: &mut InputContext<'_>, point: PagePoint) -> Effect {
        match std::mem::take(&mut self.state) {
            InteractionState::Drawing(mut stroke) => {
                if stroke.points.last() != Some(&point) {
                    stroke.points.push(point);
                }
                if stroke.erasing {
                    // Erasing only touches overlay pixels.
                    return Effect::None;
                }
                Effect::Commit(Annotation::stroke(ctx.page, stroke.points, stroke.color, stroke.thickness))
            }
            InteractionState::Dragging(drag) => {
                let to = point.offset_from(&drag.grab_offset);
                if to == drag.original_position {
                    return Effect::Replay;
                }
                tracing::debug!(id = %drag.annotation_id, x = to.x, y = to.y, "drag finished");
                Effect::Relocate { id: drag.annotation_id, to }
            }
            other => {
                self.state = other;
                Effect::None
            }
        }
    }

    /// Resolve a pending label prompt with the entered text.
    ///
    /// Blank text places nothing.
    pub fn confirm_text(&mut self, ctx: &mut InputContext<'_>, text: &str) -> Effect {
        if self.state != InteractionState::AwaitingPlacement(PlacementKind::Label) {
            return Effect::None;
        }
        self.state = InteractionState::Idle;
        let Some(at) = ctx.tools.pending_text_at() else {
            return Effect::None;
        };
        ctx.tools.set_pending_text_at(None);
        if text.trim().is_empty() {
            return Effect::None;
        }

        let font_size = ctx.scale.length_to_page(ctx.tools.font_size_px());
        let baseline = PagePoint::new(at.x, at.y + font_size);
        Effect::Commit(Annotation::label(ctx.page, text, baseline, font_size, ctx.tools.color()))
    }

    /// Abandon whatever is in progress and return to idle.
    ///
    /// Returns `Replay` when live pixels need to be discarded.
    pub fn cancel(&mut self, tools: &mut ToolState) -> Effect {
        tools.set_pending_text_at(None);
        self.hovered = None;
        match std::mem::take(&mut self.state) {
            InteractionState::Drawing(_) | InteractionState::Dragging(_) => Effect::Replay,
            InteractionState::AwaitingPlacement(_) | InteractionState::Idle => Effect::None,
        }
    }

    fn begin_drag(&mut self, ctx: &InputContext<'_>, point: PagePoint) -> Option<Effect> {
        let target = ctx.hit(point)?;
        let original_position = target.position()?;
        let drag = DragState {
            annotation_id: target.id(),
            original_position,
            grab_offset: point.offset_from(&original_position),
            current_position: original_position,
        };
        tracing::debug!(id = %drag.annotation_id, kind = %target.kind(), "drag started");
        self.hovered = Some(drag.annotation_id);
        self.state = InteractionState::Dragging(drag);
        Some(Effect::Replay)
    }

    /// Commit the loaded stamp with its top-left corner at `point`, or keep
    /// waiting when no image is loaded yet.
    fn place_stamp(&mut self, ctx: &InputContext<'_>, point: PagePoint) -> Effect {
        let Some(stamp) = ctx.tools.pending_stamp() else {
            tracing::debug!("stamp tool used without an image");
            self.state = InteractionState::AwaitingPlacement(PlacementKind::Stamp);
            return Effect::None;
        };
        self.state = InteractionState::Idle;
        let (width, height) = stamp.footprint(ctx.scale.length_to_page(ctx.tools.stamp_width_px()));
        Effect::Commit(Annotation::stamp(ctx.page, stamp.image().clone(), point, width, height))
    }
}
