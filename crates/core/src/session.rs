//! Working set for one open document
//!
//! A `Session` owns the source bytes, the page geometry, one overlay surface
//! per rendered page, the annotation store and the interaction machine. The
//! host drives it with page-render and pointer events (overlay pixels) and
//! reacts to the returned `SessionEvent`s.

use crate::annotation::{AnnotationId, Color, DocumentId};
use crate::bake::{bake_pdf, AnnotationPayload, BakeError, BakeOutcome};
use crate::config::EngineConfig;
use crate::draft::{DraftError, DraftStore, DraftWriter};
use crate::geometry::{GeometryError, OverlayPoint, OverlaySize, PageScale};
use crate::interaction::{Effect, InputContext, Interaction, InteractionState};
use crate::render::{DecodeError, Painter, ReplayReport};
use crate::store::{AddOutcome, AnnotationStore, StoreError};
use crate::surface::{OverlaySurface, SurfaceMap};
use crate::text::{FontError, LabelFont};
use crate::tool::{Tool, ToolState};
use pdf_engine::{PageSize, PdfEngineError};
use redline_scheduler::CancellationToken;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("document could not be opened: {0}")]
    Document(#[from] PdfEngineError),
    #[error("label font unavailable: {0}")]
    Font(#[from] FontError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stamp image rejected: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("page {0} has not been rendered yet")]
    PageNotRendered(u32),
    #[error("zoom must be a positive number, got {0}")]
    InvalidZoom(f32),
}

/// What the host should do after an input event
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Nothing visible changed
    Unchanged,
    /// Overlay pixels of `page` changed
    Repainted { page: u32 },
    /// Show a text prompt; `at` is the label's top-left corner in overlay pixels
    PromptText { page: u32, at: OverlayPoint },
    /// A new annotation was stored
    Committed { id: AnnotationId, page: u32 },
    /// An annotation was moved
    Relocated { id: AnnotationId, page: u32 },
    /// The gesture produced nothing worth storing
    Discarded { page: u32 },
}

pub struct Session {
    document_id: DocumentId,
    source: Arc<[u8]>,
    page_sizes: Vec<PageSize>,
    current_page: u32,
    zoom: f32,
    surfaces: SurfaceMap,
    store: AnnotationStore,
    tools: ToolState,
    interaction: Interaction,
    painter: Painter,
    drafts: DraftWriter,
    draft_store: Arc<dyn DraftStore>,
    config: EngineConfig,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("document_id", &self.document_id)
            .field("page_count", &self.page_sizes.len())
            .field("current_page", &self.current_page)
            .field("zoom", &self.zoom)
            .field("annotations", &self.store.len())
            .field("state", self.interaction.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session over `source`, restoring the local draft if one exists.
    ///
    /// An unreadable draft is logged and ignored; it is replaced by the next
    /// save.
    pub fn open(
        document_id: DocumentId,
        source: impl Into<Arc<[u8]>>,
        draft_store: Arc<dyn DraftStore>,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        Self::open_with_font(document_id, source, draft_store, config, LabelFont::bundled()?)
    }

    pub fn open_with_font(
        document_id: DocumentId,
        source: impl Into<Arc<[u8]>>,
        draft_store: Arc<dyn DraftStore>,
        config: EngineConfig,
        font: LabelFont,
    ) -> Result<Self, SessionError> {
        let source = source.into();
        let page_sizes = pdf_engine::page_sizes(&source)?;

        let mut store = AnnotationStore::new(document_id.clone());
        match draft_store.load(&document_id) {
            Ok(Some(draft)) => {
                let count = draft.annotations.len();
                let dropped = store.restore(draft.annotations);
                tracing::info!(document = %document_id, restored = count - dropped, dropped, "draft restored");
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(document = %document_id, %error, "ignoring unreadable draft");
            }
        }

        let tools = ToolState::from_defaults(&config.tools);
        let mut interaction = Interaction::new();
        interaction.sync_tool(&tools);

        tracing::info!(
            document = %document_id,
            pages = page_sizes.len(),
            annotations = store.len(),
            "session opened"
        );

        Ok(Self {
            document_id,
            source,
            page_sizes,
            current_page: 1,
            zoom: 1.0,
            surfaces: SurfaceMap::new(),
            store,
            tools,
            interaction,
            painter: Painter::new(font),
            drafts: DraftWriter::new(&config.draft),
            draft_store,
            config,
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn source_bytes(&self) -> &[u8] {
        &self.source
    }

    pub fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    pub fn page_sizes(&self) -> &[PageSize] {
        &self.page_sizes
    }

    pub fn page_size(&self, page: u32) -> Result<PageSize, SessionError> {
        page.checked_sub(1)
            .and_then(|index| self.page_sizes.get(index as usize))
            .copied()
            .ok_or(SessionError::PageOutOfRange { page, page_count: self.page_count() })
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Pixel size the host should render `page` at for the current zoom
    pub fn render_size(&self, page: u32) -> Result<OverlaySize, SessionError> {
        Ok(OverlaySize::for_page(self.page_size(page)?, self.zoom))
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn tools(&self) -> &ToolState {
        &self.tools
    }

    pub fn interaction_state(&self) -> &InteractionState {
        self.interaction.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn surface(&self, page: u32) -> Option<&OverlaySurface> {
        self.surfaces.get(page)
    }

    /// Whether committed changes are waiting for a draft write
    pub fn has_unsaved_draft(&self) -> bool {
        self.drafts.is_dirty()
    }

    /// The host finished rendering `page` at `size` pixels: size the overlay
    /// to match and replay that page's annotations.
    pub fn on_page_rendered(&mut self, page: u32, size: OverlaySize) -> Result<ReplayReport, SessionError> {
        let page_size = self.page_size(page)?;
        if page != self.current_page {
            self.set_page(page)?;
        }
        let resized = self.surfaces.get(page).is_some_and(|s| s.size() != size);
        if resized {
            // A resize mid-gesture would mix scales within one mark.
            self.abandon_gesture();
        }
        let surface = self.surfaces.prepare(page, size, page_size)?;
        let report =
            self.painter.replay(surface, self.store.on_page(page), &self.interaction.affordance());
        tracing::debug!(page, width = size.width, height = size.height, painted = report.painted, "page replayed");
        Ok(report)
    }

    /// Navigate to `page`. The previous page's overlay is discarded and any
    /// gesture in progress is abandoned.
    pub fn set_page(&mut self, page: u32) -> Result<(), SessionError> {
        self.page_size(page)?;
        if page == self.current_page {
            return Ok(());
        }
        self.abandon_gesture();
        self.surfaces.remove(self.current_page);
        tracing::debug!(from = self.current_page, to = page, "page changed");
        self.current_page = page;
        Ok(())
    }

    /// Change zoom. The host re-renders and calls `on_page_rendered`.
    pub fn set_zoom(&mut self, zoom: f32) -> Result<(), SessionError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(SessionError::InvalidZoom(zoom));
        }
        if zoom != self.zoom {
            self.abandon_gesture();
            self.zoom = zoom;
        }
        Ok(())
    }

    pub fn set_tool(&mut self, tool: Tool) -> Result<SessionEvent, SessionError> {
        let effect = self.interaction.cancel(&mut self.tools);
        self.tools.set_tool(tool);
        self.interaction.sync_tool(&self.tools);
        self.apply(effect, Instant::now())
    }

    pub fn set_color(&mut self, color: Color) {
        self.tools.set_color(color);
    }

    pub fn set_thickness(&mut self, px: f32) {
        self.tools.set_thickness(px);
    }

    pub fn set_font_size(&mut self, px: f32) {
        self.tools.set_font_size(px);
    }

    /// Decode and select a stamp image. A stamp tool waiting for an image
    /// becomes ready to place.
    pub fn load_stamp_image(&mut self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.tools.load_stamp(bytes)?;
        self.interaction.sync_tool(&self.tools);
        Ok(())
    }

    pub fn pointer_down(&mut self, point: OverlayPoint, now: Instant) -> Result<SessionEvent, SessionError> {
        let scale = self.current_scale()?;
        let mut ctx = InputContext {
            page: self.current_page,
            scale,
            tools: &mut self.tools,
            store: &self.store,
            metrics: self.painter.font(),
            hit_tolerance_px: self.config.hit_tolerance_px,
        };
        let effect = self.interaction.pointer_down(&mut ctx, scale.to_page(point));
        self.apply(effect, now)
    }

    pub fn pointer_move(&mut self, point: OverlayPoint) -> Result<SessionEvent, SessionError> {
        let scale = self.current_scale()?;
        let mut ctx = InputContext {
            page: self.current_page,
            scale,
            tools: &mut self.tools,
            store: &self.store,
            metrics: self.painter.font(),
            hit_tolerance_px: self.config.hit_tolerance_px,
        };
        let effect = self.interaction.pointer_move(&mut ctx, scale.to_page(point));
        self.apply(effect, Instant::now())
    }

    pub fn pointer_up(&mut self, point: OverlayPoint, now: Instant) -> Result<SessionEvent, SessionError> {
        let scale = self.current_scale()?;
        let mut ctx = InputContext {
            page: self.current_page,
            scale,
            tools: &mut self.tools,
            store: &self.store,
            metrics: self.painter.font(),
            hit_tolerance_px: self.config.hit_tolerance_px,
        };
        let effect = self.interaction.pointer_up(&mut ctx, scale.to_page(point));
        self.apply(effect, now)
    }

    /// Resolve a pending text prompt
    pub fn confirm_text(&mut self, text: &str, now: Instant) -> Result<SessionEvent, SessionError> {
        let scale = self.current_scale()?;
        let mut ctx = InputContext {
            page: self.current_page,
            scale,
            tools: &mut self.tools,
            store: &self.store,
            metrics: self.painter.font(),
            hit_tolerance_px: self.config.hit_tolerance_px,
        };
        let effect = self.interaction.confirm_text(&mut ctx, text);
        self.apply(effect, now)
    }

    pub fn cancel_text(&mut self) -> Result<SessionEvent, SessionError> {
        let effect = self.interaction.cancel(&mut self.tools);
        self.interaction.sync_tool(&self.tools);
        self.apply(effect, Instant::now())
    }

    /// Remove every annotation and erase the local draft
    pub fn clear_all(&mut self) -> Result<BTreeSet<u32>, SessionError> {
        self.abandon_gesture();
        let pages = self.store.clear_all();
        self.drafts.discard();
        self.painter.forget_stamps();
        self.draft_store.clear(&self.document_id)?;
        self.replay_current();
        tracing::info!(document = %self.document_id, pages = ?pages, "annotations cleared");
        Ok(pages)
    }

    /// Structured export of every annotation for backend baking
    pub fn export_payload(&self) -> AnnotationPayload {
        AnnotationPayload::new(Some(self.document_id.clone()), self.store.all().to_vec())
    }

    /// Bake every annotation into a copy of the source document
    pub fn bake(&mut self, token: &CancellationToken) -> Result<BakeOutcome, BakeError> {
        bake_pdf(&self.source, self.store.all(), &mut self.painter, &self.config.bake, token)
    }

    /// Host clock tick: writes the draft once the debounce has elapsed.
    /// Returns whether a write happened.
    pub fn tick(&mut self, now: Instant) -> Result<bool, DraftError> {
        self.drafts.poll(now, self.draft_store.as_ref(), &self.document_id, self.store.all())
    }

    pub fn flush_draft(&mut self) -> Result<bool, DraftError> {
        self.drafts.flush(self.draft_store.as_ref(), &self.document_id, self.store.all())
    }

    /// A review was acknowledged: drop the marks and their draft
    pub(crate) fn clear_after_submit(&mut self) -> Result<(), DraftError> {
        self.abandon_gesture();
        self.store.clear_all();
        self.drafts.discard();
        self.painter.forget_stamps();
        self.replay_current();
        self.draft_store.clear(&self.document_id)
    }

    /// Tear down: abandon any gesture, flush the pending draft, drop overlays
    pub fn close(mut self) -> Result<(), DraftError> {
        self.abandon_gesture();
        self.surfaces.clear();
        let flushed = self.flush_draft();
        tracing::info!(document = %self.document_id, annotations = self.store.len(), "session closed");
        flushed.map(|_| ())
    }

    fn current_scale(&self) -> Result<PageScale, SessionError> {
        self.surfaces
            .get(self.current_page)
            .map(OverlaySurface::scale)
            .ok_or(SessionError::PageNotRendered(self.current_page))
    }

    fn abandon_gesture(&mut self) {
        let effect = self.interaction.cancel(&mut self.tools);
        self.interaction.sync_tool(&self.tools);
        if effect == Effect::Replay {
            tracing::debug!(page = self.current_page, "gesture abandoned");
            self.replay_current();
        }
    }

    fn replay_current(&mut self) -> Option<ReplayReport> {
        let page = self.current_page;
        let surface = self.surfaces.get_mut(page)?;
        Some(self.painter.replay(surface, self.store.on_page(page), &self.interaction.affordance()))
    }

    fn apply(&mut self, effect: Effect, now: Instant) -> Result<SessionEvent, SessionError> {
        let page = self.current_page;
        match effect {
            Effect::None => Ok(SessionEvent::Unchanged),
            Effect::PaintSegment { from, to, color, thickness, erase } => {
                let surface =
                    self.surfaces.get_mut(page).ok_or(SessionError::PageNotRendered(page))?;
                surface.paint_segment(from, to, color, thickness, erase);
                Ok(SessionEvent::Repainted { page })
            }
            Effect::Replay => {
                self.replay_current();
                Ok(SessionEvent::Repainted { page })
            }
            Effect::PromptText { at } => {
                let at = self.current_scale()?.to_overlay(at);
                Ok(SessionEvent::PromptText { page, at })
            }
            Effect::Commit(annotation) => {
                let id = annotation.id();
                let added = self.store.add(annotation);
                // Replace live stroke pixels with the committed rendition.
                self.replay_current();
                match added? {
                    AddOutcome::Added { page } => {
                        self.drafts.mark_dirty(now);
                        tracing::debug!(%id, page, "annotation committed");
                        Ok(SessionEvent::Committed { id, page })
                    }
                    AddOutcome::Discarded => Ok(SessionEvent::Discarded { page }),
                }
            }
            Effect::Relocate { id, to } => {
                let moved = self.store.update_position(id, to);
                self.replay_current();
                let page = moved?;
                self.drafts.mark_dirty(now);
                Ok(SessionEvent::Relocated { id, page })
            }
            Effect::ReplayThen(next) => {
                self.replay_current();
                match self.apply(*next, now)? {
                    SessionEvent::Unchanged => Ok(SessionEvent::Repainted { page }),
                    event => Ok(event),
                }
            }
        }
    }
}
