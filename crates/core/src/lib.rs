//! Redline Core Library
//!
//! Annotation engine for PDF review: the annotation model and store, the
//! pointer interaction machine, overlay replay, the bake pipeline, local
//! drafts and the review transport contract.

pub mod annotation;
pub mod bake;
pub mod config;
pub mod draft;
pub mod geometry;
pub mod http;
pub mod interaction;
pub mod render;
pub mod session;
pub mod store;
pub mod surface;
pub mod text;
pub mod tool;
pub mod transport;
pub mod viewer;

pub use annotation::{
    Annotation, AnnotationId, AnnotationKind, Color, DocumentId, Mark, ParseColorError, StampImage,
};
pub use bake::{bake_pdf, AnnotationPayload, BakeError, BakeOutcome, SkippedMark};
pub use config::{ConfigError, EngineConfig};
pub use draft::{Draft, DraftError, DraftStore, DraftWriter, MemoryDraftStore, DRAFT_SCHEMA_VERSION};
pub use geometry::{Bounds, GeometryError, OverlayPoint, OverlaySize, PagePoint, PageScale};
pub use http::HttpTransport;
pub use interaction::{Effect, Interaction, InteractionState, PlacementKind};
pub use render::{Affordance, DecodeError, PaintError, Painter, ReplayReport};
pub use session::{Session, SessionError, SessionEvent};
pub use store::{AddOutcome, AnnotationStore, StoreError};
pub use surface::{OverlaySurface, SurfaceMap};
pub use text::{FontError, LabelFont, TextMetrics};
pub use tool::{Tool, ToolState};
pub use transport::{
    Ack, ExportMode, NotesRequired, ReviewAction, ReviewSubmission, ReviewTransport,
    SubmissionPayload, TransportAdapter, TransportError,
};
pub use viewer::{BusyFlag, CloseHandle, LoadError, SubmitError, Viewer, ViewerState};

pub use pdf_engine::PageSize;
