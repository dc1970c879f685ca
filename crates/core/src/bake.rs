//! Export paths for committed annotations
//!
//! Two ways out: the structured annotation payload for backend baking, or a
//! client-side bake that rasterizes each annotated page and embeds the
//! raster over the original page content. Neither touches the source bytes.

use crate::annotation::{Annotation, AnnotationId, DocumentId};
use crate::config::BakeSettings;
use crate::geometry::{GeometryError, OverlaySize};
use crate::render::Painter;
use crate::surface::OverlaySurface;
use pdf_engine::{embed_page_overlays, page_sizes, PageOverlay, PdfEngineError};
use redline_scheduler::CancellationToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version of the structured payload
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("source document could not be read: {0}")]
    Source(#[source] PdfEngineError),
    #[error("bake raster could not be allocated: {0}")]
    Raster(#[from] GeometryError),
    #[error("overlay embedding failed: {0}")]
    Embed(#[source] PdfEngineError),
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("bake cancelled")]
    Cancelled,
}

/// Structured export of every annotation, all pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPayload {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    pub annotations: Vec<Annotation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadShape {
    Envelope(AnnotationPayload),
    Bare(Vec<Annotation>),
}

impl AnnotationPayload {
    pub fn new(document_id: Option<DocumentId>, annotations: Vec<Annotation>) -> Self {
        Self { version: PAYLOAD_VERSION, document_id, annotations }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, BakeError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Accepts either the envelope or a bare annotation array
    pub fn from_json(bytes: &[u8]) -> Result<Self, BakeError> {
        Ok(match serde_json::from_slice(bytes)? {
            PayloadShape::Envelope(payload) => payload,
            PayloadShape::Bare(annotations) => Self::new(None, annotations),
        })
    }
}

/// An annotation the bake could not draw
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedMark {
    pub id: AnnotationId,
    pub page: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BakeOutcome {
    pub bytes: Vec<u8>,
    /// Pages that received an overlay, ascending
    pub baked_pages: Vec<u32>,
    pub skipped: Vec<SkippedMark>,
}

impl BakeOutcome {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Rasterize `annotations` page by page and embed them into a copy of
/// `source`.
///
/// Each page gets a raster of its native point size times
/// `settings.raster_scale`. Marks that cannot be drawn, marks on pages the
/// document does not have, and marks on pages that cannot be updated are
/// skipped and reported. With nothing to draw the source bytes come back
/// unchanged.
pub fn bake_pdf(
    source: &[u8],
    annotations: &[Annotation],
    painter: &mut Painter,
    settings: &BakeSettings,
    token: &CancellationToken,
) -> Result<BakeOutcome, BakeError> {
    let sizes = page_sizes(source).map_err(BakeError::Source)?;

    let mut by_page: BTreeMap<u32, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations {
        by_page.entry(annotation.page()).or_default().push(annotation);
    }

    let mut skipped = Vec::new();
    let mut overlays = Vec::new();
    let mut painted_by_page: BTreeMap<u32, Vec<AnnotationId>> = BTreeMap::new();

    for (page, marks) in by_page {
        if token.is_cancelled() {
            tracing::debug!(page, "bake cancelled");
            return Err(BakeError::Cancelled);
        }

        let Some(&size) = page.checked_sub(1).and_then(|index| sizes.get(index as usize)) else {
            tracing::warn!(page, page_count = sizes.len(), count = marks.len(), "marks on missing page");
            skipped.extend(marks.iter().map(|mark| SkippedMark {
                id: mark.id(),
                page,
                reason: format!("page {page} does not exist"),
            }));
            continue;
        };

        let mut surface = OverlaySurface::new(OverlaySize::for_page(size, settings.raster_scale), size)?;
        let scale = surface.scale();
        let mut painted = Vec::new();

        for mark in marks {
            if let Err(reason) = mark.validate() {
                skipped.push(SkippedMark { id: mark.id(), page, reason: reason.to_string() });
                continue;
            }
            match painter.paint(surface.pixmap_mut(), &scale, mark, false) {
                Ok(()) => painted.push(mark.id()),
                Err(error) => {
                    tracing::warn!(page, %error, "mark skipped during bake");
                    skipped.push(SkippedMark { id: mark.id(), page, reason: error.to_string() });
                }
            }
        }

        if painted.is_empty() {
            continue;
        }
        tracing::debug!(page, painted = painted.len(), "page rasterized");
        overlays.push(PageOverlay { page_number: page, image: surface.to_rgba_image() });
        painted_by_page.insert(page, painted);
    }

    if overlays.is_empty() {
        return Ok(BakeOutcome { bytes: source.to_vec(), baked_pages: Vec::new(), skipped });
    }

    let report = embed_page_overlays(source, &overlays).map_err(BakeError::Embed)?;
    for failure in &report.failed_pages {
        tracing::warn!(page = failure.page_number, reason = %failure.reason, "page overlay not embedded");
        let ids = painted_by_page.remove(&failure.page_number).unwrap_or_default();
        skipped.extend(ids.into_iter().map(|id| SkippedMark {
            id,
            page: failure.page_number,
            reason: format!("page could not be updated: {}", failure.reason),
        }));
    }

    tracing::info!(pages = ?report.embedded_pages, skipped = skipped.len(), "bake finished");
    Ok(BakeOutcome { bytes: report.bytes, baked_pages: report.embedded_pages, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Color, StampImage};
    use crate::geometry::PagePoint;
    use crate::render::tests::png_bytes;
    use crate::text::LabelFont;
    use pdf_engine::{blank_document, read_page_overlays, PageSize};

    fn painter() -> Painter {
        Painter::new(LabelFont::bundled().expect("bundled font"))
    }

    fn two_pages() -> Vec<u8> {
        blank_document(&[PageSize::new(200.0, 300.0), PageSize::new(200.0, 300.0)])
            .expect("blank document")
    }

    fn stroke(page: u32) -> Annotation {
        Annotation::stroke(
            page,
            vec![PagePoint::new(10.0, 10.0), PagePoint::new(150.0, 250.0)],
            Color::RED,
            4.0,
        )
    }

    #[test]
    fn test_bake_embeds_only_annotated_pages() {
        let source = two_pages();
        let outcome = bake_pdf(
            &source,
            &[stroke(2)],
            &mut painter(),
            &BakeSettings::default(),
            &CancellationToken::new(),
        )
        .expect("bake");

        assert_eq!(outcome.baked_pages, vec![2]);
        assert!(outcome.is_complete());
        let overlays = read_page_overlays(&outcome.bytes).expect("read back");
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].page_number, 2);
        assert_eq!(overlays[0].image.dimensions(), (200, 300));
    }

    #[test]
    fn test_raster_scale_multiplies_resolution() {
        let source = two_pages();
        let settings = BakeSettings { raster_scale: 2.0 };
        let outcome =
            bake_pdf(&source, &[stroke(1)], &mut painter(), &settings, &CancellationToken::new())
                .expect("bake");

        let overlays = read_page_overlays(&outcome.bytes).expect("read back");
        assert_eq!(overlays[0].image.dimensions(), (400, 600));
    }

    #[test]
    fn test_empty_list_returns_source_unchanged() {
        let source = two_pages();
        let outcome = bake_pdf(
            &source,
            &[],
            &mut painter(),
            &BakeSettings::default(),
            &CancellationToken::new(),
        )
        .expect("bake");

        assert_eq!(outcome.bytes, source);
        assert!(outcome.baked_pages.is_empty());
    }

    #[test]
    fn test_missing_page_and_broken_stamp_are_skipped() {
        let source = two_pages();
        let broken = Annotation::stamp(
            1,
            StampImage::new(b"not an image".to_vec()),
            PagePoint::new(0.0, 0.0),
            20.0,
            20.0,
        );
        let good = Annotation::stamp(
            1,
            StampImage::new(png_bytes(4, 4)),
            PagePoint::new(50.0, 50.0),
            20.0,
            20.0,
        );
        let outcome = bake_pdf(
            &source,
            &[stroke(9), broken.clone(), good],
            &mut painter(),
            &BakeSettings::default(),
            &CancellationToken::new(),
        )
        .expect("bake");

        assert_eq!(outcome.baked_pages, vec![1]);
        let skipped: Vec<_> = outcome.skipped.iter().map(|s| (s.page, s.id)).collect();
        assert!(skipped.contains(&(1, broken.id())));
        assert!(outcome.skipped.iter().any(|s| s.page == 9));
    }

    /// Page 1 carries its own MediaBox but no resources, and its `/Parent`
    /// is not a dictionary.
    fn pdf_with_unwritable_first_page() -> Vec<u8> {
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let bogus_parent = doc.add_object(Object::Integer(7));
        let broken = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => bogus_parent,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
        });
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let healthy = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {},
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(broken), Object::Reference(healthy)],
                "Count" => 2,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");
        bytes
    }

    #[test]
    fn test_page_that_cannot_be_updated_does_not_sink_the_bake() {
        let source = pdf_with_unwritable_first_page();
        let first = stroke(1);

        let outcome = bake_pdf(
            &source,
            &[first.clone(), stroke(2)],
            &mut painter(),
            &BakeSettings::default(),
            &CancellationToken::new(),
        )
        .expect("bake");

        assert_eq!(outcome.baked_pages, vec![2]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!((outcome.skipped[0].page, outcome.skipped[0].id), (1, first.id()));
        let overlays = read_page_overlays(&outcome.bytes).expect("read back");
        assert_eq!(overlays.iter().map(|o| o.page_number).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_cancelled_bake_returns_error() {
        let token = CancellationToken::new();
        token.cancel();

        let result =
            bake_pdf(&two_pages(), &[stroke(1)], &mut painter(), &BakeSettings::default(), &token);
        assert!(matches!(result, Err(BakeError::Cancelled)));
    }

    #[test]
    fn test_corrupt_source_is_an_error() {
        let result = bake_pdf(
            b"definitely not a pdf",
            &[stroke(1)],
            &mut painter(),
            &BakeSettings::default(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(BakeError::Source(_))));
    }

    #[test]
    fn test_payload_accepts_bare_array() {
        let list = vec![stroke(1)];
        let bare = serde_json::to_vec(&list).expect("encode");

        let payload = AnnotationPayload::from_json(&bare).expect("decode");
        assert_eq!(payload.annotations, list);
        assert_eq!(payload.document_id, None);

        let envelope = AnnotationPayload::new(Some(DocumentId::new("d")), list.clone())
            .to_json()
            .expect("encode");
        let payload = AnnotationPayload::from_json(&envelope).expect("decode");
        assert_eq!(payload.document_id, Some(DocumentId::new("d")));
    }
}
