//! Annotation store for one open document
//!
//! Single source of truth for committed marks. Order of insertion is paint
//! order; later annotations are drawn on top and win hit tests.

use crate::annotation::{Annotation, AnnotationId, AnnotationKind, DocumentId, Mark};
use crate::geometry::PagePoint;
use crate::text::TextMetrics;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("annotation {0} not found")]
    NotFound(AnnotationId),
    #[error("{kind} annotation {id} cannot be moved")]
    NotRelocatable { id: AnnotationId, kind: AnnotationKind },
    #[error("annotation {0} already exists")]
    Duplicate(AnnotationId),
    #[error("malformed {kind} annotation: {reason}")]
    Malformed { kind: AnnotationKind, reason: &'static str },
    #[error("position is not finite")]
    InvalidPosition,
}

/// Outcome of adding an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored; carries the page that must be re-rendered
    Added { page: u32 },
    /// Stroke shorter than two points, silently dropped
    Discarded,
}

#[derive(Debug, Clone)]
pub struct AnnotationStore {
    document_id: DocumentId,
    annotations: Vec<Annotation>,
    revision: u64,
}

impl AnnotationStore {
    pub fn new(document_id: DocumentId) -> Self {
        Self { document_id, annotations: Vec::new(), revision: 0 }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Monotonic counter bumped by every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// All annotations in paint order
    pub fn all(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id() == id)
    }

    /// Annotations on a 1-based page, in paint order
    pub fn on_page(&self, page: u32) -> impl Iterator<Item = &Annotation> + '_ {
        self.annotations.iter().filter(move |a| a.page() == page)
    }

    /// Pages carrying at least one annotation, ascending
    pub fn pages(&self) -> BTreeSet<u32> {
        self.annotations.iter().map(Annotation::page).collect()
    }

    pub fn add(&mut self, annotation: Annotation) -> Result<AddOutcome, StoreError> {
        if let Mark::Stroke { points, .. } = annotation.mark() {
            if points.len() < 2 {
                tracing::trace!(id = %annotation.id(), "discarding single-point stroke");
                return Ok(AddOutcome::Discarded);
            }
        }
        annotation
            .validate()
            .map_err(|reason| StoreError::Malformed { kind: annotation.kind(), reason })?;
        if self.get(annotation.id()).is_some() {
            return Err(StoreError::Duplicate(annotation.id()));
        }

        let page = annotation.page();
        tracing::debug!(id = %annotation.id(), kind = %annotation.kind(), page, "annotation added");
        self.annotations.push(annotation);
        self.revision += 1;
        Ok(AddOutcome::Added { page })
    }

    /// Move a label or stamp. Returns the page to re-render.
    pub fn update_position(&mut self, id: AnnotationId, to: PagePoint) -> Result<u32, StoreError> {
        if !to.is_finite() {
            return Err(StoreError::InvalidPosition);
        }
        let annotation = self
            .annotations
            .iter_mut()
            .find(|a| a.id() == id)
            .ok_or(StoreError::NotFound(id))?;
        if !annotation.is_relocatable() {
            return Err(StoreError::NotRelocatable { id, kind: annotation.kind() });
        }

        annotation.set_position(to);
        self.revision += 1;
        Ok(annotation.page())
    }

    /// Remove everything. Returns the pages that had marks.
    pub fn clear_all(&mut self) -> BTreeSet<u32> {
        let pages = self.pages();
        self.annotations.clear();
        self.revision += 1;
        pages
    }

    /// Replace the contents with restored annotations, skipping malformed
    /// or duplicate entries. Returns how many were dropped.
    pub fn restore(&mut self, annotations: Vec<Annotation>) -> usize {
        self.annotations.clear();
        let mut dropped = 0;
        for annotation in annotations {
            match self.add(annotation) {
                Ok(AddOutcome::Added { .. }) => {}
                Ok(AddOutcome::Discarded) => dropped += 1,
                Err(error) => {
                    tracing::warn!(%error, "dropping restored annotation");
                    dropped += 1;
                }
            }
        }
        self.revision += 1;
        dropped
    }

    /// Topmost relocatable annotation under `point` on `page`.
    ///
    /// `tolerance` widens each hit box, in points.
    pub fn hit_test(
        &self,
        page: u32,
        point: PagePoint,
        metrics: &dyn TextMetrics,
        tolerance: f32,
    ) -> Option<&Annotation> {
        self.annotations
            .iter()
            .rev()
            .filter(|a| a.page() == page && a.is_relocatable())
            .find(|a| a.bounds(metrics).is_some_and(|b| b.inflate(tolerance).contains(&point)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Color, StampImage};

    struct Monospace;

    impl TextMetrics for Monospace {
        fn text_width(&self, text: &str, font_size: f32) -> f32 {
            text.chars().count() as f32 * font_size * 0.6
        }
    }

    fn store() -> AnnotationStore {
        AnnotationStore::new(DocumentId::new("doc-1"))
    }

    fn stroke(page: u32) -> Annotation {
        Annotation::stroke(
            page,
            vec![PagePoint::new(10.0, 10.0), PagePoint::new(40.0, 40.0)],
            Color::RED,
            2.0,
        )
    }

    fn stamp(page: u32, x: f32, y: f32) -> Annotation {
        Annotation::stamp(page, StampImage::new(vec![1, 2, 3]), PagePoint::new(x, y), 100.0, 50.0)
    }

    #[test]
    fn test_add_returns_page() {
        let mut store = store();
        assert_eq!(store.add(stroke(3)), Ok(AddOutcome::Added { page: 3 }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_single_point_stroke_is_discarded() {
        let mut store = store();
        let dot = Annotation::stroke(1, vec![PagePoint::new(1.0, 1.0)], Color::RED, 2.0);

        assert_eq!(store.add(dot), Ok(AddOutcome::Discarded));
        assert!(store.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_blank_label_is_rejected() {
        let mut store = store();
        let label = Annotation::label(1, "", PagePoint::new(0.0, 0.0), 12.0, Color::RED);

        assert!(matches!(store.add(label), Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut store = store();
        let annotation = stroke(1);
        store.add(annotation.clone()).expect("first insert");

        assert_eq!(store.add(annotation.clone()), Err(StoreError::Duplicate(annotation.id())));
    }

    #[test]
    fn test_update_position_moves_stamp() {
        let mut store = store();
        let annotation = stamp(2, 0.0, 0.0);
        let id = annotation.id();
        store.add(annotation).expect("insert");

        assert_eq!(store.update_position(id, PagePoint::new(5.0, 6.0)), Ok(2));
        assert_eq!(store.get(id).and_then(Annotation::position), Some(PagePoint::new(5.0, 6.0)));
    }

    #[test]
    fn test_update_position_rejects_strokes_and_unknown_ids() {
        let mut store = store();
        let annotation = stroke(1);
        let id = annotation.id();
        store.add(annotation).expect("insert");

        assert_eq!(
            store.update_position(id, PagePoint::new(0.0, 0.0)),
            Err(StoreError::NotRelocatable { id, kind: AnnotationKind::Stroke })
        );

        let unknown = AnnotationId::new_v4();
        assert_eq!(
            store.update_position(unknown, PagePoint::new(0.0, 0.0)),
            Err(StoreError::NotFound(unknown))
        );
    }

    #[test]
    fn test_hit_test_prefers_topmost() {
        let mut store = store();
        let lower = stamp(1, 0.0, 0.0);
        let upper = stamp(1, 50.0, 25.0);
        let upper_id = upper.id();
        store.add(lower).expect("insert");
        store.add(upper).expect("insert");

        let hit = store.hit_test(1, PagePoint::new(60.0, 30.0), &Monospace, 0.0);
        assert_eq!(hit.map(Annotation::id), Some(upper_id));
    }

    #[test]
    fn test_hit_test_ignores_strokes_and_other_pages() {
        let mut store = store();
        store.add(stroke(1)).expect("insert");
        store.add(stamp(2, 0.0, 0.0)).expect("insert");

        assert!(store.hit_test(1, PagePoint::new(20.0, 20.0), &Monospace, 0.0).is_none());
        assert!(store.hit_test(1, PagePoint::new(5.0, 5.0), &Monospace, 0.0).is_none());
    }

    #[test]
    fn test_hit_test_uses_label_box() {
        let mut store = store();
        let label = Annotation::label(1, "Note", PagePoint::new(100.0, 100.0), 10.0, Color::RED);
        let id = label.id();
        store.add(label).expect("insert");

        // width = 4 * 10 * 0.6 = 24, box spans y 90..100
        assert_eq!(
            store.hit_test(1, PagePoint::new(120.0, 95.0), &Monospace, 0.0).map(Annotation::id),
            Some(id)
        );
        assert!(store.hit_test(1, PagePoint::new(120.0, 105.0), &Monospace, 0.0).is_none());
    }

    #[test]
    fn test_clear_all_reports_pages() {
        let mut store = store();
        store.add(stroke(1)).expect("insert");
        store.add(stroke(4)).expect("insert");

        let pages = store.clear_all();
        assert_eq!(pages.into_iter().collect::<Vec<_>>(), vec![1, 4]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_skips_bad_entries() {
        let mut store = store();
        let good = stroke(1);
        let bad = Annotation::stroke(1, vec![PagePoint::new(0.0, 0.0)], Color::RED, 1.0);

        assert_eq!(store.restore(vec![good.clone(), bad, good]), 2);
        assert_eq!(store.len(), 1);
    }
}
