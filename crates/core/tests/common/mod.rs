//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pdf_engine::{blank_document, PageSize};
use redline_core::{
    Ack, Annotation, DocumentId, EngineConfig, OverlaySize, ReviewSubmission, ReviewTransport,
    TransportError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

/// Rendered size used by tests: half of letter, so one pixel is two points
pub const HALF_LETTER_PX: OverlaySize = OverlaySize { width: 306, height: 396 };

pub fn two_page_pdf() -> Vec<u8> {
    blank_document(&[LETTER, LETTER]).expect("blank document")
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry_attempts(3)
        .with_retry_delay(Duration::from_millis(100))
        .with_draft_debounce(Duration::from_millis(100), Duration::from_secs(1))
}

/// Solid PNG for stamp fixtures
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([20, 20, 200, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).expect("encode png");
    bytes.into_inner()
}

/// Bounding box `(min_x, min_y, max_x, max_y)` of pixels with any alpha
pub fn ink_bounds(image: &image::RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

/// In-memory backend with scripted failures
pub struct FakeTransport {
    source: Vec<u8>,
    load_failures: AtomicU32,
    load_error: TransportError,
    submit_error: Mutex<Option<TransportError>>,
    submissions: Mutex<Vec<ReviewSubmission>>,
    drafts: Mutex<Vec<Vec<Annotation>>>,
    source_calls: AtomicU32,
}

impl FakeTransport {
    pub fn new(source: Vec<u8>) -> Self {
        Self {
            source,
            load_failures: AtomicU32::new(0),
            load_error: TransportError::Connection("connection reset".into()),
            submit_error: Mutex::new(None),
            submissions: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
            source_calls: AtomicU32::new(0),
        }
    }

    /// The next `count` loads fail with a transient error
    pub fn failing_loads(self, count: u32) -> Self {
        self.load_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn fail_submissions(&self, error: TransportError) {
        *self.submit_error.lock().expect("lock") = Some(error);
    }

    pub fn heal_submissions(&self) {
        *self.submit_error.lock().expect("lock") = None;
    }

    pub fn submissions(&self) -> Vec<ReviewSubmission> {
        self.submissions.lock().expect("lock").clone()
    }

    pub fn remote_drafts(&self) -> Vec<Vec<Annotation>> {
        self.drafts.lock().expect("lock").clone()
    }

    pub fn source_calls(&self) -> u32 {
        self.source_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewTransport for FakeTransport {
    async fn source_bytes(&self, _: &DocumentId) -> Result<Vec<u8>, TransportError> {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.load_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.load_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(self.load_error.clone());
        }
        Ok(self.source.clone())
    }

    async fn submit_review(
        &self,
        _: &DocumentId,
        submission: &ReviewSubmission,
    ) -> Result<Ack, TransportError> {
        if let Some(error) = self.submit_error.lock().expect("lock").clone() {
            return Err(error);
        }
        self.submissions.lock().expect("lock").push(submission.clone());
        Ok(Ack { message: Some("received".into()) })
    }

    async fn save_draft(&self, _: &DocumentId, annotations: &[Annotation]) -> Result<Ack, TransportError> {
        self.drafts.lock().expect("lock").push(annotations.to_vec());
        Ok(Ack::default())
    }
}
