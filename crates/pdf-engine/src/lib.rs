//! lopdf-backed document access for the review overlay.
//!
//! Opens source PDF bytes, reports per-page point sizes, produces blank page
//! rasters for previews, and embeds (or reads back) baked overlay images.

mod overlay;

use image::{ImageBuffer, Rgba};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use overlay::{embed_page_overlays, read_page_overlays, EmbedFailure, EmbedReport, PageOverlay};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when a page carries no readable MediaBox.
const FALLBACK_PAGE_BOX: PageBox = PageBox { x0: 0.0, y0: 0.0, width_pt: 612.0, height_pt: 792.0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }
}

/// Page box in PDF user space (origin may be non-zero).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f32,
    pub y0: f32,
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageBox {
    pub fn size(&self) -> PageSize {
        PageSize { width_pt: self.width_pt, height_pt: self.height_pt }
    }

    fn intersect(&self, other: &PageBox) -> Option<PageBox> {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = (self.x0 + self.width_pt).min(other.x0 + other.width_pt);
        let y1 = (self.y0 + self.height_pt).min(other.y0 + other.height_pt);
        (x1 > x0 && y1 > y0).then(|| PageBox { x0, y0, width_pt: x1 - x0, height_pt: y1 - y0 })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    /// 0-based page index.
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("malformed page object {0:?}")]
    MalformedPage(ObjectId),
    #[error("overlay image for page {page} is {width}x{height}, expected non-empty")]
    EmptyOverlay { page: u32, width: u32, height: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(&self, handle: DocumentHandle, page_index: u32)
        -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = page_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, DocumentRecord { page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    /// Produces a blank sheet at the requested scale. Page content rasterization
    /// belongs to the host viewer; this raster only backs overlay previews.
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

        let width = (page_size.width_pt * scale).round().max(1.0) as u32;
        let height = (page_size.height_pt * scale).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

/// Parse the source bytes and return one point size per page, in page order.
pub fn page_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
    let doc = load_document(bytes)?;
    let pages = doc.get_pages();
    let mut sizes = Vec::with_capacity(pages.len());

    for (_, page_id) in pages {
        sizes.push(page_box(&doc, page_id)?.size());
    }

    if sizes.is_empty() {
        return Err(PdfEngineError::Backend("document has no pages".to_owned()));
    }

    Ok(sizes)
}

pub(crate) fn load_document(bytes: &[u8]) -> Result<Document, PdfEngineError> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }
    Ok(Document::load_mem(bytes)?)
}

/// Resolve the visible box for a page: the CropBox clipped to the MediaBox,
/// or the MediaBox alone. Both inherit through `/Parent`.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> Result<PageBox, PdfEngineError> {
    let mut media = None;
    let mut crop = None;
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = match doc.get_dictionary(id) {
            Ok(dict) => dict,
            // A broken ancestor only matters when no MediaBox was found yet.
            Err(_) if media.is_some() => break,
            Err(_) => return Err(PdfEngineError::MalformedPage(id)),
        };
        media = media.or_else(|| read_box(doc, dict, b"MediaBox"));
        crop = crop.or_else(|| read_box(doc, dict, b"CropBox"));
        if media.is_some() && crop.is_some() {
            break;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    let media = media.unwrap_or(FALLBACK_PAGE_BOX);
    Ok(crop.and_then(|crop| crop.intersect(&media)).unwrap_or(media))
}

fn read_box(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<PageBox> {
    let raw = dict.get(key).ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let array = resolved.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }
    let x0 = object_to_f32(&array[0])?;
    let y0 = object_to_f32(&array[1])?;
    let x1 = object_to_f32(&array[2])?;
    let y1 = object_to_f32(&array[3])?;
    let width_pt = (x1 - x0).abs();
    let height_pt = (y1 - y0).abs();
    if width_pt <= 0.0 || height_pt <= 0.0 {
        return None;
    }
    Some(PageBox { x0: x0.min(x1), y0: y0.min(y1), width_pt, height_pt })
}

pub(crate) fn object_to_f32(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

/// Build an empty document with the given page sizes.
///
/// Handy for fixtures and for previews of documents whose bytes are not
/// available locally.
pub fn blank_document(page_sizes: &[PageSize]) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(page_sizes.len());
    for size in page_sizes {
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(size.width_pt),
                Object::Real(size.height_pt),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {},
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}
