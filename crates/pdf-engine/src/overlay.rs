//! Full-page overlay image embedding.
//!
//! Each overlay is written as a Flate-compressed RGB image XObject with an
//! 8-bit soft mask, scaled to the page box and painted after the existing
//! page content. The original content is wrapped in `q … Q` so any graphics
//! state it leaves behind cannot skew the overlay.

use crate::{load_document, page_box, PdfEngineError, RgbaImage};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::Rgba;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::{Read, Write};

/// Resource name prefix for embedded overlays.
const OVERLAY_PREFIX: &[u8] = b"RlOverlay";

/// An overlay raster destined for (or recovered from) one page.
#[derive(Debug, Clone)]
pub struct PageOverlay {
    /// 1-based page number.
    pub page_number: u32,
    pub image: RgbaImage,
}

/// A page whose overlay could not be embedded; the page is left as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedFailure {
    pub page_number: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct EmbedReport {
    pub bytes: Vec<u8>,
    /// Pages that received an overlay, ascending.
    pub embedded_pages: Vec<u32>,
    /// Requested pages the document does not have.
    pub missing_pages: Vec<u32>,
    pub failed_pages: Vec<EmbedFailure>,
}

/// Embed overlays into a copy of `source`. The input slice is never modified.
pub fn embed_page_overlays(
    source: &[u8],
    overlays: &[PageOverlay],
) -> Result<EmbedReport, PdfEngineError> {
    let mut doc = load_document(source)?;
    let pages = doc.get_pages();

    let mut embedded_pages = Vec::new();
    let mut missing_pages = Vec::new();
    let mut failed_pages = Vec::new();

    for overlay in overlays {
        let Some(&page_id) = pages.get(&overlay.page_number) else {
            missing_pages.push(overlay.page_number);
            continue;
        };
        match embed_one(&mut doc, page_id, overlay) {
            Ok(()) => embedded_pages.push(overlay.page_number),
            Err(error) => failed_pages
                .push(EmbedFailure { page_number: overlay.page_number, reason: error.to_string() }),
        }
    }

    embedded_pages.sort_unstable();
    embedded_pages.dedup();

    if embedded_pages.is_empty() {
        return Ok(EmbedReport { bytes: source.to_vec(), embedded_pages, missing_pages, failed_pages });
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;

    Ok(EmbedReport { bytes, embedded_pages, missing_pages, failed_pages })
}

fn embed_one(
    doc: &mut Document,
    page_id: ObjectId,
    overlay: &PageOverlay,
) -> Result<(), PdfEngineError> {
    let (width, height) = overlay.image.dimensions();
    if width == 0 || height == 0 {
        return Err(PdfEngineError::EmptyOverlay { page: overlay.page_number, width, height });
    }

    // Everything that can fail on a malformed page is resolved before any
    // object is added, so a failed page leaves the document untouched.
    let target = page_box(doc, page_id)?;
    let mut resources = resolve_resources(doc, page_id)?;
    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    };
    let existing = content_references(doc, page_id)?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in overlay.image.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let smask_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(&alpha)?,
    ));
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "SMask" => smask_id,
        },
        deflate(&rgb)?,
    ));

    let name = unused_overlay_name(&xobjects);
    xobjects.set(name.clone(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let draw = format!(
        "Q\nq {} 0 0 {} {} {} cm /{} Do Q\n",
        target.width_pt,
        target.height_pt,
        target.x0,
        target.y0,
        String::from_utf8_lossy(&name)
    );
    let draw_id = doc.add_object(Stream::new(dictionary! {}, draw.into_bytes()));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(draw_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|_| PdfEngineError::MalformedPage(page_id))?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));

    Ok(())
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PdfEngineError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, PdfEngineError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Copy of the page's effective resource dictionary, including inherited
/// resources. Shared resource objects are left untouched.
fn resolve_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, PdfEngineError> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = doc.get_dictionary(id).map_err(|_| PdfEngineError::MalformedPage(id))?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(resources)) => return Ok(resources.clone()),
            Ok(Object::Reference(resources_id)) => {
                return Ok(doc.get_dictionary(*resources_id).cloned().unwrap_or_default());
            }
            _ => {}
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(Dictionary::new())
}

fn content_references(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, PdfEngineError> {
    let page = doc.get_dictionary(page_id).map_err(|_| PdfEngineError::MalformedPage(page_id))?;
    let contents = match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    Ok(contents)
}

fn unused_overlay_name(xobjects: &Dictionary) -> Vec<u8> {
    let mut suffix = 0u32;
    loop {
        let mut name = OVERLAY_PREFIX.to_vec();
        if suffix > 0 {
            name.extend_from_slice(suffix.to_string().as_bytes());
        }
        if !xobjects.has(&name) {
            return name;
        }
        suffix += 1;
    }
}

/// Recover every overlay embedded by [`embed_page_overlays`], in page order.
pub fn read_page_overlays(bytes: &[u8]) -> Result<Vec<PageOverlay>, PdfEngineError> {
    let doc = load_document(bytes)?;
    let mut overlays = Vec::new();

    for (page_number, page_id) in doc.get_pages() {
        let Ok(resources) = resolve_resources(&doc, page_id) else {
            continue;
        };
        let xobjects = match resources.get(b"XObject") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
            _ => continue,
        };

        for (name, object) in xobjects.iter() {
            if !name.starts_with(OVERLAY_PREFIX) {
                continue;
            }
            let Ok(image_id) = object.as_reference() else {
                continue;
            };
            if let Some(image) = decode_overlay(&doc, image_id)? {
                overlays.push(PageOverlay { page_number, image });
            }
        }
    }

    Ok(overlays)
}

fn decode_overlay(doc: &Document, image_id: ObjectId) -> Result<Option<RgbaImage>, PdfEngineError> {
    let Ok(stream) = doc.get_object(image_id).and_then(Object::as_stream) else {
        return Ok(None);
    };
    let width = stream.dict.get(b"Width").ok().and_then(|o| o.as_i64().ok()).unwrap_or(0) as u32;
    let height = stream.dict.get(b"Height").ok().and_then(|o| o.as_i64().ok()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let rgb = stream_data(stream)?;
    let alpha = match stream.dict.get(b"SMask").and_then(Object::as_reference) {
        Ok(mask_id) => match doc.get_object(mask_id).and_then(Object::as_stream) {
            Ok(mask) => stream_data(mask)?,
            Err(_) => vec![255; (width * height) as usize],
        },
        Err(_) => vec![255; (width * height) as usize],
    };

    let pixel_count = (width * height) as usize;
    if rgb.len() < pixel_count * 3 || alpha.len() < pixel_count {
        return Ok(None);
    }

    let image = RgbaImage::from_fn(width, height, |x, y| {
        let index = (y * width + x) as usize;
        Rgba([rgb[index * 3], rgb[index * 3 + 1], rgb[index * 3 + 2], alpha[index]])
    });
    Ok(Some(image))
}

fn stream_data(stream: &Stream) -> Result<Vec<u8>, PdfEngineError> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(filter)) if filter.as_slice() == b"FlateDecode" => inflate(&stream.content),
        Ok(_) => Err(PdfEngineError::Backend("unsupported overlay stream filter".to_owned())),
        Err(_) => Ok(stream.content.clone()),
    }
}
