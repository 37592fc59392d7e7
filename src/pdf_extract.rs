// src/pdf_extract.rs

use crate::error::{FipError, Result};
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use tracing::{debug, info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// The PDF appears to be scanned / image-only.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Share of image-only pages above which the whole PDF counts as scanned.
const SCANNED_PAGE_RATIO: f64 = 0.8;

/// Takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // structural check first, full text extraction second
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, "Text extracted successfully");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
            PdfContent::ScannedImage
        }
    }
}

/// Resolve `key` in `dict` to a dictionary, following references.
fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key)
        .ok()
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
}

fn page_resources<'a>(doc: &'a Document, page_dict: &'a Dictionary) -> Option<&'a Dictionary> {
    resolve_dict(doc, page_dict, b"Resources")
}

/// Heuristic: a page with XObjects but no Font resources is almost
/// certainly a scanned page.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // can't tell, let text extraction try
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Some(page_dict) = doc.get_object(*object_id).ok().and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        let resources = page_resources(doc, page_dict);

        let has_fonts = resources
            .and_then(|res| resolve_dict(doc, res, b"Font"))
            .is_some_and(|fonts| !fonts.is_empty());
        let has_images = resources
            .and_then(|res| resolve_dict(doc, res, b"XObject"))
            .is_some_and(|xobjs| !xobjs.is_empty());

        if has_images && !has_fonts {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= SCANNED_PAGE_RATIO
}

/// Filter names of a stream, outermost first.
fn stream_filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// Number of colour components, from a device colour space name or an
/// ICCBased array.
fn color_components(doc: &Document, stream: &Stream) -> Option<usize> {
    let cs = stream.dict.get(b"ColorSpace").ok()?;
    let (_, cs) = doc.dereference(cs).ok()?;
    match cs {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceGray" | b"CalGray" => Some(1),
            _ => None,
        },
        Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            if family != b"ICCBased" {
                return None;
            }
            let (_, profile) = doc.dereference(items.get(1)?).ok()?;
            let n = profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()?;
            Some(n as usize)
        }
        _ => None,
    }
}

/// Decode one image XObject into RGB.
fn decode_image(doc: &Document, stream: &Stream) -> Result<RgbImage> {
    let filters = stream_filters(stream);
    if filters.last().is_some_and(|f| f == b"DCTDecode") {
        if filters.len() > 1 {
            return Err(FipError::UnsupportedImage("chained DCTDecode".to_string()));
        }
        return Ok(image::load_from_memory(&stream.content)?.to_rgb8());
    }

    let data = match filters.as_slice() {
        [] => stream.content.clone(),
        [f] if f == b"FlateDecode" => stream
            .decompressed_content()
            .map_err(|e| FipError::UnsupportedImage(format!("flate stream: {e}")))?,
        other => {
            let names: Vec<String> = other.iter().map(|f| String::from_utf8_lossy(f).into_owned()).collect();
            return Err(FipError::UnsupportedImage(format!("filters {}", names.join(","))));
        }
    };

    let dim = |key: &[u8]| -> Result<u32> {
        stream
            .dict
            .get(key)
            .and_then(Object::as_i64)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| FipError::UnsupportedImage(format!("missing {}", String::from_utf8_lossy(key))))
    };
    let (width, height) = (dim(b"Width")?, dim(b"Height")?);
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return Err(FipError::UnsupportedImage(format!("{bits} bits per component")));
    }

    let too_short = || FipError::UnsupportedImage(format!("truncated {width}x{height} image data"));
    match color_components(doc, stream) {
        Some(3) => {
            let len = width as usize * height as usize * 3;
            let pixels = data.get(..len).ok_or_else(too_short)?.to_vec();
            RgbImage::from_raw(width, height, pixels).ok_or_else(too_short)
        }
        Some(1) => {
            let len = width as usize * height as usize;
            let pixels = data.get(..len).ok_or_else(too_short)?.to_vec();
            let gray = GrayImage::from_raw(width, height, pixels).ok_or_else(too_short)?;
            Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
        }
        other => Err(FipError::UnsupportedImage(format!("colour space with {other:?} components"))),
    }
}

/// Every decodable image XObject, in page order. Undecodable images are
/// logged and skipped.
pub fn extract_page_images(pdf_bytes: &[u8]) -> Result<Vec<RgbImage>> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| FipError::Pdf(e.to_string()))?;
    let mut images = Vec::new();

    for (page_num, object_id) in doc.get_pages() {
        let Some(page_dict) = doc.get_object(object_id).ok().and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        let Some(xobjects) = page_resources(&doc, page_dict).and_then(|r| resolve_dict(&doc, r, b"XObject"))
        else {
            continue;
        };

        for (name, obj) in xobjects.iter() {
            let Some(stream) = doc
                .dereference(obj)
                .ok()
                .and_then(|(_, o)| o.as_stream().ok())
            else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|s| s == b"Image");
            if !is_image {
                continue;
            }

            let name = String::from_utf8_lossy(name);
            match decode_image(&doc, stream) {
                Ok(img) => {
                    debug!(page = page_num, name = %name, width = img.width(), height = img.height(), "Embedded image");
                    images.push(img);
                }
                Err(e) => warn!(page = page_num, name = %name, error = %e, "Skipping embedded image"),
            }
        }
    }

    info!(images = images.len(), "Embedded images extracted");
    Ok(images)
}
