//! Image dimension extraction from PNG, GIF, JPEG and BMP headers.

use async_trait::async_trait;
use serde_json::json;

use crate::storage::ObjectHead;

use super::error::ExtractionError;
use super::traits::Extractor;
use super::types::Attributes;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Encoded image format recognised from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Gif,
    Jpeg,
    Bmp,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Bmp => "bmp",
        }
    }

    /// Recognise the format from the first bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&PNG_SIGNATURE) {
            Some(ImageFormat::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.starts_with(&[0xFF, 0xD8]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    /// The format a content type promises, if it is one we can parse.
    fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/png" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Parse dimensions for a known format.
pub fn read_dimensions(format: ImageFormat, data: &[u8]) -> Result<Dimensions, String> {
    match format {
        ImageFormat::Png => png_dimensions(data),
        ImageFormat::Gif => gif_dimensions(data),
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::Bmp => bmp_dimensions(data),
    }
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn png_dimensions(data: &[u8]) -> Result<Dimensions, String> {
    // Signature, then the IHDR chunk: length, type, width, height.
    if data.get(12..16) != Some(b"IHDR".as_slice()) {
        return Err("png: missing IHDR chunk".to_string());
    }
    let width = be_u32(data, 16).ok_or("png: truncated IHDR")?;
    let height = be_u32(data, 20).ok_or("png: truncated IHDR")?;
    Ok(Dimensions { width, height })
}

fn gif_dimensions(data: &[u8]) -> Result<Dimensions, String> {
    let screen = data.get(6..10).ok_or("gif: truncated screen descriptor")?;
    Ok(Dimensions {
        width: u16::from_le_bytes([screen[0], screen[1]]) as u32,
        height: u16::from_le_bytes([screen[2], screen[3]]) as u32,
    })
}

fn jpeg_dimensions(data: &[u8]) -> Result<Dimensions, String> {
    let mut i = 2;
    while i < data.len() {
        if data[i] != 0xFF {
            return Err(format!("jpeg: expected marker at offset {}", i));
        }
        // Fill bytes
        while i + 1 < data.len() && data[i + 1] == 0xFF {
            i += 1;
        }
        let marker = *data.get(i + 1).ok_or("jpeg: truncated marker")?;

        match marker {
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => return Err("jpeg: no frame header before scan data".to_string()),
            // SOF0..SOF15, excluding DHT, JPG and DAC.
            0xC0..=0xCF if marker != 0xC4 && marker != 0xC8 && marker != 0xCC => {
                let height = be_u16(data, i + 5).ok_or("jpeg: truncated frame header")?;
                let width = be_u16(data, i + 7).ok_or("jpeg: truncated frame header")?;
                return Ok(Dimensions {
                    width: width as u32,
                    height: height as u32,
                });
            }
            _ => {
                let length = be_u16(data, i + 2).ok_or("jpeg: truncated segment")? as usize;
                if length < 2 {
                    return Err("jpeg: invalid segment length".to_string());
                }
                i += 2 + length;
            }
        }
    }
    Err("jpeg: no frame header".to_string())
}

fn bmp_dimensions(data: &[u8]) -> Result<Dimensions, String> {
    let header = data.get(18..26).ok_or("bmp: truncated info header")?;
    let width = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    // Negative height means a top-down bitmap.
    let height = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok(Dimensions {
        width: width.unsigned_abs(),
        height: height.unsigned_abs(),
    })
}

/// Extractor for raster images: `width`, `height`, `format`.
#[derive(Debug, Default)]
pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for ImageExtractor {
    fn name(&self) -> &str {
        "image"
    }

    async fn extract(
        &self,
        head: &ObjectHead,
        content: &[u8],
    ) -> Result<Attributes, ExtractionError> {
        let format = match ImageFormat::sniff(content) {
            Some(format) => format,
            None if ImageFormat::from_content_type(&head.content_type).is_some() => {
                return Err(ExtractionError::Malformed(format!(
                    "{} does not start with a {} header",
                    head.key, head.content_type
                )))
            }
            None => {
                return Err(ExtractionError::unsupported(
                    crate::asset::AssetType::Image,
                    head.content_type.clone(),
                ))
            }
        };

        let dims = read_dimensions(format, content)
            .map_err(|e| ExtractionError::Malformed(format!("{}: {}", head.key, e)))?;

        if dims.width == 0 || dims.height == 0 {
            return Err(ExtractionError::Malformed(format!(
                "{}: zero image dimension",
                head.key
            )));
        }

        let mut attributes = Attributes::new();
        attributes.insert("width".to_string(), json!(dims.width));
        attributes.insert("height".to_string(), json!(dims.height));
        attributes.insert("format".to_string(), json!(format.as_str()));
        Ok(attributes)
    }
}
