//! Photo and attachment handling
//!
//! Uploads arrive as data URLs. Photos are shrunk to fit within
//! [`MAX_DIMENSION`] pixels and re-encoded as JPEG before they are stored, so
//! documents stay small. The report exporter needs PNG bytes instead, see
//! [`to_png`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;

use crate::db::schemas::MAX_PHOTOS;
use crate::types::{Result, SitetrackError};

/// Longest side of a stored photo
pub const MAX_DIMENSION: u32 = 1024;

pub const JPEG_QUALITY: u8 = 75;

/// Decoded `data:` URL
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| SitetrackError::BadRequest("Expected a data URL".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| SitetrackError::BadRequest("Malformed data URL".into()))?;
        let Some(mime) = meta.strip_suffix(";base64") else {
            return Err(SitetrackError::BadRequest(
                "Only base64 data URLs are supported".into(),
            ));
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| SitetrackError::BadRequest(format!("Invalid base64 payload: {}", e)))?;
        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }

    pub fn encode(mime: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
    }
}

pub fn is_data_url(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

fn fit_within(img: DynamicImage, max: u32) -> DynamicImage {
    if img.width() > max || img.height() > max {
        img.resize(max, max, FilterType::Triangle)
    } else {
        img
    }
}

/// Shrink and re-encode one uploaded photo, returning a JPEG data URL
pub fn compress_photo(data_url: &str) -> Result<String> {
    let upload = DataUrl::parse(data_url)?;
    let img = fit_within(image::load_from_memory(&upload.bytes)?, MAX_DIMENSION);
    let rgb = img.to_rgb8();

    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
    }

    Ok(DataUrl::encode("image/jpeg", &out))
}

/// Photos to store after a save: compressed uploads when there are any,
/// otherwise the existing photos
pub fn merge_photos(uploads: &[String], existing: Vec<String>) -> Result<Vec<String>> {
    let uploads: Vec<&String> = uploads.iter().filter(|u| !u.trim().is_empty()).collect();
    if uploads.is_empty() {
        return Ok(existing.into_iter().take(MAX_PHOTOS).collect());
    }
    uploads
        .into_iter()
        .take(MAX_PHOTOS)
        .map(|u| compress_photo(u))
        .collect()
}

/// Convert any supported image to PNG bytes
pub fn to_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

/// KMZ attachment as stored on a reforestation activity
#[derive(Debug, Clone, PartialEq)]
pub struct KmzAttachment {
    pub name: String,
    pub data_url: String,
}

pub fn validate_kmz(name: &str, data_url: &str) -> Result<KmzAttachment> {
    let name = name.trim();
    if !name.to_lowercase().ends_with(".kmz") {
        return Err(SitetrackError::Validation(
            "Only .kmz files are allowed".into(),
        ));
    }
    DataUrl::parse(data_url)?;
    Ok(KmzAttachment {
        name: name.to_string(),
        data_url: data_url.trim().to_string(),
    })
}
