//! Asset identity and classification.
//!
//! An asset is identified by the file stem of its object key and classified
//! by the content type implied by the key extension. The classification fixes
//! which feature an execution extracts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse kind of an uploaded object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl AssetType {
    /// Classify a MIME content type.
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.to_ascii_lowercase();

        if content_type.starts_with("image/") {
            return AssetType::Image;
        }
        if content_type.starts_with("video/") {
            return AssetType::Video;
        }
        if content_type.starts_with("audio/") {
            return AssetType::Audio;
        }
        if content_type.contains("pdf")
            || content_type.starts_with("text/")
            || content_type.contains("application/vnd.openxmlformats-officedocument")
            || content_type.contains("application/msword")
        {
            return AssetType::Document;
        }

        AssetType::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Image => "image",
            AssetType::Video => "video",
            AssetType::Audio => "audio",
            AssetType::Document => "document",
            AssetType::Other => "other",
        }
    }
}

/// A named kind of derived data extracted from an asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureType {
    ImageMeta,
    VideoMeta,
    AudioMeta,
    DocumentMeta,
    ObjectMeta,
}

impl FeatureType {
    /// All feature types, in a stable order.
    pub const ALL: [FeatureType; 5] = [
        FeatureType::ImageMeta,
        FeatureType::VideoMeta,
        FeatureType::AudioMeta,
        FeatureType::DocumentMeta,
        FeatureType::ObjectMeta,
    ];

    /// The feature extracted for a given asset type.
    pub fn for_asset_type(asset_type: AssetType) -> Self {
        match asset_type {
            AssetType::Image => FeatureType::ImageMeta,
            AssetType::Video => FeatureType::VideoMeta,
            AssetType::Audio => FeatureType::AudioMeta,
            AssetType::Document => FeatureType::DocumentMeta,
            AssetType::Other => FeatureType::ObjectMeta,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::ImageMeta => "image-meta",
            FeatureType::VideoMeta => "video-meta",
            FeatureType::AudioMeta => "audio-meta",
            FeatureType::DocumentMeta => "document-meta",
            FeatureType::ObjectMeta => "object-meta",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureType::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| format!("unknown feature type: {}", s))
    }
}

/// Derive the asset id from an object key: the file stem of the last segment.
///
/// Returns `None` when the key has no usable stem (e.g. `dir/` or `dir/.png`).
pub fn asset_id_from_key(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let stem = match file_name.rfind('.') {
        Some(0) => "",
        Some(idx) => &file_name[..idx],
        None => file_name,
    };

    if stem.trim().is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Guess a MIME content type from the key extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let extension = key
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Classify an object key: content type guess, then asset type.
pub fn asset_type_for_key(key: &str) -> AssetType {
    AssetType::from_content_type(content_type_for_key(key))
}
