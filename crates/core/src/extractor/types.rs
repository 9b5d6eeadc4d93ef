//! Extraction input and output types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::AssetType;

/// Format-specific attributes produced by an extractor.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Input to the extraction worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub execution_id: String,
    pub asset_id: String,
    pub bucket: String,
    pub key: String,
}

/// Structured metadata derived from one object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_length: u64,
    /// MD5 hex of the content.
    pub etag: String,
    /// SHA-256 hex for objects within the hashing limit, otherwise the etag.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub asset_type: AssetType,
    #[serde(default)]
    pub attributes: Attributes,
}
