//! Object storage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object attributes available without reading the content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectHead {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend entity tag; changes whenever the content does.
    pub etag: Option<String>,
}
