//! Extractor for video, audio and document objects.

use async_trait::async_trait;
use serde_json::json;

use crate::asset::AssetType;
use crate::storage::ObjectHead;

use super::error::ExtractionError;
use super::traits::Extractor;
use super::types::Attributes;

/// Records the container kind, plus cheap header facts where available
/// (PDF version, text line count). Size and hashes come from the worker.
///
/// `content` may be a prefix of a large object; line counts are only
/// reported when the whole object was read.
#[derive(Debug)]
pub struct GenericExtractor {
    asset_type: AssetType,
}

impl GenericExtractor {
    pub fn new(asset_type: AssetType) -> Self {
        Self { asset_type }
    }
}

fn pdf_version(content: &[u8]) -> Option<String> {
    let header = content.strip_prefix(b"%PDF-")?;
    let version: String = header
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    (!version.is_empty()).then_some(version)
}

#[async_trait]
impl Extractor for GenericExtractor {
    fn name(&self) -> &str {
        "generic"
    }

    async fn extract(
        &self,
        head: &ObjectHead,
        content: &[u8],
    ) -> Result<Attributes, ExtractionError> {
        let mut attributes = Attributes::new();
        attributes.insert("kind".to_string(), json!(self.asset_type.as_str()));

        if let Some((_, subtype)) = head.content_type.split_once('/') {
            attributes.insert("container".to_string(), json!(subtype));
        }

        if head.content_type == "application/pdf" {
            let version = pdf_version(content).ok_or_else(|| {
                ExtractionError::Malformed(format!("{}: missing %PDF header", head.key))
            })?;
            attributes.insert("pdfVersion".to_string(), json!(version));
        } else if head.content_type.starts_with("text/")
            && content.len() as u64 >= head.size
        {
            let lines = content.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
            attributes.insert("lineCount".to_string(), json!(lines));
        }

        Ok(attributes)
    }
}
