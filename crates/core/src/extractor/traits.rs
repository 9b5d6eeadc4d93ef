//! Trait definitions for extractors.

use async_trait::async_trait;

use crate::storage::ObjectHead;

use super::error::ExtractionError;
use super::types::Attributes;

/// A format-specific capability that derives attributes from object bytes.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns the name of this extractor.
    fn name(&self) -> &str;

    /// Derive attributes. Must not have side effects.
    async fn extract(&self, head: &ObjectHead, content: &[u8])
        -> Result<Attributes, ExtractionError>;
}
