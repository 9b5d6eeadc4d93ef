//! Mock extractor for testing.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::extractor::{Attributes, ExtractionError, Extractor};
use crate::storage::ObjectHead;

/// Extractor with scripted results.
///
/// Queued errors are returned first, one per call; afterwards every call
/// returns the configured attributes.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    attributes: Arc<RwLock<Attributes>>,
    errors: Arc<RwLock<VecDeque<ExtractionError>>>,
    calls: Arc<RwLock<usize>>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        let mut attributes = Attributes::new();
        attributes.insert("mock".to_string(), json!(true));
        Self {
            attributes: Arc::new(RwLock::new(attributes)),
            errors: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn set_attributes(&self, attributes: Attributes) {
        *self.attributes.write().await = attributes;
    }

    /// Queue an error for a future call.
    pub async fn push_error(&self, error: ExtractionError) {
        self.errors.write().await.push_back(error);
    }

    pub async fn calls(&self) -> usize {
        *self.calls.read().await
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(
        &self,
        _head: &ObjectHead,
        _content: &[u8],
    ) -> Result<Attributes, ExtractionError> {
        *self.calls.write().await += 1;

        if let Some(error) = self.errors.write().await.pop_front() {
            return Err(error);
        }
        Ok(self.attributes.read().await.clone())
    }
}
