//! Extractor capability set keyed by asset type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::AssetType;

use super::generic::GenericExtractor;
use super::image::ImageExtractor;
use super::traits::Extractor;

/// Maps each asset type to the extractor that handles it.
///
/// Asset types without an entry are unsupported.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<AssetType, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Image extractor for images, generic extractor for video, audio and documents.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(AssetType::Image, Arc::new(ImageExtractor::new()))
            .with(AssetType::Video, Arc::new(GenericExtractor::new(AssetType::Video)))
            .with(AssetType::Audio, Arc::new(GenericExtractor::new(AssetType::Audio)))
            .with(
                AssetType::Document,
                Arc::new(GenericExtractor::new(AssetType::Document)),
            )
    }

    pub fn with(mut self, asset_type: AssetType, extractor: Arc<dyn Extractor>) -> Self {
        self.register(asset_type, extractor);
        self
    }

    pub fn register(&mut self, asset_type: AssetType, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(asset_type, extractor);
    }

    pub fn get(&self, asset_type: AssetType) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&asset_type).cloned()
    }

    pub fn supports(&self, asset_type: AssetType) -> bool {
        self.extractors.contains_key(&asset_type)
    }
}
