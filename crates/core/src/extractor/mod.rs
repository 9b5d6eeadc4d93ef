//! Extraction worker and its pluggable extractor capability set.
//!
//! The worker reads an object through [`ObjectStorage`](crate::storage::ObjectStorage),
//! picks the extractor registered for the asset type implied by the key, and
//! returns [`AssetMetadata`]. Failures are classified through
//! [`Classify`](crate::retry::Classify) so the engine can decide between retry
//! and terminal failure.

mod error;
mod generic;
mod image;
mod registry;
mod traits;
mod types;
mod worker;

pub use error::ExtractionError;
pub use generic::GenericExtractor;
pub use image::{read_dimensions, Dimensions, ImageExtractor, ImageFormat};
pub use registry::ExtractorRegistry;
pub use traits::Extractor;
pub use types::{AssetMetadata, Attributes, ExtractionRequest};
pub use worker::ExtractionWorker;
