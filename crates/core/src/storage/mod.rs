//! Durable object storage collaborator.
//!
//! The extraction worker reads uploaded objects through the [`ObjectStorage`]
//! trait. [`FsObjectStorage`] serves a local directory laid out as
//! `<root>/<bucket>/<key>`.

mod config;
mod error;
mod fs_storage;
mod traits;
mod types;

pub use config::StorageConfig;
pub use error::StorageError;
pub use fs_storage::FsObjectStorage;
pub use traits::ObjectStorage;
pub use types::ObjectHead;
