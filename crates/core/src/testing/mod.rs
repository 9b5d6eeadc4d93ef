//! Testing utilities and mock implementations.
//!
//! Mocks stand in for object storage, the workflow engine (as seen by the
//! ingest trigger) and extractors, so the whole pipeline runs in-process.
//!
//! # Example
//!
//! ```rust,ignore
//! use assetflow_core::testing::{fixtures, MockObjectStorage};
//!
//! let storage = MockObjectStorage::new();
//! storage.put("uploads", "img/42.png", fixtures::png_bytes(100, 50)).await;
//! storage.fail_next(2).await;
//! ```

mod mock_extractor;
mod mock_starter;
mod mock_storage;

pub use mock_extractor::MockExtractor;
pub use mock_starter::MockWorkflowStarter;
pub use mock_storage::MockObjectStorage;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;

    /// Event time used by [`notification`].
    pub const EVENT_TIME: &str = "2024-05-01T12:00:00.000Z";

    /// Minimal PNG: signature, IHDR and IEND.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 2, 0, 0, 0]); // depth, RGB, compression, filter, interlace
        data.extend_from_slice(&[0, 0, 0, 0]); // crc, not checked
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"IEND");
        data.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
        data
    }

    /// Minimal GIF89a: header, logical screen descriptor, trailer.
    pub fn gif_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0]);
        data.push(0x3B);
        data
    }

    /// Minimal baseline JPEG: SOI, APP0 (JFIF), SOF0, EOI.
    pub fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        data.extend_from_slice(b"JFIF\0");
        data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.push(0x03);
        data.extend_from_slice(&[0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    /// One object-created notification record.
    pub fn notification_record(bucket: &str, key: &str, event_time: &str) -> serde_json::Value {
        json!({
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "eventTime": event_time,
            "s3": {
                "bucket": {"name": bucket},
                "object": {"key": key, "size": 1024}
            }
        })
    }

    /// Notification envelope with one record per (already URL-encoded) key.
    pub fn notification(bucket: &str, keys: &[&str]) -> String {
        notification_at(bucket, keys, EVENT_TIME)
    }

    pub fn notification_at(bucket: &str, keys: &[&str], event_time: &str) -> String {
        let records: Vec<_> = keys
            .iter()
            .map(|key| notification_record(bucket, key, event_time))
            .collect();
        json!({ "Records": records }).to_string()
    }
}
