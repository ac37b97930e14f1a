//! Persistence adapter: named-collection routing over a document store,
//! with idempotent upsert semantics for records replayed off a device's
//! local retry buffer.

mod degraded;
mod memory;
mod mongo;

pub use degraded::DegradedStore;
pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Device, RawFrame, Record};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("device {0} already exists")]
    DeviceExists(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Lower-cases and strips a device type string to `[a-z0-9]`, the
/// collection-name sanitization every backend's routing depends on.
pub fn sanitize_collection_segment(device_type: &str) -> String {
    device_type
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Opaque append-and-query interface over raw frames, normalized records,
/// and the device allow-list. Named-collection routing (`raw_<type>`,
/// `records_<type>`) is an implementation detail of each backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_raw_frame(&self, device_type: &str, frame: RawFrame) -> Result<(), StoreError>;

    /// Inserts a normalized record. Duplicate `(imei, timestamp)` is treated
    /// as success, since a losing writer in a retry race should not surface
    /// an error to the device.
    async fn insert_record(&self, device_type: &str, record: Record) -> Result<(), StoreError>;

    async fn find_range(
        &self,
        device_type: &str,
        imei: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Newest-first page of records.
    async fn find_records(
        &self,
        device_type: &str,
        imei: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Newest-first page of raw frames.
    async fn find_raw_frames(&self, device_type: &str, imei: &str, limit: usize) -> Result<Vec<RawFrame>, StoreError>;

    async fn find_latest(&self, device_type: &str, imei: &str) -> Result<Option<Record>, StoreError>;

    async fn upsert_device(&self, device: Device) -> Result<(), StoreError>;

    async fn get_device(&self, imei: &str) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn delete_device(&self, imei: &str) -> Result<bool, StoreError>;

    async fn count_records(&self, device_type: &str, imei: &str) -> Result<u64, StoreError>;

    async fn ensure_indexes(&self, device_type: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_mixed_case_and_punctuation() {
        assert_eq!(sanitize_collection_segment("FMC-003!"), "fmc003");
    }
}
