//! A `Store` that answers every call with `StoreError::Unavailable`.
//!
//! Used in place of [`MongoStore`](super::MongoStore) when the database is
//! unreachable at startup, so the TCP acceptor can still accept and log
//! connections in a degraded, accept-and-log-only mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Device, RawFrame, Record};

use super::{Store, StoreError};

pub struct DegradedStore {
    reason: String,
}

impl DegradedStore {
    pub fn new(reason: String) -> Self {
        DegradedStore { reason }
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl Store for DegradedStore {
    async fn insert_raw_frame(&self, _device_type: &str, _frame: RawFrame) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn insert_record(&self, _device_type: &str, _record: Record) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn find_range(
        &self,
        _device_type: &str,
        _imei: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        Err(self.unavailable())
    }

    async fn find_records(&self, _device_type: &str, _imei: &str, _limit: usize, _skip: usize) -> Result<Vec<Record>, StoreError> {
        Err(self.unavailable())
    }

    async fn find_raw_frames(&self, _device_type: &str, _imei: &str, _limit: usize) -> Result<Vec<RawFrame>, StoreError> {
        Err(self.unavailable())
    }

    async fn find_latest(&self, _device_type: &str, _imei: &str) -> Result<Option<Record>, StoreError> {
        Err(self.unavailable())
    }

    async fn upsert_device(&self, _device: Device) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn get_device(&self, _imei: &str) -> Result<Option<Device>, StoreError> {
        Err(self.unavailable())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        Err(self.unavailable())
    }

    async fn delete_device(&self, _imei: &str) -> Result<bool, StoreError> {
        Err(self.unavailable())
    }

    async fn count_records(&self, _device_type: &str, _imei: &str) -> Result<u64, StoreError> {
        Err(self.unavailable())
    }

    async fn ensure_indexes(&self, _device_type: &str) -> Result<(), StoreError> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_method_reports_unavailable() {
        let store = DegradedStore::new("connection refused".to_string());
        let err = store.get_device("864275079658715").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
