//! MongoDB-backed [`Store`]. Collections are named `raw_<type>` /
//! `records_<type>` per device type; `devices` is shared.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};

use crate::model::{Device, RawFrame, Record};

use super::{sanitize_collection_segment, Store, StoreError};

const DEVICES_COLLECTION: &str = "devices";
const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    /// Connects to `mongo_uri`. Failure here is recoverable by the caller:
    /// the TCP acceptor keeps running in a degraded mode when the store
    /// cannot be reached at startup.
    pub async fn connect(mongo_uri: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(mongo_uri)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let database = parse_uri_default_database(mongo_uri);
        Ok(MongoStore {
            client,
            database: database.unwrap_or_else(|| "teltonika".to_string()),
        })
    }

    fn db(&self) -> mongodb::Database {
        self.client.database(&self.database)
    }

    fn raw_collection(&self, device_type: &str) -> Collection<RawFrame> {
        self.db().collection(&format!("raw_{}", sanitize_collection_segment(device_type)))
    }

    fn records_collection(&self, device_type: &str) -> Collection<Record> {
        self.db()
            .collection(&format!("records_{}", sanitize_collection_segment(device_type)))
    }

    fn devices_collection(&self) -> Collection<Device> {
        self.db().collection(DEVICES_COLLECTION)
    }
}

/// `mongodb::Client` doesn't expose the parsed default db directly; the URI
/// path segment after the host is the database name, per the standard
/// connection-string format.
fn parse_uri_default_database(uri: &str) -> Option<String> {
    let without_scheme = uri.split("://").nth(1)?;
    let path = without_scheme.split('/').nth(1)?;
    let name = path.split('?').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_raw_frame(&self, device_type: &str, frame: RawFrame) -> Result<(), StoreError> {
        self.raw_collection(device_type)
            .insert_one(frame)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn insert_record(&self, device_type: &str, record: Record) -> Result<(), StoreError> {
        match self.records_collection(device_type).insert_one(record).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => Ok(()),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn find_range(
        &self,
        device_type: &str,
        imei: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        let filter = doc! { "imei": imei, "timestamp": { "$gte": from, "$lte": to } };
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        let cursor = self
            .records_collection(device_type)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor.try_collect().await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_records(
        &self,
        device_type: &str,
        imei: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let filter = doc! { "imei": imei };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .skip(skip as u64)
            .build();
        let cursor = self
            .records_collection(device_type)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor.try_collect().await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_raw_frames(&self, device_type: &str, imei: &str, limit: usize) -> Result<Vec<RawFrame>, StoreError> {
        let filter = doc! { "imei": imei };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .build();
        let cursor = self
            .raw_collection(device_type)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor.try_collect().await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_latest(&self, device_type: &str, imei: &str) -> Result<Option<Record>, StoreError> {
        let filter = doc! { "imei": imei };
        let options = FindOptions::builder().sort(doc! { "timestamp": -1 }).limit(1).build();
        self.records_collection(device_type)
            .find_one(filter)
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        let filter = doc! { "imei": &device.imei };
        self.devices_collection()
            .replace_one(filter, device)
            .upsert(true)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_device(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        self.devices_collection()
            .find_one(doc! { "imei": imei })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "lastSeen": -1 }).build();
        let cursor = self
            .devices_collection()
            .find(doc! {})
            .with_options(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        cursor.try_collect().await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete_device(&self, imei: &str) -> Result<bool, StoreError> {
        let result = self
            .devices_collection()
            .delete_one(doc! { "imei": imei })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.deleted_count > 0)
    }

    async fn count_records(&self, device_type: &str, imei: &str) -> Result<u64, StoreError> {
        self.records_collection(device_type)
            .count_documents(doc! { "imei": imei })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn ensure_indexes(&self, device_type: &str) -> Result<(), StoreError> {
        self.devices_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "imei": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.records_collection(device_type)
            .create_index(IndexModel::builder().keys(doc! { "imei": 1, "timestamp": -1 }).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.records_collection(device_type)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "timestamp": 1, "imei": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
