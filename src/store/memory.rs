//! In-process `Store` used by handler/session tests, so the HTTP and TCP
//! layers never need a live MongoDB instance to exercise their logic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Device, RawFrame, Record};

use super::{Store, StoreError};

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    records: HashMap<String, Vec<Record>>,
    raw_frames: HashMap<String, Vec<RawFrame>>,
}

fn record_key(device_type: &str, imei: &str) -> String {
    format!("{device_type}:{imei}")
}

/// Thread-safe, unbounded, never persisted to disk.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_raw_frame(&self, device_type: &str, frame: RawFrame) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .raw_frames
            .entry(record_key(device_type, &frame.imei))
            .or_default()
            .push(frame);
        Ok(())
    }

    async fn insert_record(&self, device_type: &str, record: Record) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = record_key(device_type, &record.imei);
        let bucket = inner.records.entry(key).or_default();
        if bucket.iter().any(|r| r.timestamp == record.timestamp && r.imei == record.imei) {
            return Ok(());
        }
        bucket.push(record);
        bucket.sort_by_key(|r| r.timestamp);
        Ok(())
    }

    async fn find_range(
        &self,
        device_type: &str,
        imei: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = record_key(device_type, imei);
        Ok(inner
            .records
            .get(&key)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.timestamp >= from && r.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_records(
        &self,
        device_type: &str,
        imei: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = record_key(device_type, imei);
        Ok(inner
            .records
            .get(&key)
            .map(|records| {
                let mut newest_first: Vec<Record> = records.clone();
                newest_first.reverse();
                newest_first.into_iter().skip(skip).take(limit).collect()
            })
            .unwrap_or_default())
    }

    async fn find_raw_frames(&self, device_type: &str, imei: &str, limit: usize) -> Result<Vec<RawFrame>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = record_key(device_type, imei);
        Ok(inner
            .raw_frames
            .get(&key)
            .map(|frames| {
                let mut newest_first: Vec<RawFrame> = frames.clone();
                newest_first.reverse();
                newest_first.into_iter().take(limit).collect()
            })
            .unwrap_or_default())
    }

    async fn find_latest(&self, device_type: &str, imei: &str) -> Result<Option<Record>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = record_key(device_type, imei);
        Ok(inner.records.get(&key).and_then(|records| records.last().cloned()))
    }

    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.devices.insert(device.imei.clone(), device);
        Ok(())
    }

    async fn get_device(&self, imei: &str) -> Result<Option<Device>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.devices.get(imei).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut devices: Vec<Device> = inner.devices.values().cloned().collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }

    async fn delete_device(&self, imei: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.devices.remove(imei).is_some())
    }

    async fn count_records(&self, device_type: &str, imei: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = record_key(device_type, imei);
        Ok(inner.records.get(&key).map(|r| r.len() as u64).unwrap_or(0))
    }

    async fn ensure_indexes(&self, _device_type: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GpsFix, Priority};
    use chrono::TimeZone;

    fn sample_record(ts_secs: i64) -> Record {
        Record {
            imei: "864275079658715".to_string(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            priority: Priority::Low,
            gps: GpsFix {
                latitude: 1.0,
                longitude: 2.0,
                altitude: 0,
                angle: 0,
                satellites: 5,
                speed: 0,
            },
            io_elements: vec![],
            total_odometer: None,
            accelerometer_x: None,
            accelerometer_y: None,
            accelerometer_z: None,
            gsm_signal: None,
            speed_io: None,
            obd_engine_load: None,
            obd_coolant_temp: None,
            obd_engine_rpm: None,
            obd_vehicle_speed: None,
            obd_fuel_rate: None,
            obd_total_mileage: None,
            obd_fuel_level_input: None,
            external_voltage: None,
            battery_voltage: None,
            battery_level: None,
            gnss_pdop: None,
            gnss_hdop: None,
            trip_odometer: None,
            ignition: None,
            movement: None,
            fuel_used_gps: None,
            vin: None,
        }
    }

    #[tokio::test]
    async fn duplicate_timestamp_insert_is_a_silent_no_op() {
        let store = InMemoryStore::new();
        store.insert_record("fmc003", sample_record(1_700_000_000)).await.unwrap();
        store.insert_record("fmc003", sample_record(1_700_000_000)).await.unwrap();

        let count = store.count_records("fmc003", "864275079658715").await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn find_records_returns_newest_first() {
        let store = InMemoryStore::new();
        for offset in 0..3 {
            store
                .insert_record("fmc003", sample_record(1_700_000_000 + offset))
                .await
                .unwrap();
        }

        let page = store.find_records("fmc003", "864275079658715", 10, 0).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page[0].timestamp > page[1].timestamp);
    }
}
