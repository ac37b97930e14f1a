//! Shared data types persisted to and served out of the document store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative identity of a tracker, operator-maintained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub imei: String,
    #[serde(rename = "modemType")]
    pub modem_type: String,
    pub vin: Option<String>,
    pub approved: bool,
    #[serde(rename = "carBrand")]
    pub car_brand: Option<String>,
    #[serde(rename = "carModel")]
    pub car_model: Option<String>,
    #[serde(rename = "plateNumber")]
    pub plate_number: Option<String>,
    pub notes: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub const DEFAULT_MODEM_TYPE: &'static str = "FMC003";

    pub fn new(imei: String) -> Self {
        let now = Utc::now();
        Device {
            imei,
            modem_type: Self::DEFAULT_MODEM_TYPE.to_string(),
            vin: None,
            approved: false,
            car_brand: None,
            car_model: None,
            plate_number: None,
            notes: None,
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }
}

/// Opaque captured bytes, write-only from the server's perspective, kept for forensics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub imei: String,
    pub vin: Option<String>,
    #[serde(rename = "modemType")]
    pub modem_type: String,
    #[serde(rename = "rawHex")]
    pub raw_hex: String,
    pub timestamp: DateTime<Utc>,
}

/// GPS fix carried by every [`Record`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
}

/// Priority carried by every AVL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    High = 1,
    Panic = 2,
}

impl Priority {
    pub fn from_raw(value: u8) -> Priority {
        match value {
            1 => Priority::High,
            2 => Priority::Panic,
            _ => Priority::Low,
        }
    }
}

/// A single decoded IO element, as emitted in frame order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoElementEntry {
    pub id: u16,
    pub name: String,
    pub value: IoValue,
    pub size: u8,
}

/// A normalized IO value. 8-byte integers are kept as `u64`, never coerced to `f64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IoValue {
    Unsigned(u64),
    Signed(i64),
    Text(String),
    Hex(String),
}

impl IoValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IoValue::Unsigned(v) => i64::try_from(*v).ok(),
            IoValue::Signed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_i64().map(|v| v as f64)
    }
}

/// One decoded AVL sample, normalized and ready for storage/query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub imei: String,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub gps: GpsFix,
    #[serde(rename = "ioElements")]
    pub io_elements: Vec<IoElementEntry>,

    // Stable, named projections of well-known IO ids.
    #[serde(rename = "totalOdometer", skip_serializing_if = "Option::is_none")]
    pub total_odometer: Option<u64>,
    #[serde(rename = "accelerometerX", skip_serializing_if = "Option::is_none")]
    pub accelerometer_x: Option<i16>,
    #[serde(rename = "accelerometerY", skip_serializing_if = "Option::is_none")]
    pub accelerometer_y: Option<i16>,
    #[serde(rename = "accelerometerZ", skip_serializing_if = "Option::is_none")]
    pub accelerometer_z: Option<i16>,
    #[serde(rename = "gsmSignal", skip_serializing_if = "Option::is_none")]
    pub gsm_signal: Option<u8>,
    #[serde(rename = "speedIO", skip_serializing_if = "Option::is_none")]
    pub speed_io: Option<u16>,
    #[serde(rename = "obdEngineLoad", skip_serializing_if = "Option::is_none")]
    pub obd_engine_load: Option<u64>,
    #[serde(rename = "obdCoolantTemp", skip_serializing_if = "Option::is_none")]
    pub obd_coolant_temp: Option<i64>,
    #[serde(rename = "obdEngineRpm", skip_serializing_if = "Option::is_none")]
    pub obd_engine_rpm: Option<u64>,
    #[serde(rename = "obdVehicleSpeed", skip_serializing_if = "Option::is_none")]
    pub obd_vehicle_speed: Option<u64>,
    #[serde(rename = "obdFuelRate", skip_serializing_if = "Option::is_none")]
    pub obd_fuel_rate: Option<u64>,
    #[serde(rename = "obdTotalMileage", skip_serializing_if = "Option::is_none")]
    pub obd_total_mileage: Option<u64>,
    #[serde(rename = "obdFuelLevelInput", skip_serializing_if = "Option::is_none")]
    pub obd_fuel_level_input: Option<u64>,
    #[serde(rename = "externalVoltage", skip_serializing_if = "Option::is_none")]
    pub external_voltage: Option<u64>,
    #[serde(rename = "batteryVoltage", skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<u64>,
    #[serde(rename = "batteryLevel", skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u64>,
    #[serde(rename = "gnssPdop", skip_serializing_if = "Option::is_none")]
    pub gnss_pdop: Option<u64>,
    #[serde(rename = "gnssHdop", skip_serializing_if = "Option::is_none")]
    pub gnss_hdop: Option<u64>,
    #[serde(rename = "tripOdometer", skip_serializing_if = "Option::is_none")]
    pub trip_odometer: Option<u64>,
    #[serde(rename = "ignition", skip_serializing_if = "Option::is_none")]
    pub ignition: Option<u8>,
    #[serde(rename = "movement", skip_serializing_if = "Option::is_none")]
    pub movement: Option<u8>,
    #[serde(rename = "fuelUsedGps", skip_serializing_if = "Option::is_none")]
    pub fuel_used_gps: Option<u64>,
    #[serde(rename = "vin", skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
}

impl Record {
    /// Canonical lexicographically-sortable timestamp: downstream ordering
    /// relies on this string form sorting the same as chronological order.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn engine_on(&self) -> bool {
        self.ignition == Some(1) || self.obd_engine_rpm.unwrap_or(0) > 0
    }
}
