//! Maps decoded IO element ids to stable semantic field names and typed
//! projections. The mapping table is data, not code, so that extending it
//! never touches control flow.

use chrono::{TimeZone, Utc};

use crate::codec::{AvlRecordRaw, IoValueRaw};
use crate::model::{IoElementEntry, IoValue, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Stored as-is under its mapped name.
    Raw,
    /// 16-bit two's-complement reinterpretation (accelerometer axes).
    SignedAccel,
}

struct IoMapping {
    id: u16,
    name: &'static str,
    kind: FieldKind,
}

/// Canonical IO id → name table for the FMC003 class of devices.
const IO_TABLE: &[IoMapping] = &[
    IoMapping { id: 16, name: "totalOdometer", kind: FieldKind::Raw },
    IoMapping { id: 17, name: "accelerometerX", kind: FieldKind::SignedAccel },
    IoMapping { id: 18, name: "accelerometerY", kind: FieldKind::SignedAccel },
    IoMapping { id: 19, name: "accelerometerZ", kind: FieldKind::SignedAccel },
    IoMapping { id: 21, name: "gsmSignal", kind: FieldKind::Raw },
    IoMapping { id: 24, name: "speedIO", kind: FieldKind::Raw },
    IoMapping { id: 30, name: "obdNumberOfDtc", kind: FieldKind::Raw },
    IoMapping { id: 31, name: "obdEngineLoad", kind: FieldKind::Raw },
    IoMapping { id: 32, name: "obdCoolantTemp", kind: FieldKind::Raw },
    IoMapping { id: 36, name: "obdEngineRpm", kind: FieldKind::Raw },
    IoMapping { id: 37, name: "obdVehicleSpeed", kind: FieldKind::Raw },
    IoMapping { id: 48, name: "obdFuelLevelInput", kind: FieldKind::Raw },
    IoMapping { id: 58, name: "obdFuelRate", kind: FieldKind::Raw },
    IoMapping { id: 389, name: "obdTotalMileage", kind: FieldKind::Raw },
    IoMapping { id: 390, name: "obdFuelLevelInput", kind: FieldKind::Raw },
    IoMapping { id: 66, name: "externalVoltage", kind: FieldKind::Raw },
    IoMapping { id: 67, name: "batteryVoltage", kind: FieldKind::Raw },
    IoMapping { id: 113, name: "batteryLevel", kind: FieldKind::Raw },
    IoMapping { id: 181, name: "gnssPdop", kind: FieldKind::Raw },
    IoMapping { id: 182, name: "gnssHdop", kind: FieldKind::Raw },
    IoMapping { id: 199, name: "tripOdometer", kind: FieldKind::Raw },
    IoMapping { id: 239, name: "ignition", kind: FieldKind::Raw },
    IoMapping { id: 240, name: "movement", kind: FieldKind::Raw },
    IoMapping { id: 256, name: "vin", kind: FieldKind::Raw },
    IoMapping { id: 12, name: "fuelUsedGps", kind: FieldKind::Raw },
];

fn lookup(id: u16) -> Option<&'static IoMapping> {
    IO_TABLE.iter().find(|m| m.id == id)
}

/// Normalizes one decoded raw AVL record into a storable, queryable [`Record`].
pub fn normalize(imei: &str, raw: &AvlRecordRaw) -> Record {
    let timestamp = Utc
        .timestamp_millis_opt(raw.timestamp_ms as i64)
        .single()
        .unwrap_or_else(Utc::now);

    let mut record = Record {
        imei: imei.to_string(),
        timestamp,
        priority: raw.priority,
        gps: raw.gps,
        io_elements: Vec::with_capacity(raw.io_elements.len()),
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
    };

    for io in &raw.io_elements {
        let mapping = lookup(io.id);
        let name = mapping.map(|m| m.name.to_string()).unwrap_or_else(|| format!("IO_{}", io.id));

        let (value, size) = match &io.value {
            IoValueRaw::Unsigned { value, width } => {
                let value = if matches!(mapping.map(|m| m.kind), Some(FieldKind::SignedAccel)) {
                    IoValue::Signed(signed_16(*value))
                } else {
                    IoValue::Unsigned(*value)
                };
                (value, *width)
            }
            IoValueRaw::Text(text) => (IoValue::Text(text.clone()), text.len() as u8),
            IoValueRaw::Hex(hex) => (IoValue::Hex(hex.clone()), (hex.len() / 2) as u8),
        };

        record.io_elements.push(IoElementEntry {
            id: io.id,
            name: name.clone(),
            value: value.clone(),
            size,
        });

        assign_projection(&mut record, &name, &value);
    }

    record
}

/// Signed 16-bit conversion for accelerometer ids.
fn signed_16(value: u64) -> i64 {
    let v = value as i64;
    if v > 32767 {
        v - 65536
    } else {
        v
    }
}

fn assign_projection(record: &mut Record, name: &str, value: &IoValue) {
    match name {
        "totalOdometer" => record.total_odometer = value.as_i64().map(|v| v as u64),
        "accelerometerX" => record.accelerometer_x = value.as_i64().map(|v| v as i16),
        "accelerometerY" => record.accelerometer_y = value.as_i64().map(|v| v as i16),
        "accelerometerZ" => record.accelerometer_z = value.as_i64().map(|v| v as i16),
        "gsmSignal" => record.gsm_signal = value.as_i64().map(|v| v as u8),
        "speedIO" => record.speed_io = value.as_i64().map(|v| v as u16),
        "obdEngineLoad" => record.obd_engine_load = value.as_i64().map(|v| v as u64),
        "obdCoolantTemp" => record.obd_coolant_temp = value.as_i64(),
        "obdEngineRpm" => record.obd_engine_rpm = value.as_i64().map(|v| v as u64),
        "obdVehicleSpeed" => record.obd_vehicle_speed = value.as_i64().map(|v| v as u64),
        "obdFuelRate" => record.obd_fuel_rate = value.as_i64().map(|v| v as u64),
        "obdTotalMileage" => record.obd_total_mileage = value.as_i64().map(|v| v as u64),
        "obdFuelLevelInput" => record.obd_fuel_level_input = value.as_i64().map(|v| v as u64),
        "externalVoltage" => record.external_voltage = value.as_i64().map(|v| v as u64),
        "batteryVoltage" => record.battery_voltage = value.as_i64().map(|v| v as u64),
        "batteryLevel" => record.battery_level = value.as_i64().map(|v| v as u64),
        "gnssPdop" => record.gnss_pdop = value.as_i64().map(|v| v as u64),
        "gnssHdop" => record.gnss_hdop = value.as_i64().map(|v| v as u64),
        "tripOdometer" => record.trip_odometer = value.as_i64().map(|v| v as u64),
        "ignition" => record.ignition = value.as_i64().map(|v| v as u8),
        "movement" => record.movement = value.as_i64().map(|v| v as u8),
        "fuelUsedGps" => record.fuel_used_gps = value.as_i64().map(|v| v as u64),
        "vin" => {
            if let IoValue::Text(text) = value {
                record.vin = Some(text.clone());
            }
        }
        _ => {}
    }
}

/// Extracts the VIN from a chronological slice of records, if any carry it.
pub fn find_vin(records: &[Record]) -> Option<String> {
    records.iter().find_map(|r| r.vin.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::test_support::FrameBuilder;

    #[test]
    fn maps_known_ids_to_named_projections() {
        let frame = FrameBuilder::new()
            .extended()
            .add_record(|r| {
                r.timestamp_ms(1_704_067_200_000)
                    .priority(1)
                    .gps(260_000_000, 440_000_000, 100, 90, 9, 50)
                    .io_u8(239, 1)
                    .io_u32(16, 123_456)
            })
            .build();
        let decoded = decode(&frame).unwrap();
        let record = normalize("864275079658715", &decoded.records[0]);

        assert_eq!(record.ignition, Some(1));
        assert_eq!(record.total_odometer, Some(123_456));
        assert_eq!(record.timestamp_iso(), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn unknown_id_falls_back_to_synthetic_name() {
        let frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0).io_u8(250, 7))
            .build();
        let decoded = decode(&frame).unwrap();
        let record = normalize("imei", &decoded.records[0]);

        assert_eq!(record.io_elements[0].name, "IO_250");
    }

    #[test]
    fn accelerometer_values_are_signed() {
        let frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0).io_u16(17, 65036))
            .build();
        let decoded = decode(&frame).unwrap();
        let record = normalize("imei", &decoded.records[0]);

        assert_eq!(record.accelerometer_x, Some(-500));
    }
}
