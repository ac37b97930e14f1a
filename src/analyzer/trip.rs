//! Trip segmentation and metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::behavior::{driver_behavior_score, DriverBehavior};
use crate::model::{GpsFix, Record};

const QUIET_PERIOD_SECS: i64 = 60;
const MIN_EMIT_DURATION_MINUTES: i64 = 2;
const MIN_EMIT_DISTANCE_METERS: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<GpsFix> for GpsPoint {
    fn from(fix: GpsFix) -> Self {
        GpsPoint {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Trip {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "startOdometer", skip_serializing_if = "Option::is_none")]
    pub start_odometer: Option<u64>,
    #[serde(rename = "endOdometer", skip_serializing_if = "Option::is_none")]
    pub end_odometer: Option<u64>,
    #[serde(rename = "distanceMeters")]
    pub distance_meters: f64,
    #[serde(rename = "distanceKm")]
    pub distance_km: f64,
    #[serde(rename = "distanceEstimated", skip_serializing_if = "Option::is_none")]
    pub distance_estimated: Option<bool>,
    #[serde(rename = "durationMinutes")]
    pub duration_minutes: i64,
    #[serde(rename = "durationLabel")]
    pub duration_label: String,
    #[serde(rename = "maxSpeed")]
    pub max_speed: f64,
    #[serde(rename = "avgSpeedMoving", skip_serializing_if = "Option::is_none")]
    pub avg_speed_moving: Option<f64>,
    #[serde(rename = "avgSpeedTotal", skip_serializing_if = "Option::is_none")]
    pub avg_speed_total: Option<f64>,
    #[serde(rename = "fuelUsedLiters", skip_serializing_if = "Option::is_none")]
    pub fuel_used_liters: Option<f64>,
    #[serde(rename = "fuelPer100km", skip_serializing_if = "Option::is_none")]
    pub fuel_per_100km: Option<f64>,
    #[serde(rename = "fuelFromGps", skip_serializing_if = "Option::is_none")]
    pub fuel_from_gps: Option<bool>,
    #[serde(rename = "startPosition")]
    pub start_position: GpsPoint,
    #[serde(rename = "endPosition")]
    pub end_position: GpsPoint,
    #[serde(rename = "driverBehavior", skip_serializing_if = "Option::is_none")]
    pub driver_behavior: Option<DriverBehavior>,
}

fn effective_speed(record: &Record) -> f64 {
    match record.obd_vehicle_speed {
        Some(v) if v > 0 => v as f64,
        _ => record.gps.speed as f64,
    }
}

/// Segments a chronologically ascending slice of records into trips.
///
/// A trip is a maximal run of engine-on activity separated from its
/// neighbors by more than 60s of continuous engine-off time. Only trips
/// meeting the emit threshold are returned.
pub fn segment_trips(records: &[Record]) -> Vec<Trip> {
    let mut trips = Vec::new();
    let mut buffer: Vec<&Record> = Vec::new();
    let mut last_engine_on_index: Option<usize> = None;
    let mut last_engine_on_ts: Option<DateTime<Utc>> = None;

    for record in records {
        if record.engine_on() {
            buffer.push(record);
            last_engine_on_index = Some(buffer.len() - 1);
            last_engine_on_ts = Some(record.timestamp);
        } else if !buffer.is_empty() {
            let gap = record.timestamp - last_engine_on_ts.unwrap();
            if gap.num_seconds() > QUIET_PERIOD_SECS {
                finalize_trip(&buffer, last_engine_on_index, &mut trips);
                buffer.clear();
                last_engine_on_index = None;
                last_engine_on_ts = None;
            } else {
                buffer.push(record);
            }
        }
    }

    if !buffer.is_empty() {
        finalize_trip(&buffer, last_engine_on_index, &mut trips);
    }

    trips
}

fn finalize_trip(buffer: &[&Record], last_engine_on_index: Option<usize>, trips: &mut Vec<Trip>) {
    let Some(last_on) = last_engine_on_index else {
        return;
    };
    let trip_records: Vec<Record> = buffer[..=last_on].iter().map(|r| (**r).clone()).collect();
    if let Some(trip) = trip_metrics(&trip_records) {
        trips.push(trip);
    }
}

/// Computes trip metrics for one trip's record set, or `None` if the trip
/// doesn't meet the minimum duration/distance threshold to be emitted.
pub fn trip_metrics(records: &[Record]) -> Option<Trip> {
    let first = records.first()?;
    let last = records.last()?;

    let start_time = first.timestamp;
    let end_time = last.timestamp;
    let duration_minutes = ((end_time - start_time).num_seconds() as f64 / 60.0).round() as i64;

    let start_odometer = first.total_odometer;
    let end_odometer = last.total_odometer;

    let (distance_meters, distance_estimated) = match (start_odometer, end_odometer) {
        (Some(s), Some(e)) if e > s => ((e - s) as f64, false),
        _ => (integrate_distance(records), true),
    };

    if duration_minutes < MIN_EMIT_DURATION_MINUTES && distance_meters <= MIN_EMIT_DISTANCE_METERS {
        return None;
    }

    let distance_km = (distance_meters / 100.0).round() / 10.0;

    let max_speed = records.iter().map(effective_speed).fold(0.0_f64, f64::max);
    let moving: Vec<f64> = records.iter().map(effective_speed).filter(|&s| s > 0.0).collect();
    let avg_speed_moving = if moving.is_empty() {
        None
    } else {
        Some(moving.iter().sum::<f64>() / moving.len() as f64)
    };
    let duration_hours = duration_minutes as f64 / 60.0;
    let avg_speed_total = if duration_hours > 0.0 {
        Some(distance_km / duration_hours)
    } else {
        None
    };

    let (fuel_used_liters, fuel_per_100km, fuel_from_gps) = fuel_metrics(records, distance_km, duration_minutes);

    let start_position = gps_with_satellites(records, true);
    let end_position = gps_with_satellites(records, false);

    let driver_behavior = driver_behavior_score(records, duration_minutes as f64, distance_estimated);

    Some(Trip {
        start_time,
        end_time,
        start_odometer,
        end_odometer,
        distance_meters,
        distance_km,
        distance_estimated: if distance_estimated { Some(true) } else { None },
        duration_minutes,
        duration_label: format_duration(duration_minutes),
        max_speed,
        avg_speed_moving,
        avg_speed_total,
        fuel_used_liters,
        fuel_per_100km,
        fuel_from_gps,
        start_position,
        end_position,
        driver_behavior,
    })
}

/// Fallback distance: integrates effective speed over elapsed time between
/// successive records, used when the odometer hasn't moved.
fn integrate_distance(records: &[Record]) -> f64 {
    let mut meters = 0.0;
    for pair in records.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let dt_hours = (b.timestamp - a.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        if dt_hours <= 0.0 {
            continue;
        }
        let speed_kmh = effective_speed(a);
        meters += speed_kmh * dt_hours * 1000.0;
    }
    meters
}

fn fuel_metrics(records: &[Record], distance_km: f64, duration_minutes: i64) -> (Option<f64>, Option<f64>, Option<bool>) {
    let start_fuel = records.iter().find_map(|r| r.fuel_used_gps);
    let end_fuel = records.iter().rev().find_map(|r| r.fuel_used_gps);

    let (Some(start_fuel), Some(end_fuel)) = (start_fuel, end_fuel) else {
        return (None, None, None);
    };
    if end_fuel <= start_fuel {
        return (None, None, None);
    }
    let fuel_used_ml = (end_fuel - start_fuel) as f64;
    if distance_km < 2.0 || duration_minutes < 5 || fuel_used_ml <= 0.0 {
        return (None, None, None);
    }

    let fuel_used_liters = fuel_used_ml / 1000.0;
    let fuel_per_100km = if distance_km > 0.0 {
        Some(fuel_used_liters / (distance_km / 100.0))
    } else {
        None
    };

    (Some(fuel_used_liters), fuel_per_100km, Some(true))
}

fn gps_with_satellites(records: &[Record], from_start: bool) -> GpsPoint {
    let found = if from_start {
        records.iter().find(|r| r.gps.satellites > 0)
    } else {
        records.iter().rev().find(|r| r.gps.satellites > 0)
    };
    let fallback = if from_start { records.first() } else { records.last() };
    found.or(fallback).map(|r| r.gps.into()).unwrap_or(GpsPoint {
        latitude: 0.0,
        longitude: 0.0,
    })
}

/// Formats minutes as `"Hh Mm"`, suppressing the hours component when zero.
fn format_duration(duration_minutes: i64) -> String {
    let hours = duration_minutes / 60;
    let minutes = duration_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IoElementEntry, IoValue, Priority};
    use chrono::TimeZone;

    fn base_record(offset_secs: i64, ignition: u8, rpm: u64, odometer: u64, speed: u16) -> Record {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Record {
            imei: "864275079658715".to_string(),
            timestamp: base + chrono::Duration::seconds(offset_secs),
            priority: Priority::Low,
            gps: GpsFix {
                latitude: 44.0,
                longitude: 26.0,
                altitude: 0,
                angle: 0,
                satellites: 8,
                speed,
            },
            io_elements: vec![IoElementEntry {
                id: 16,
                name: "totalOdometer".to_string(),
                value: IoValue::Unsigned(odometer),
                size: 4,
            }],
            total_odometer: Some(odometer),
            accelerometer_x: None,
            accelerometer_y: None,
            accelerometer_z: None,
            gsm_signal: None,
            speed_io: None,
            obd_engine_load: None,
            obd_coolant_temp: None,
            obd_engine_rpm: Some(rpm),
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
            ignition: Some(ignition),
            movement: Some(if speed > 0 { 1 } else { 0 }),
            fuel_used_gps: None,
            vin: None,
        }
    }

    #[test]
    fn single_trip_segmented_from_drive_then_quiet_period() {
        let mut records = Vec::new();
        for i in 0..21 {
            let odometer = 100_000 + i as u64 * 250;
            let speed = if i < 10 { 40 + i as u16 * 4 } else { 80 - (i as u16 - 10) * 4 };
            records.push(base_record(i * 10, 1, 1500, odometer, speed));
        }
        for i in 0..15 {
            records.push(base_record(210 + i * 10, 0, 0, 105_000, 0));
        }

        let trips = segment_trips(&records);
        assert_eq!(trips.len(), 1);
        let trip = &trips[0];
        assert_eq!(trip.distance_km, 5.0);
        assert_eq!(trip.duration_minutes, 3);
        assert!(trip.max_speed >= 80.0);
        assert!(trip.distance_estimated.is_none());
    }

    #[test]
    fn short_stationary_run_emits_no_trip() {
        let records = vec![
            base_record(0, 1, 1500, 100_000, 0),
            base_record(30, 1, 1500, 100_000, 0),
            base_record(60, 1, 1500, 100_000, 0),
        ];
        let trips = segment_trips(&records);
        assert!(trips.is_empty());
    }

    #[test]
    fn trips_separated_by_at_least_60s_quiet() {
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(base_record(i * 10, 1, 1500, 100_000 + i as u64 * 200, 40));
        }
        for i in 0..10 {
            records.push(base_record(60 + i * 10, 0, 0, 101_000, 0));
        }
        for i in 0..5 {
            records.push(base_record(200 + i * 10, 1, 1500, 101_000 + i as u64 * 200, 40));
        }

        let trips = segment_trips(&records);
        assert_eq!(trips.len(), 2);
        let gap = trips[1].start_time - trips[0].end_time;
        assert!(gap.num_seconds() >= 60);
    }
}
