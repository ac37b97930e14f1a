//! Trip segmentation and driver-behavior scoring.
//!
//! Both passes are pure functions over a chronologically ascending slice of
//! [`Record`](crate::model::Record); nothing here touches the store or the
//! network, so the whole module is exercised by plain `#[test]`s.

pub mod behavior;
pub mod trip;

pub use behavior::{Confidence, DriverBehavior};
pub use trip::{segment_trips, trip_metrics, GpsPoint, Trip};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::model::Record;

/// Aggregated totals for one calendar day, assembled from that day's trips.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    #[serde(rename = "tripCount")]
    pub trip_count: usize,
    #[serde(rename = "totalDistanceKm")]
    pub total_distance_km: f64,
    #[serde(rename = "totalDurationMinutes")]
    pub total_duration_minutes: i64,
    #[serde(rename = "maxSpeed")]
    pub max_speed: f64,
    #[serde(rename = "fuelUsedLiters", skip_serializing_if = "Option::is_none")]
    pub fuel_used_liters: Option<f64>,
    #[serde(rename = "avgDriverScore", skip_serializing_if = "Option::is_none")]
    pub avg_driver_score: Option<f64>,
    #[serde(rename = "avgEfficiencyScore", skip_serializing_if = "Option::is_none")]
    pub avg_efficiency_score: Option<f64>,
    #[serde(rename = "hardBraking")]
    pub hard_braking: u32,
    #[serde(rename = "hardAcceleration")]
    pub hard_acceleration: u32,
    #[serde(rename = "harshCornering")]
    pub harsh_cornering: u32,
    #[serde(rename = "perfectTrips")]
    pub perfect_trips: usize,
}

/// Segments `records` into trips and keeps only those whose start falls on `date` (UTC).
pub fn trips_on(records: &[Record], date: NaiveDate) -> Vec<Trip> {
    segment_trips(records)
        .into_iter()
        .filter(|t| t.start_time.date_naive() == date)
        .collect()
}

/// Builds the `/daily` aggregate for one date from that day's trips.
pub fn daily_summary(date: NaiveDate, trips: &[Trip]) -> DailySummary {
    let trip_count = trips.len();
    let total_distance_km: f64 = trips.iter().map(|t| t.distance_km).sum();
    let total_duration_minutes: i64 = trips.iter().map(|t| t.duration_minutes).sum();
    let max_speed = trips.iter().map(|t| t.max_speed).fold(0.0_f64, f64::max);

    let fuel_values: Vec<f64> = trips.iter().filter_map(|t| t.fuel_used_liters).collect();
    let fuel_used_liters = if fuel_values.is_empty() {
        None
    } else {
        Some(fuel_values.iter().sum())
    };

    let behaviors: Vec<&DriverBehavior> = trips.iter().filter_map(|t| t.driver_behavior.as_ref()).collect();
    let avg_driver_score = average(behaviors.iter().map(|b| b.driver_score as f64));
    let avg_efficiency_score = average(behaviors.iter().map(|b| b.efficiency_score as f64));
    let hard_braking = behaviors.iter().map(|b| b.hard_braking).sum();
    let hard_acceleration = behaviors.iter().map(|b| b.hard_acceleration).sum();
    let harsh_cornering = behaviors.iter().map(|b| b.harsh_cornering).sum();
    let perfect_trips = behaviors.iter().filter(|b| b.perfect_trip).count();

    DailySummary {
        date,
        trip_count,
        total_distance_km,
        total_duration_minutes,
        max_speed,
        fuel_used_liters,
        avg_driver_score,
        avg_efficiency_score,
        hard_braking,
        hard_acceleration,
        harsh_cornering,
        perfect_trips,
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Totals used by `/devices/:imei/stats`: record count, today's count, and
/// the most recent fix's position/ignition/speed.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    #[serde(rename = "totalRecords")]
    pub total_records: u64,
    #[serde(rename = "todayRecords")]
    pub today_records: u64,
    #[serde(rename = "lastPosition", skip_serializing_if = "Option::is_none")]
    pub last_position: Option<GpsPoint>,
    #[serde(rename = "lastIgnition", skip_serializing_if = "Option::is_none")]
    pub last_ignition: Option<u8>,
    #[serde(rename = "lastSpeed", skip_serializing_if = "Option::is_none")]
    pub last_speed: Option<u16>,
    #[serde(rename = "lastTimestamp", skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GpsFix, IoElementEntry, IoValue, Priority};
    use chrono::TimeZone;

    fn record_at(hour: u32, odometer: u64, rpm: u64) -> Record {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
        Record {
            imei: "864275079658715".to_string(),
            timestamp: ts,
            priority: Priority::Low,
            gps: GpsFix {
                latitude: 1.0,
                longitude: 2.0,
                altitude: 0,
                angle: 0,
                satellites: 8,
                speed: 50,
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
            ignition: Some(if rpm > 0 { 1 } else { 0 }),
            movement: Some(if rpm > 0 { 1 } else { 0 }),
            fuel_used_gps: None,
            vin: None,
        }
    }

    #[test]
    fn daily_summary_aggregates_across_trips_on_the_same_date() {
        let mut records = Vec::new();
        for h in 8..9 {
            for m in 0..10 {
                records.push(mutate_minute(record_at(h, 100_000 + m as u64 * 300, 1500), m));
            }
        }
        for h in 18..19 {
            for m in 0..10 {
                records.push(mutate_minute(record_at(h, 200_000 + m as u64 * 300, 1500), m));
            }
        }

        let date = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().date_naive();
        let trips = trips_on(&records, date);
        assert_eq!(trips.len(), 2);

        let summary = daily_summary(date, &trips);
        assert_eq!(summary.trip_count, 2);
        assert!(summary.total_distance_km > 0.0);
    }

    fn mutate_minute(mut record: Record, minute_offset: i64) -> Record {
        record.timestamp += chrono::Duration::minutes(minute_offset);
        record
    }
}
