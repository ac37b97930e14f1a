//! Driver-behavior scoring from noisy accelerometer samples.

use chrono::{DateTime, Utc};

use crate::model::Record;

const BRAKE_COOLDOWN_MS: i64 = 2000;
const ACCEL_COOLDOWN_MS: i64 = 2000;
const CORNER_COOLDOWN_MS: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriverBehavior {
    #[serde(rename = "driverScore")]
    pub driver_score: u8,
    #[serde(rename = "efficiencyScore")]
    pub efficiency_score: u8,
    #[serde(rename = "hardBraking")]
    pub hard_braking: u32,
    #[serde(rename = "hardAcceleration")]
    pub hard_acceleration: u32,
    #[serde(rename = "harshCornering")]
    pub harsh_cornering: u32,
    #[serde(rename = "idleMinutes")]
    pub idle_minutes: f64,
    pub confidence: Confidence,
    #[serde(rename = "confidenceReasons")]
    pub confidence_reasons: Vec<String>,
    #[serde(rename = "perfectTrip")]
    pub perfect_trip: bool,
}

fn effective_speed(record: &Record) -> f64 {
    match record.obd_vehicle_speed {
        Some(v) if v > 0 => v as f64,
        _ => record.gps.speed as f64,
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// 3-sample sliding median; endpoints pass through unchanged.
fn sliding_median_3(series: &[f64]) -> Vec<f64> {
    if series.len() < 3 {
        return series.to_vec();
    }
    let mut out = series.to_vec();
    for i in 1..series.len() - 1 {
        out[i] = median(&[series[i - 1], series[i], series[i + 1]]);
    }
    out
}

struct AccelSample<'a> {
    record: &'a Record,
    x: f64,
    y: f64,
}

/// Computes the driver-behavior score for one trip's chronological records.
///
/// Returns `None` when fewer than 5 records carry both accelerometer axes,
/// too few samples to separate signal from noise.
pub fn driver_behavior_score(
    records: &[Record],
    trip_duration_minutes: f64,
    distance_estimated: bool,
) -> Option<DriverBehavior> {
    let accel_samples: Vec<AccelSample> = records
        .iter()
        .filter_map(|r| match (r.accelerometer_x, r.accelerometer_y) {
            (Some(x), Some(y)) => Some(AccelSample {
                record: r,
                x: x as f64,
                y: y as f64,
            }),
            _ => None,
        })
        .collect();

    if accel_samples.len() < 5 {
        return None;
    }

    let baseline = estimate_baseline(&accel_samples);

    let raw_x: Vec<f64> = accel_samples.iter().map(|s| s.x - baseline.0).collect();
    let raw_y: Vec<f64> = accel_samples.iter().map(|s| s.y - baseline.1).collect();
    let filtered_x = sliding_median_3(&raw_x);
    let filtered_y = sliding_median_3(&raw_y);

    let mut hard_braking = 0u32;
    let mut hard_acceleration = 0u32;
    let mut harsh_cornering = 0u32;
    let mut last_brake: Option<DateTime<Utc>> = None;
    let mut last_accel: Option<DateTime<Utc>> = None;
    let mut last_corner: Option<DateTime<Utc>> = None;

    for (i, sample) in accel_samples.iter().enumerate() {
        let speed = effective_speed(sample.record);
        if speed < 10.0 {
            continue;
        }
        let ts = sample.record.timestamp;
        let fx = filtered_x[i];
        let fy = filtered_y[i];

        if fx < -150.0 && cooldown_elapsed(last_brake, ts, BRAKE_COOLDOWN_MS) {
            hard_braking += 1;
            last_brake = Some(ts);
        }
        if fx > 200.0 && cooldown_elapsed(last_accel, ts, ACCEL_COOLDOWN_MS) {
            hard_acceleration += 1;
            last_accel = Some(ts);
        }
        if fy.abs() > 150.0 && speed >= 20.0 && cooldown_elapsed(last_corner, ts, CORNER_COOLDOWN_MS) {
            harsh_cornering += 1;
            last_corner = Some(ts);
        }
    }

    let idle_minutes = idle_minutes(records);

    let brake_penalty = (hard_braking * 4).min(25);
    let accel_penalty = (hard_acceleration * 2).min(20);
    let corner_penalty = (harsh_cornering * 3).min(15);
    let total_raw = (brake_penalty + accel_penalty + corner_penalty) as f64;

    let duration_factor = (trip_duration_minutes / 10.0).clamp(1.0, 6.0);
    let severe_events = hard_braking + harsh_cornering;
    let normalized = (total_raw / duration_factor).max(if severe_events > 0 { 3.0 } else { 0.0 });
    let mut driver_score = (100.0 - normalized).round().clamp(0.0, 100.0) as i32;

    let idle_penalty = ((idle_minutes / 5.0).floor() as i32 * 2).min(30);
    let efficiency_score = (100 - idle_penalty).clamp(0, 100) as u8;

    let mean_satellites = {
        let gps_bearing: Vec<u8> = records.iter().map(|r| r.gps.satellites).filter(|&s| s > 0).collect();
        if gps_bearing.is_empty() {
            0.0
        } else {
            gps_bearing.iter().map(|&s| s as f64).sum::<f64>() / gps_bearing.len() as f64
        }
    };
    let accel_coverage = accel_samples.len() as f64 / records.len() as f64;

    let mut reasons = Vec::new();
    let mut score_affecting = 0;
    if mean_satellites < 3.0 {
        reasons.push("poor_gnss".to_string());
        score_affecting += 1;
    }
    if accel_coverage < 0.3 {
        reasons.push("low_accel_coverage".to_string());
        score_affecting += 1;
    }
    if trip_duration_minutes < 5.0 {
        reasons.push("short_trip".to_string());
    }
    if distance_estimated {
        reasons.push("distance_estimated".to_string());
        score_affecting += 1;
    }

    let confidence = match score_affecting {
        0 => Confidence::High,
        1 => Confidence::Medium,
        _ => Confidence::Low,
    };
    if confidence == Confidence::Low {
        driver_score = driver_score.min(95);
    }

    let perfect_trip = total_raw == 0.0 && confidence == Confidence::High && trip_duration_minutes >= 5.0;

    Some(DriverBehavior {
        driver_score: driver_score as u8,
        efficiency_score,
        hard_braking,
        hard_acceleration,
        harsh_cornering,
        idle_minutes,
        confidence,
        confidence_reasons: reasons,
        perfect_trip,
    })
}

fn cooldown_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown_ms: i64) -> bool {
    match last {
        None => true,
        Some(last) => (now - last).num_milliseconds() > cooldown_ms,
    }
}

/// Median of stationary (speed<3) accel samples when there are at least 3;
/// otherwise the average of the first five accel-bearing samples.
fn estimate_baseline(samples: &[AccelSample]) -> (f64, f64) {
    let stationary: Vec<&AccelSample> = samples.iter().filter(|s| effective_speed(s.record) < 3.0).collect();

    if stationary.len() >= 3 {
        let xs: Vec<f64> = stationary.iter().map(|s| s.x).collect();
        let ys: Vec<f64> = stationary.iter().map(|s| s.y).collect();
        (median(&xs), median(&ys))
    } else {
        let first_five = &samples[..samples.len().min(5)];
        let x_avg = first_five.iter().map(|s| s.x).sum::<f64>() / first_five.len() as f64;
        let y_avg = first_five.iter().map(|s| s.y).sum::<f64>() / first_five.len() as f64;
        (x_avg, y_avg)
    }
}

/// Accumulates idle minutes: ignition on, speed<3, movement==0, clamping
/// each inter-sample delta to [1s, 60s] against clock drift.
fn idle_minutes(records: &[Record]) -> f64 {
    let mut total_seconds = 0.0;
    let mut previous_idle_ts: Option<DateTime<Utc>> = None;

    for record in records {
        let is_idle = record.ignition == Some(1) && effective_speed(record) < 3.0 && record.movement == Some(0);
        if is_idle {
            if let Some(prev) = previous_idle_ts {
                let delta = (record.timestamp - prev).num_milliseconds() as f64 / 1000.0;
                total_seconds += delta.clamp(1.0, 60.0);
            }
            previous_idle_ts = Some(record.timestamp);
        } else {
            previous_idle_ts = None;
        }
    }

    total_seconds / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_record(ts_offset_secs: i64, speed: u16, accel_x: i16) -> Record {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Record {
            imei: "123".to_string(),
            timestamp: base + chrono::Duration::seconds(ts_offset_secs),
            priority: crate::model::Priority::Low,
            gps: crate::model::GpsFix {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0,
                angle: 0,
                satellites: 6,
                speed,
            },
            io_elements: vec![],
            total_odometer: None,
            accelerometer_x: Some(accel_x),
            accelerometer_y: Some(0),
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
            ignition: Some(1),
            movement: Some(1),
            fuel_used_gps: None,
            vin: None,
        }
    }

    #[test]
    fn fewer_than_five_accel_samples_returns_none() {
        let records: Vec<Record> = (0..3).map(|i| make_record(i, 40, 0)).collect();
        assert!(driver_behavior_score(&records, 10.0, false).is_none());
    }

    #[test]
    fn harsh_braking_cluster_counts_once_under_cooldown() {
        // 60 records at 1s spacing, speed 40, accel X flat at 0 except a
        // 3-sample cluster at -400 mG.
        let mut records: Vec<Record> = Vec::new();
        for i in 0..60 {
            let accel = if (20..23).contains(&i) { -400 } else { 0 };
            records.push(make_record(i, 40, accel));
        }

        let behavior = driver_behavior_score(&records, 1.0, false).expect("enough accel samples");
        assert_eq!(behavior.hard_braking, 1, "cooldown should suppress repeats within 2s");
        assert!(behavior.driver_score <= 96);
        assert_eq!(behavior.confidence, Confidence::High);
    }

    #[test]
    fn score_and_efficiency_are_bounded() {
        let records: Vec<Record> = (0..30).map(|i| make_record(i, 60, if i == 10 { 600 } else { 0 })).collect();
        let behavior = driver_behavior_score(&records, 5.0, false).unwrap();
        assert!(behavior.driver_score <= 100);
        assert!(behavior.efficiency_score <= 100);
    }

    #[test]
    fn no_fix_padding_records_do_not_trigger_poor_gnss() {
        // 20 good-fix records (8 satellites) plus 10 no-fix padding records
        // (0 satellites) interleaved in. Averaging over all records would
        // pull the mean under 3 and wrongly flag poor_gnss; averaging over
        // GPS-bearing records only should not.
        let mut records: Vec<Record> = (0..20).map(|i| make_record(i, 40, 0)).collect();
        for r in &mut records {
            r.gps.satellites = 8;
        }
        for i in 20..30 {
            let mut r = make_record(i, 40, 0);
            r.gps.satellites = 0;
            records.push(r);
        }

        let behavior = driver_behavior_score(&records, 10.0, false).unwrap();
        assert!(
            !behavior.confidence_reasons.contains(&"poor_gnss".to_string()),
            "no-fix padding records should not count toward the satellite average"
        );
    }
}
