use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analyzer::{daily_summary, segment_trips, trips_on, DeviceStats};
use crate::model::Device;

use super::{ApiError, AppState};

fn validate_imei(imei: &str) -> Result<(), ApiError> {
    if imei.len() == 15 && imei.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ApiError::Validation("imei must be 15 digits".to_string()))
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, ApiError> {
    Ok(Json(state.store.list_devices().await?))
}

pub async fn get_device(State(state): State<AppState>, Path(imei): Path<String>) -> Result<Json<Device>, ApiError> {
    state
        .store
        .get_device(&imei)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("device {imei} not found")))
}

#[derive(Debug, Deserialize)]
pub struct CreateDeviceBody {
    pub imei: String,
    #[serde(rename = "modemType")]
    pub modem_type: Option<String>,
    #[serde(rename = "carBrand")]
    pub car_brand: Option<String>,
    #[serde(rename = "carModel")]
    pub car_model: Option<String>,
    #[serde(rename = "plateNumber")]
    pub plate_number: Option<String>,
    pub notes: Option<String>,
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(body): Json<CreateDeviceBody>,
) -> Result<(axum::http::StatusCode, Json<Device>), ApiError> {
    validate_imei(&body.imei)?;

    if state.store.get_device(&body.imei).await?.is_some() {
        return Err(ApiError::Conflict(format!("device {} already exists", body.imei)));
    }

    let mut device = Device::new(body.imei);
    if let Some(modem_type) = body.modem_type {
        device.modem_type = modem_type;
    }
    device.car_brand = body.car_brand;
    device.car_model = body.car_model;
    device.plate_number = body.plate_number;
    device.notes = body.notes;

    state.store.upsert_device(device.clone()).await?;
    Ok((axum::http::StatusCode::CREATED, Json(device)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeviceBody {
    #[serde(rename = "carBrand")]
    pub car_brand: Option<String>,
    #[serde(rename = "carModel")]
    pub car_model: Option<String>,
    #[serde(rename = "plateNumber")]
    pub plate_number: Option<String>,
    pub notes: Option<String>,
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Json(body): Json<UpdateDeviceBody>,
) -> Result<Json<Device>, ApiError> {
    let mut device = state
        .store
        .get_device(&imei)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {imei} not found")))?;

    if let Some(car_brand) = body.car_brand {
        device.car_brand = Some(car_brand);
    }
    if let Some(car_model) = body.car_model {
        device.car_model = Some(car_model);
    }
    if let Some(plate_number) = body.plate_number {
        device.plate_number = Some(plate_number);
    }
    if let Some(notes) = body.notes {
        device.notes = Some(notes);
    }
    device.updated_at = Utc::now();

    state.store.upsert_device(device.clone()).await?;
    Ok(Json(device))
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    #[serde(default = "default_true")]
    pub approved: bool,
}

fn default_true() -> bool {
    true
}

pub async fn approve_device(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<Device>, ApiError> {
    let mut device = state
        .store
        .get_device(&imei)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {imei} not found")))?;

    device.approved = body.map(|b| b.approved).unwrap_or(true);
    device.updated_at = Utc::now();

    state.store.upsert_device(device.clone()).await?;
    Ok(Json(device))
}

pub async fn delete_device(State(state): State<AppState>, Path(imei): Path<String>) -> Result<axum::http::StatusCode, ApiError> {
    if state.store.delete_device(&imei).await? {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("device {imei} not found")))
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let skip = query.skip.unwrap_or(0);
    let records = state.store.find_records(&state.device_type, &imei, limit, skip).await?;
    Ok(Json(json!(records)))
}

pub async fn latest_record(State(state): State<AppState>, Path(imei): Path<String>) -> Result<Json<Value>, ApiError> {
    state
        .store
        .find_latest(&state.device_type, &imei)
        .await?
        .map(|r| Json(json!(r)))
        .ok_or_else(|| ApiError::NotFound(format!("no records for device {imei}")))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub async fn records_range(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state
        .store
        .find_range(&state.device_type, &imei, query.from, query.to)
        .await?;
    Ok(Json(json!(records)))
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub limit: Option<usize>,
}

pub async fn raw_frames(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let frames = state.store.find_raw_frames(&state.device_type, &imei, limit).await?;
    Ok(Json(json!(frames)))
}

pub async fn device_stats(State(state): State<AppState>, Path(imei): Path<String>) -> Result<Json<DeviceStats>, ApiError> {
    let total_records = state.store.count_records(&state.device_type, &imei).await?;
    let today_start = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let today_records = state
        .store
        .find_range(&state.device_type, &imei, today_start, Utc::now())
        .await?
        .len() as u64;
    let latest = state.store.find_latest(&state.device_type, &imei).await?;

    Ok(Json(DeviceStats {
        total_records,
        today_records,
        last_position: latest.as_ref().map(|r| r.gps.into()),
        last_ignition: latest.as_ref().and_then(|r| r.ignition),
        last_speed: latest.as_ref().map(|r| r.gps.speed),
        last_timestamp: latest.map(|r| r.timestamp),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TripsQuery {
    pub limit: Option<usize>,
}

pub async fn trips(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Query(query): Query<TripsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(100);
    let records = state
        .store
        .find_records(&state.device_type, &imei, 100_000, 0)
        .await?;
    let mut ascending = records;
    ascending.reverse();

    let mut trip_list = segment_trips(&ascending);
    trip_list.reverse();
    trip_list.truncate(limit);

    Ok(Json(json!(trip_list)))
}

pub async fn daily_today(State(state): State<AppState>, Path(imei): Path<String>) -> Result<Json<Value>, ApiError> {
    daily_summary_response(state, imei, Utc::now().date_naive()).await
}

pub async fn daily_for_date(
    State(state): State<AppState>,
    Path((imei, date)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation("date must be YYYY-MM-DD".to_string()))?;
    daily_summary_response(state, imei, date).await
}

async fn daily_summary_response(state: AppState, imei: String, date: NaiveDate) -> Result<Json<Value>, ApiError> {
    let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = date.and_hms_opt(23, 59, 59).unwrap().and_utc();
    let records = state
        .store
        .find_range(&state.device_type, &imei, day_start, day_end)
        .await?;

    let trips = trips_on(&records, date);
    Ok(Json(json!(daily_summary(date, &trips))))
}

#[derive(Debug, Deserialize)]
pub struct DailyRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub async fn daily_range(
    State(state): State<AppState>,
    Path(imei): Path<String>,
    Query(query): Query<DailyRangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let from_start = query.from.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let to_end = query.to.and_hms_opt(23, 59, 59).unwrap().and_utc();
    let records = state
        .store
        .find_range(&state.device_type, &imei, from_start, to_end)
        .await?;

    let mut summaries = Vec::new();
    let mut date = query.from;
    while date <= query.to {
        let trips = trips_on(&records, date);
        summaries.push(daily_summary(date, &trips));
        date = date.succ_opt().expect("date within representable range");
    }

    Ok(Json(json!(summaries)))
}
