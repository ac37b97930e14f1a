//! Read-only HTTP API built with `axum` + `tower-http::cors`, wired the
//! way the `regatta-backend` example wires its own router.

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::store::Store;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub api_key: Arc<str>,
    pub device_type: Arc<str>,
}

async fn require_api_key(State(state): State<AppState>, request: Request<axum::body::Body>, next: Next) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided != state.api_key.as_ref() {
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}

/// Builds the full router: `/health` is open, everything else requires
/// `X-API-Key`.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/devices", get(handlers::list_devices).post(handlers::create_device))
        .route(
            "/devices/:imei",
            get(handlers::get_device).put(handlers::update_device).delete(handlers::delete_device),
        )
        .route("/devices/:imei/approve", patch(handlers::approve_device))
        .route("/devices/:imei/records", get(handlers::list_records))
        .route("/devices/:imei/latest", get(handlers::latest_record))
        .route("/devices/:imei/records/range", get(handlers::records_range))
        .route("/devices/:imei/raw", get(handlers::raw_frames))
        .route("/devices/:imei/stats", get(handlers::device_stats))
        .route("/devices/:imei/trips", get(handlers::trips))
        .route("/devices/:imei/daily", get(handlers::daily_today))
        .route("/devices/:imei/daily/:date", get(handlers::daily_for_date))
        .route("/devices/:imei/daily-range", get(handlers::daily_range))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
