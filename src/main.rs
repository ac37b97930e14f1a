//! Process entry point: binds the TCP listener that accepts Teltonika
//! device connections and the HTTP listener that serves the read-only API,
//! and runs both to completion side by side.

use std::sync::Arc;

use log::{error, info, warn};
use teltonika_ingestion_gateway::config::Config;
use teltonika_ingestion_gateway::http::{build_router, AppState};
use teltonika_ingestion_gateway::session::{handle_connection, SessionMap};
use teltonika_ingestion_gateway::store::{DegradedStore, MongoStore, Store};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("starting teltonika ingestion gateway");

    let config = Config::from_env();

    let store: Arc<dyn Store> = match MongoStore::connect(&config.mongo_uri).await {
        Ok(store) => {
            if let Err(err) = store.ensure_indexes(teltonika_ingestion_gateway::model::Device::DEFAULT_MODEM_TYPE).await {
                warn!("failed to ensure indexes, continuing anyway: {err}");
            }
            Arc::new(store)
        }
        Err(err) => {
            // The TCP core must keep running without a healthy store.
            // Accept-and-log only until an operator fixes connectivity.
            error!("store unreachable at startup, running in degraded mode: {err}");
            Arc::new(DegradedStore::new(err.to_string()))
        }
    };

    let tcp_task = tokio::spawn(run_tcp_acceptor(config.clone(), store.clone()));
    let http_task = tokio::spawn(run_http_server(config.clone(), store));

    let (tcp_result, http_result) = tokio::join!(tcp_task, http_task);
    if let Err(err) = tcp_result {
        error!("TCP acceptor task panicked: {err}");
    }
    if let Err(err) = http_result {
        error!("HTTP server task panicked: {err}");
        std::process::exit(1);
    }
}

/// Accepts device connections for the lifetime of the process. One task per
/// connection; bind failure here is fatal.
async fn run_tcp_acceptor(config: Config, store: Arc<dyn Store>) {
    let address = format!("0.0.0.0:{}", config.tcp_port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind TCP listener on {address}: {err}");
            std::process::exit(1);
        }
    };
    info!("TCP listener on {address}");

    let session_map = SessionMap::new();

    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("failed to accept TCP connection: {err}");
                continue;
            }
        };

        let store = store.clone();
        let session_map = session_map.clone();
        let logs_dir = config.logs_dir.clone();
        tokio::spawn(async move {
            handle_connection(socket, remote, store, session_map, logs_dir).await;
        });
    }
}

/// Serves the read-only HTTP API. Bind failure is fatal: there is no
/// degraded mode for a surface with nothing else to do.
async fn run_http_server(config: Config, store: Arc<dyn Store>) {
    let state = AppState {
        store,
        api_key: Arc::from(config.api_key.as_str()),
        device_type: Arc::from(teltonika_ingestion_gateway::model::Device::DEFAULT_MODEM_TYPE),
    };
    let app = build_router(state);

    let address = format!("0.0.0.0:{}", config.api_port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind HTTP listener on {address}: {err}");
            std::process::exit(1);
        }
    };
    info!("HTTP API on {address}");

    if let Err(err) = axum::serve(listener, app).await {
        error!("HTTP server exited with error: {err}");
        std::process::exit(1);
    }
}
