//! Info handlers for system information and root endpoint

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use axum::{extract::State, Json};
use cooltower_core::api::{ApiResponse, DriveInfo, HealthResponse, InfoResponse, SerialInfo};
use serde_json::{json, Value};
use tracing::debug;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Handle the root endpoint.
///
/// # Endpoint
///
/// `GET /`
pub(crate) async fn root() -> Result<Json<ApiResponse<Value>>, ApiError> {
    debug!("Request: GET /");

    let data = json!({
        "service": "Cooling Tower Supervisor API",
        "version": VERSION,
        "status": "ok"
    });

    api_ok!(data)
}

/// Liveness probe. Never touches the bus.
///
/// # Endpoint
///
/// `GET /api/v0/health`
pub(crate) async fn health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<HealthResponse>>, ApiError> {
    debug!("Request: GET /api/v0/health");

    api_ok!(HealthResponse {
        status: "ok".to_string(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

/// Retrieve system information.
///
/// Reports the serial line settings and every configured drive with its
/// register map, from configuration only.
///
/// # Endpoint
///
/// `GET /api/v0/info`
pub(crate) async fn get_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<InfoResponse>>, ApiError> {
    debug!("Request: GET /api/v0/info");

    let cfg = state.config.static_config();
    let serial = &cfg.serial;

    let drives = cfg
        .drives
        .iter()
        .map(|d| DriveInfo {
            name: d.name.clone(),
            device_id: d.device_id,
            description: d.description.clone(),
            max_hz: d.max_hz,
            model: d.model.to_model_info(),
        })
        .collect();

    api_ok!(InfoResponse {
        version: VERSION.to_string(),
        software: format!("towerd v{}", VERSION),
        mock: state.mock,
        uptime: state.start_time.elapsed().as_secs(),
        serial: SerialInfo {
            port: serial.port.clone(),
            baud_rate: serial.baud_rate,
            parity: serial.parity,
            data_bits: serial.data_bits,
            stop_bits: serial.stop_bits,
            process_lock: serial.process_lock,
        },
        drives,
    })
}
