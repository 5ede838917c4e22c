//! Direct drive handlers
//!
//! These bypass the controllers and talk to a named drive through the
//! registry. A command that reaches the bus but is not acknowledged answers
//! 503 and counts against the drive's error tally.

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use cooltower_core::api::{
    ApiResponse, CommandResponse, DriveListResponse, DriveStatusResponse, FrequencyQuery,
    StatusQuery,
};
use tracing::{debug, info};

/// List registered drives with their health.
///
/// # Endpoint
///
/// `GET /api/v0/drives`
pub(crate) async fn list_drives(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DriveListResponse>>, ApiError> {
    debug!("Request: GET /api/v0/drives");

    let max_errors = state.config.static_config().failover.max_errors;
    let drives = state.registry.summaries(max_errors).await;

    api_ok!(DriveListResponse { drives })
}

/// Live status of one drive.
///
/// An unreachable drive still answers 200: its status is served from the
/// cache marked stale, or as `NoComm`. With `live=true` either case answers
/// 503 instead.
///
/// # Endpoint
///
/// `GET /api/v0/drive/:name/status[?live=true]`
pub(crate) async fn drive_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ApiResponse<DriveStatusResponse>>, ApiError> {
    debug!(
        "Request: GET /api/v0/drive/{}/status?live={}",
        name, query.live
    );

    let drive = state.registry.get_or_err(&name).await?;
    let status = drive.get_status().await?;
    if query.live {
        status.ensure_live(&name)?;
    }

    api_ok!(DriveStatusResponse { name, status })
}

/// Start a drive.
///
/// # Endpoint
///
/// `POST /api/v0/drive/:name/start`
pub(crate) async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<CommandResponse>>, ApiError> {
    debug!("Request: POST /api/v0/drive/{}/start", name);

    let drive = state.registry.get_or_err(&name).await?;
    if !drive.start().await? {
        return Err(not_acknowledged(&name, "start"));
    }
    info!("Drive '{}' started", name);

    api_ok!(CommandResponse {
        target: name,
        command: "start".to_string(),
        hz: None,
    })
}

/// Stop a drive.
///
/// # Endpoint
///
/// `POST /api/v0/drive/:name/stop`
pub(crate) async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<CommandResponse>>, ApiError> {
    debug!("Request: POST /api/v0/drive/{}/stop", name);

    let drive = state.registry.get_or_err(&name).await?;
    if !drive.stop().await? {
        return Err(not_acknowledged(&name, "stop"));
    }
    info!("Drive '{}' stopped", name);

    api_ok!(CommandResponse {
        target: name,
        command: "stop".to_string(),
        hz: None,
    })
}

/// Clear a latched drive fault.
///
/// # Endpoint
///
/// `POST /api/v0/drive/:name/reset_fault`
pub(crate) async fn reset_fault(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<CommandResponse>>, ApiError> {
    debug!("Request: POST /api/v0/drive/{}/reset_fault", name);

    let drive = state.registry.get_or_err(&name).await?;
    if !drive.reset_fault().await? {
        return Err(not_acknowledged(&name, "fault reset"));
    }
    info!("Drive '{}' fault reset", name);

    api_ok!(CommandResponse {
        target: name,
        command: "reset_fault".to_string(),
        hz: None,
    })
}

/// Write a frequency setpoint.
///
/// The value is clamped to `[0, max_hz]` for the drive; the response reports
/// the frequency actually written.
///
/// # Endpoint
///
/// `POST /api/v0/drive/:name/frequency?value=HZ`
pub(crate) async fn set_frequency(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FrequencyQuery>,
) -> Result<Json<ApiResponse<CommandResponse>>, ApiError> {
    debug!(
        "Request: POST /api/v0/drive/{}/frequency?value={}",
        name, query.value
    );

    if !query.value.is_finite() {
        return api_fail!(format!("Invalid frequency: {}", query.value));
    }

    let drive = state.registry.get_or_err(&name).await?;
    let max_hz = state
        .config
        .static_config()
        .drive(&name)
        .map(|d| d.max_hz)
        .unwrap_or_else(|| drive.handle().model.max_frequency_hz());
    let hz = query.value.clamp(0.0, max_hz);

    if !drive.set_frequency(hz).await? {
        return Err(not_acknowledged(&name, "set frequency"));
    }
    info!("Drive '{}' frequency set to {:.2} Hz", name, hz);

    api_ok!(CommandResponse {
        target: name,
        command: "frequency".to_string(),
        hz: Some(hz),
    })
}

fn not_acknowledged(name: &str, command: &str) -> ApiError {
    ApiError::service_unavailable(format!("Drive '{}' did not acknowledge {}", name, command))
}
