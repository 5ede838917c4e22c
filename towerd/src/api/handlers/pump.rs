//! Pump failover handlers
//!
//! Commands go to whichever pump the failover controller has active. With
//! failover disabled every endpoint answers 503.

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};

use axum::{
    extract::{Query, State},
    Json,
};
use cooltower_core::api::{ApiResponse, FrequencyQuery};
use cooltower_core::FailoverStatus;
use tracing::{debug, info};

/// Failover status with a live read of the active pump.
///
/// # Endpoint
///
/// `GET /api/v0/pump/status`
pub(crate) async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FailoverStatus>>, ApiError> {
    debug!("Request: GET /api/v0/pump/status");

    api_ok!(state.control.pump_status().await?)
}

/// Start the active pump.
///
/// # Endpoint
///
/// `POST /api/v0/pump/start`
pub(crate) async fn start(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FailoverStatus>>, ApiError> {
    debug!("Request: POST /api/v0/pump/start");

    let status = state.control.pump_start().await?;
    info!("Pump started ({})", status.active_role);

    api_ok!(status)
}

/// Stop the active pump.
///
/// # Endpoint
///
/// `POST /api/v0/pump/stop`
pub(crate) async fn stop(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FailoverStatus>>, ApiError> {
    debug!("Request: POST /api/v0/pump/stop");

    let status = state.control.pump_stop().await?;
    info!("Pump stopped ({})", status.active_role);

    api_ok!(status)
}

/// Force a switchover to the other pump.
///
/// A switch to backup while the primary is healthy reverts on the next
/// health check.
///
/// # Endpoint
///
/// `POST /api/v0/pump/switch`
pub(crate) async fn switch(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FailoverStatus>>, ApiError> {
    debug!("Request: POST /api/v0/pump/switch");

    let status = state.control.pump_switch().await?;
    info!("Pump switched; active role is {}", status.active_role);

    api_ok!(status)
}

/// Write the active pump's frequency.
///
/// # Endpoint
///
/// `POST /api/v0/pump/frequency?value=HZ`
pub(crate) async fn set_frequency(
    State(state): State<AppState>,
    Query(query): Query<FrequencyQuery>,
) -> Result<Json<ApiResponse<FailoverStatus>>, ApiError> {
    debug!("Request: POST /api/v0/pump/frequency?value={}", query.value);

    if !query.value.is_finite() || query.value < 0.0 {
        return api_fail!(format!("Invalid frequency: {}", query.value));
    }
    let max_hz = state.config.static_config().pump_control.max_hz;
    let hz = query.value.min(max_hz);

    api_ok!(state.control.pump_frequency(hz).await?)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_start_runs_primary() {
        let app = TestApp::new().await;

        let (status, body) = app.post("/api/v0/pump/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active_role"], "primary");
        assert_eq!(body["data"]["active_drive"], "pump_primary");
        assert!(app.sim.is_running(1));
        assert!(!app.sim.is_running(2));
    }

    #[tokio::test]
    async fn test_switch_and_status() {
        let app = TestApp::new().await;
        app.post("/api/v0/pump/start", None).await;

        let (status, body) = app.post("/api/v0/pump/switch", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active_role"], "backup");
        assert!(app.sim.is_running(2));
        assert!(!app.sim.is_running(1));

        let (status, body) = app.get("/api/v0/pump/status").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["active_drive_status"].is_object());
    }

    #[tokio::test]
    async fn test_frequency() {
        let app = TestApp::new().await;

        let (status, _) = app.post("/api/v0/pump/frequency?value=38", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.sim.setpoint_hz(1), Some(38.0));

        let (status, _) = app.post("/api/v0/pump/frequency?value=-1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unacknowledged_start() {
        let app = TestApp::new().await;
        app.sim.set_online(1, false);

        let (status, body) = app.post("/api/v0/pump/start", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
    }
}
