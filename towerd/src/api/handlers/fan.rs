//! Fan controller handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use axum::{extract::State, Json};
use cooltower_core::api::{ApiResponse, FanModeRequest, FanSetpointRequest};
use cooltower_core::{FanAutoParams, FanAutoParamsUpdate, FanStatus};
use tracing::{debug, info};

/// Current fan controller status, from the last published snapshot.
///
/// # Endpoint
///
/// `GET /api/v0/fan/status`
pub(crate) async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FanStatus>>, ApiError> {
    debug!("Request: GET /api/v0/fan/status");

    api_ok!(state.control.snapshot().fan)
}

/// Switch between manual and auto mode.
///
/// # Endpoint
///
/// `POST /api/v0/fan/mode`
///
/// # Request Body
///
/// `{"mode": "manual" | "auto"}`
pub(crate) async fn set_mode(
    State(state): State<AppState>,
    Json(request): Json<FanModeRequest>,
) -> Result<Json<ApiResponse<FanStatus>>, ApiError> {
    debug!("Request: POST /api/v0/fan/mode {:?}", request.mode);

    let status = state.control.set_fan_mode(request.mode).await?;
    info!("Fan mode set to {:?}", status.mode);

    api_ok!(status)
}

/// Set the manual fan frequency. Rejected in auto mode.
///
/// The value is clamped to the auto range maximum; zero stops the fan.
///
/// # Endpoint
///
/// `POST /api/v0/fan/setpoint`
///
/// # Request Body
///
/// `{"hz": 35.0}`
pub(crate) async fn set_setpoint(
    State(state): State<AppState>,
    Json(request): Json<FanSetpointRequest>,
) -> Result<Json<ApiResponse<FanStatus>>, ApiError> {
    debug!("Request: POST /api/v0/fan/setpoint {} Hz", request.hz);

    let status = state.control.set_fan_setpoint(request.hz).await?;

    api_ok!(status)
}

/// Update some or all of the auto-mode parameters.
///
/// # Endpoint
///
/// `POST /api/v0/fan/auto_config`
///
/// # Request Body
///
/// Any subset of `target_temp`, `hysteresis`, `min_hz`, `max_hz`, `kp`,
/// `anti_freeze_temp`. The merged set is validated before it takes effect.
pub(crate) async fn set_auto_config(
    State(state): State<AppState>,
    Json(update): Json<FanAutoParamsUpdate>,
) -> Result<Json<ApiResponse<FanAutoParams>>, ApiError> {
    debug!("Request: POST /api/v0/fan/auto_config {:?}", update);

    let params = state.control.configure_fan(update).await?;
    info!("Fan auto parameters updated: {:?}", params);

    api_ok!(params)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_status_starts_manual_and_stopped() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/v0/fan/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["mode"], "manual");
        assert_eq!(body["data"]["running"], false);
    }

    #[tokio::test]
    async fn test_manual_setpoint_runs_fan() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post("/api/v0/fan/setpoint", Some(r#"{"hz": 35.0}"#))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["running"], true);
        assert_eq!(body["data"]["commanded_hz"], 35.0);
        assert!(app.sim.is_running(3));
        assert_eq!(app.sim.setpoint_hz(3), Some(35.0));

        let (status, body) = app
            .post("/api/v0/fan/setpoint", Some(r#"{"hz": 0}"#))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["running"], false);
        assert!(!app.sim.is_running(3));
    }

    #[tokio::test]
    async fn test_setpoint_rejected_in_auto() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post("/api/v0/fan/mode", Some(r#"{"mode": "auto"}"#))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["mode"], "auto");

        let (status, body) = app
            .post("/api/v0/fan/setpoint", Some(r#"{"hz": 35.0}"#))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_invalid_mode() {
        let app = TestApp::new().await;
        let (status, _) = app
            .post("/api/v0/fan/mode", Some(r#"{"mode": "turbo"}"#))
            .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_partial_auto_config() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post("/api/v0/fan/auto_config", Some(r#"{"target_temp": 72.0}"#))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["target_temp"], 72.0);
        assert_eq!(body["data"]["hysteresis"], 5.0);

        let (status, _) = app
            .post(
                "/api/v0/fan/auto_config",
                Some(r#"{"min_hz": 50.0, "max_hz": 40.0}"#),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Rejected update left the parameters alone
        let (_, body) = app.get("/api/v0/fan/status").await;
        assert_eq!(body["data"]["auto_params"]["min_hz"], 20.0);
        assert_eq!(body["data"]["auto_params"]["target_temp"], 72.0);
    }

    #[tokio::test]
    async fn test_unacknowledged_setpoint() {
        let app = TestApp::new().await;
        app.sim.set_online(3, false);

        let (status, _) = app
            .post("/api/v0/fan/setpoint", Some(r#"{"hz": 30.0}"#))
            .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
