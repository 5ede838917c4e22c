//! System status handler

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use axum::{extract::State, Json};
use cooltower_core::api::{ApiResponse, SystemStatusResponse};
use cooltower_core::unix_millis;
use tracing::debug;

/// Full supervisor snapshot.
///
/// Assembled from published state only: the latest sensor reading, the
/// background poller's drive statuses and the control loop's snapshot. No
/// bus traffic.
///
/// # Endpoint
///
/// `GET /api/v0/status`
pub(crate) async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SystemStatusResponse>>, ApiError> {
    debug!("Request: GET /api/v0/status");

    let control = state.control.snapshot();
    let drives = state.drive_status.borrow().clone();
    let sensors = *state.sensors.borrow();

    api_ok!(SystemStatusResponse {
        sensors,
        drives,
        pump: control.pump,
        fan: control.fan,
        pump_command_hz: control.pump_command_hz,
        timestamp_ms: unix_millis(),
    })
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_snapshot() {
        let app = TestApp::new().await;
        app.post(
            "/api/v0/sensors",
            Some(r#"{"pressure_psi": 15.0, "basin_temp_f": 70.0}"#),
        )
        .await;

        let mut polled = app.state.drive_status.clone();
        tokio::time::timeout(Duration::from_secs(2), polled.wait_for(|s| s.len() == 3))
            .await
            .unwrap()
            .unwrap();

        let (status, body) = app.get("/api/v0/status").await;
        assert_eq!(status, StatusCode::OK);

        let data = &body["data"];
        assert_eq!(data["sensors"]["pressure_psi"], 15.0);
        assert_eq!(data["fan"]["mode"], "manual");
        assert_eq!(data["pump"]["active_role"], "primary");
        assert!(data["drives"]["fan"].is_object());
        assert!(data["timestamp_ms"].as_u64().unwrap() > 0);
    }
}
