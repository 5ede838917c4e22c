//! Sensor intake handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};

use axum::{extract::State, Json};
use cooltower_core::api::{ApiResponse, SensorUpdateRequest};
use cooltower_core::SensorReading;
use tracing::debug;

/// Latest sensor reading, `null` before the first one arrives.
///
/// # Endpoint
///
/// `GET /api/v0/sensors`
pub(crate) async fn get_reading(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Option<SensorReading>>>, ApiError> {
    debug!("Request: GET /api/v0/sensors");

    api_ok!(*state.sensors.borrow())
}

/// Push a reading from the external sensor reader.
///
/// The reading is stamped on arrival; the control loop picks it up on its
/// next tick.
///
/// # Endpoint
///
/// `POST /api/v0/sensors`
///
/// # Request Body
///
/// `{"pressure_psi": 14.2, "basin_temp_f": 78.5}`
pub(crate) async fn post_reading(
    State(state): State<AppState>,
    Json(request): Json<SensorUpdateRequest>,
) -> Result<Json<ApiResponse<SensorReading>>, ApiError> {
    debug!(
        "Request: POST /api/v0/sensors {:.2} psi, {:.2}°F",
        request.pressure_psi, request.basin_temp_f
    );

    if !request.pressure_psi.is_finite() || !request.basin_temp_f.is_finite() {
        return api_fail!("Sensor values must be finite numbers");
    }

    let reading = SensorReading::new(request.pressure_psi, request.basin_temp_f);
    state.sensors.send_replace(Some(reading));

    api_ok!(reading)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_no_reading_yet() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/v0/sensors").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_post_then_get() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post(
                "/api/v0/sensors",
                Some(r#"{"pressure_psi": 14.5, "basin_temp_f": 79.0}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["captured_at_ms"].as_u64().unwrap() > 0);

        let (_, body) = app.get("/api/v0/sensors").await;
        assert_eq!(body["data"]["pressure_psi"], 14.5);
        assert_eq!(body["data"]["basin_temp_f"], 79.0);
    }

    #[tokio::test]
    async fn test_malformed_reading() {
        let app = TestApp::new().await;
        let (status, _) = app
            .post("/api/v0/sensors", Some(r#"{"pressure_psi": 14.5}"#))
            .await;
        assert!(status.is_client_error());
    }
}
