//! API module for the CoolTower supervisor
//!
//! Contains the REST API implementation with Axum router and handlers.

pub(crate) mod handlers;

use crate::config::RuntimeConfig;
use crate::sensors::SensorSender;
use crate::supervisor::SupervisorHandle;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use cooltower_core::DriveStatus;
use cooltower_hardware::DriveRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    /// Configuration, with command-line overrides applied
    pub config: Arc<RuntimeConfig>,
    /// Drives on the bus, for direct commands and live reads
    pub registry: Arc<DriveRegistry>,
    /// Control loop owning the fan and pump controllers
    pub control: SupervisorHandle,
    /// Latest sensor reading
    pub sensors: SensorSender,
    /// Statuses from the background poller
    pub drive_status: watch::Receiver<BTreeMap<String, DriveStatus>>,
    pub mock: bool,
    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<RuntimeConfig>,
        registry: Arc<DriveRegistry>,
        control: SupervisorHandle,
        sensors: SensorSender,
        drive_status: watch::Receiver<BTreeMap<String, DriveStatus>>,
        mock: bool,
    ) -> Self {
        Self {
            config,
            registry,
            control,
            sensors,
            drive_status,
            mock,
            start_time: Instant::now(),
        }
    }
}

/// Create the main API router with all endpoints
pub(crate) fn create_router(state: AppState) -> Router {
    info!("Setting up API router...");

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024));

    Router::new()
        // System endpoints
        .route("/", get(handlers::info::root))
        .route("/api/v0/health", get(handlers::info::health))
        .route("/api/v0/info", get(handlers::info::get_info))
        .route("/api/v0/status", get(handlers::status::get_status))
        // Direct drive endpoints
        .route("/api/v0/drives", get(handlers::drives::list_drives))
        .route(
            "/api/v0/drive/:name/status",
            get(handlers::drives::drive_status),
        )
        .route("/api/v0/drive/:name/start", post(handlers::drives::start))
        .route("/api/v0/drive/:name/stop", post(handlers::drives::stop))
        .route(
            "/api/v0/drive/:name/reset_fault",
            post(handlers::drives::reset_fault),
        )
        .route(
            "/api/v0/drive/:name/frequency",
            post(handlers::drives::set_frequency),
        )
        // Fan controller endpoints
        .route("/api/v0/fan/status", get(handlers::fan::get_status))
        .route("/api/v0/fan/mode", post(handlers::fan::set_mode))
        .route("/api/v0/fan/setpoint", post(handlers::fan::set_setpoint))
        .route(
            "/api/v0/fan/auto_config",
            post(handlers::fan::set_auto_config),
        )
        // Pump failover endpoints
        .route("/api/v0/pump/status", get(handlers::pump::get_status))
        .route("/api/v0/pump/start", post(handlers::pump::start))
        .route("/api/v0/pump/stop", post(handlers::pump::stop))
        .route("/api/v0/pump/switch", post(handlers::pump::switch))
        .route(
            "/api/v0/pump/frequency",
            post(handlers::pump::set_frequency),
        )
        // Sensor intake
        .route(
            "/api/v0/sensors",
            get(handlers::sensors::get_reading).post(handlers::sensors::post_reading),
        )
        .layer(middleware_stack)
        .with_state(state)
}

/// Error handling utilities
pub(crate) mod error {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use cooltower_core::{api::ApiResponse, CoolTowerError};

    use tracing::error;

    /// Custom error type for API responses
    #[derive(Debug)]
    pub struct ApiError {
        pub status_code: StatusCode,
        pub message: String,
    }

    impl ApiError {
        /// Create a new API error
        pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
            Self {
                status_code,
                message: message.into(),
            }
        }

        /// Create a bad request error
        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::new(StatusCode::BAD_REQUEST, message)
        }

        pub fn not_found(message: impl Into<String>) -> Self {
            Self::new(StatusCode::NOT_FOUND, message)
        }

        /// Create an internal server error
        pub fn internal_error(message: impl Into<String>) -> Self {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }

        /// Create a service unavailable error (bus or drive issues)
        pub fn service_unavailable(message: impl Into<String>) -> Self {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            error!("API Error {}: {}", self.status_code, self.message);

            let response: ApiResponse<()> = ApiResponse::error(self.message);

            (self.status_code, Json(response)).into_response()
        }
    }

    impl From<CoolTowerError> for ApiError {
        fn from(err: CoolTowerError) -> Self {
            match err {
                CoolTowerError::InvalidInput(msg) => Self::bad_request(msg),
                CoolTowerError::DriveNotFound(name) => {
                    Self::not_found(format!("Drive not found: {}", name))
                }
                CoolTowerError::BusBusy { .. }
                | CoolTowerError::Transport(_)
                | CoolTowerError::Timeout(_)
                | CoolTowerError::Frame(_)
                | CoolTowerError::ProtocolException { .. }
                | CoolTowerError::StaleData { .. }
                | CoolTowerError::CommLost(_)
                | CoolTowerError::Unavailable(_) => Self::service_unavailable(err.to_string()),
                _ => Self::internal_error(err.to_string()),
            }
        }
    }

}

/// Helper macros for common responses
#[macro_export]
macro_rules! api_ok {
    ($data:expr) => {
        Ok(axum::Json(cooltower_core::api::ApiResponse::success($data)))
    };
}

#[macro_export]
macro_rules! api_fail {
    ($message:expr) => {
        Err($crate::api::error::ApiError::bad_request($message))
    };
}

/// Router over a simulated bus, for handler tests
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sensors;
    use crate::supervisor::{spawn_status_poller, Supervisor};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use cooltower_core::config::StaticConfig;
    use cooltower_hardware::SimulatedBus;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) struct TestApp {
        pub router: Router,
        pub sim: SimulatedBus,
        pub state: AppState,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let mut cfg = StaticConfig::default();
            cfg.serial.process_lock = false;
            cfg.serial.retries = 0;
            cfg.serial.settle_ms = 1;
            cfg.serial.response_timeout_ms = 5;
            cfg.polling.control_interval_ms = 50;

            let sim = SimulatedBus::new();
            for drive in &cfg.drives {
                sim.add_device(drive.device_id);
            }
            let registry = Arc::new(
                DriveRegistry::from_config(Box::new(sim.clone()), &cfg)
                    .await
                    .unwrap(),
            );
            let config = Arc::new(RuntimeConfig::from_static(cfg, "config.toml"));
            let (sensor_tx, sensor_rx) = sensors::channel();
            let (control, _task) = Supervisor::spawn(&config, &registry, sensor_rx)
                .await
                .unwrap();
            let (drive_status, _poller) =
                spawn_status_poller(registry.clone(), Duration::from_secs(3600));

            let state = AppState::new(config, registry, control, sensor_tx, drive_status, true);
            Self {
                router: create_router(state.clone()),
                sim,
                state,
            }
        }

        /// Send a request and return the status and parsed JSON body.
        pub async fn call(
            &self,
            method: Method,
            uri: &str,
            body: Option<&str>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
            };
            (status, json)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            self.call(Method::GET, uri, None).await
        }

        pub async fn post(&self, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
            self.call(Method::POST, uri, body).await
        }
    }
}
