//! API request handlers for the cooling-tower supervisor.
//!
//! # Handler Modules
//!
//! - [`info`] - Root, health and system information
//! - [`status`] - Full supervisor snapshot
//! - [`drives`] - Direct drive commands and live status
//! - [`fan`] - Fan controller mode, setpoint and auto parameters
//! - [`pump`] - Pump failover commands and status
//! - [`sensors`] - Sensor reading intake
//!
//! All handlers accept `State<AppState>` and return
//! `Result<Json<ApiResponse<T>>, ApiError>`. Commands that reach a drive but
//! are not acknowledged answer 503.

pub mod drives;
pub mod fan;
pub mod info;
pub mod pump;
pub mod sensors;
pub mod status;
