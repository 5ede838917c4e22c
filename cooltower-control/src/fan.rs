//! Cooling tower fan control
//!
//! In manual mode the operator sets the frequency. In auto mode the basin
//! temperature drives it: the fan starts at `target + hysteresis`, stops
//! below `target`, and in between runs at a proportional speed. Anti-freeze
//! protection overrides everything.

use std::sync::Arc;
use std::time::Duration;

use cooltower_core::config::FanConfig;
use cooltower_core::{
    unix_millis, CoolTowerError, FanAutoParams, FanAutoParamsUpdate, FanMode, FanStatus, Result,
};
use cooltower_hardware::DriveController;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command_ok;

/// Minimum spacing of auto updates
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// What one auto update did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FanAction {
    /// Manual mode, throttled, or unusable reading
    Skipped,
    /// Below the anti-freeze limit; stop sent
    AntiFreezeStop,
    Started { hz: f64 },
    Stopped,
    /// Running; frequency re-applied
    Modulated { hz: f64 },
    /// Stopped and below the start threshold
    Idle,
}

/// Fan controller for one drive
pub struct FanController {
    drive: Arc<DriveController>,
    mode: FanMode,
    params: FanAutoParams,
    manual_setpoint_hz: f64,
    running: bool,
    commanded_hz: f64,
    last_update: Option<Instant>,
    last_update_ms: Option<u64>,
}

impl FanController {
    /// Create a controller in manual mode with the fan assumed stopped.
    pub fn new(drive: Arc<DriveController>, params: FanAutoParams) -> Result<Self> {
        params.validate()?;
        info!(
            "Fan controller: target={}°F, hysteresis={}°F, range={}-{} Hz",
            params.target_temp, params.hysteresis, params.min_hz, params.max_hz
        );
        Ok(Self {
            drive,
            mode: FanMode::Manual,
            params,
            manual_setpoint_hz: 0.0,
            running: false,
            commanded_hz: 0.0,
            last_update: None,
            last_update_ms: None,
        })
    }

    pub fn from_config(drive: Arc<DriveController>, config: &FanConfig) -> Result<Self> {
        let mut fan = Self::new(drive, config.auto)?;
        if config.start_in_auto {
            fan.set_mode(FanMode::Auto);
        }
        Ok(fan)
    }

    pub fn mode(&self) -> FanMode {
        self.mode
    }

    pub fn params(&self) -> &FanAutoParams {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Switch mode. The drive is left as it is; in auto the next update decides.
    ///
    /// Entering auto adopts a running drive seen in the last status read, so
    /// a fan started elsewhere is modulated and stopped like one started here.
    pub fn set_mode(&mut self, mode: FanMode) {
        if self.mode != mode {
            info!("Fan mode: {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
        if mode == FanMode::Auto && !self.running {
            if let Some(status) = self.drive.cached_status() {
                if status.state.is_running() {
                    info!(
                        "Fan already running at {:.1} Hz; taking over",
                        status.output_frequency_hz
                    );
                    self.running = true;
                    self.commanded_hz = status.output_frequency_hz;
                }
            }
        }
    }

    /// Manual frequency command.
    ///
    /// `hz` is clamped to `[0, max_hz]`. The frequency is written first, then
    /// a start (`hz > 0`) or stop (`hz == 0`). Returns whether both commands
    /// succeeded.
    ///
    /// # Errors
    ///
    /// `InvalidInput` in auto mode or for a non-finite `hz`; `BusBusy` when
    /// the bus could not be acquired.
    pub async fn set_manual_frequency(&mut self, hz: f64) -> Result<bool> {
        if self.mode == FanMode::Auto {
            return Err(CoolTowerError::InvalidInput(
                "Cannot set manual frequency in auto mode".to_string(),
            ));
        }
        if !hz.is_finite() {
            return Err(CoolTowerError::InvalidInput(format!(
                "Frequency must be a finite number, got {}",
                hz
            )));
        }
        let hz = hz.clamp(0.0, self.params.max_hz);
        self.manual_setpoint_hz = hz;

        if !self.drive.set_frequency(hz).await? {
            return Ok(false);
        }
        self.commanded_hz = hz;

        if hz > 0.0 {
            let ok = self.drive.start().await?;
            if ok {
                self.running = true;
                info!("Fan manual: {:.1} Hz (STARTING)", hz);
            }
            Ok(ok)
        } else {
            let ok = self.drive.stop().await?;
            if ok {
                self.running = false;
                info!("Fan manual: STOPPED");
            }
            Ok(ok)
        }
    }

    /// Replace some auto parameters. Takes effect on the next update.
    pub fn configure(&mut self, update: &FanAutoParamsUpdate) -> Result<FanAutoParams> {
        let params = update.apply_to(self.params);
        params.validate()?;
        self.params = params;
        info!(
            "Fan auto config: target={}°F, hysteresis={}°F, kp={}",
            params.target_temp, params.hysteresis, params.kp
        );
        Ok(params)
    }

    pub async fn update(&mut self, basin_temp: f64) -> FanAction {
        self.update_at(basin_temp, Instant::now()).await
    }

    /// Auto update as of `now`, at most once per [`UPDATE_INTERVAL`].
    pub async fn update_at(&mut self, basin_temp: f64, now: Instant) -> FanAction {
        if self.mode != FanMode::Auto {
            return FanAction::Skipped;
        }
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < UPDATE_INTERVAL {
                return FanAction::Skipped;
            }
        }
        if !basin_temp.is_finite() {
            warn!("Ignoring basin temperature {}", basin_temp);
            return FanAction::Skipped;
        }
        self.last_update = Some(now);
        self.last_update_ms = Some(unix_millis());

        let params = self.params;
        if basin_temp < params.anti_freeze_temp {
            warn!(
                "ANTI-FREEZE PROTECTION: Basin temp {:.1}°F < {}°F - Stopping fan",
                basin_temp, params.anti_freeze_temp
            );
            self.stop_drive().await;
            return FanAction::AntiFreezeStop;
        }

        if !self.running {
            if basin_temp >= params.start_threshold() {
                info!(
                    "Fan AUTO START: Temp {:.1}°F >= {:.1}°F",
                    basin_temp,
                    params.start_threshold()
                );
                let hz = params.frequency_for(basin_temp);
                if self.start_at(hz).await {
                    return FanAction::Started { hz };
                }
            } else if basin_temp < params.target_temp {
                self.hold_stopped().await;
            }
            FanAction::Idle
        } else if basin_temp < params.target_temp {
            info!(
                "Fan AUTO STOP: Temp {:.1}°F < {:.1}°F",
                basin_temp, params.target_temp
            );
            self.stop_drive().await;
            FanAction::Stopped
        } else {
            let hz = params.frequency_for(basin_temp);
            if self.write_frequency(hz).await {
                debug!("Fan modulating: {:.1} Hz (temp={:.1}°F)", hz, basin_temp);
            }
            FanAction::Modulated { hz }
        }
    }

    /// Emergency stop, used on shutdown.
    pub async fn stop(&mut self) -> bool {
        info!("Fan emergency stop");
        self.stop_drive().await
    }

    pub fn status(&self) -> FanStatus {
        FanStatus {
            mode: self.mode,
            manual_setpoint_hz: self.manual_setpoint_hz,
            running: self.running,
            commanded_hz: self.commanded_hz,
            auto_params: self.params,
            last_update_ms: self.last_update_ms,
        }
    }

    async fn start_at(&mut self, hz: f64) -> bool {
        if !self.write_frequency(hz).await {
            return false;
        }
        if command_ok(self.drive.name(), "start", self.drive.start().await) {
            self.running = true;
            info!("Fan started at {:.1} Hz", hz);
            true
        } else {
            false
        }
    }

    async fn write_frequency(&mut self, hz: f64) -> bool {
        let ok = command_ok(
            self.drive.name(),
            "set frequency",
            self.drive.set_frequency(hz).await,
        );
        if ok {
            self.commanded_hz = hz;
        }
        ok
    }

    /// Repeat the stop while idle below target; the drive may have been
    /// started outside this controller.
    async fn hold_stopped(&mut self) {
        if command_ok(self.drive.name(), "stop", self.drive.stop().await) {
            debug!("Fan held stopped");
        }
    }

    /// Stop unconditionally. A failed stop leaves `running` set so the next
    /// update tries again.
    async fn stop_drive(&mut self) -> bool {
        let ok = command_ok(self.drive.name(), "stop", self.drive.stop().await);
        if ok {
            self.running = false;
            info!("Fan stopped");
        }
        ok
    }
}

impl std::fmt::Debug for FanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanController")
            .field("drive", &self.drive.name())
            .field("mode", &self.mode)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
