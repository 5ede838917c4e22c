//! Control loop
//!
//! One task owns the fan controller, the pump failover controller and the
//! pressure law. The API talks to it through [`SupervisorHandle`]: commands
//! go over an mpsc channel with a oneshot reply, and every tick publishes a
//! [`ControlSnapshot`] on a watch channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cooltower_control::{FailoverController, FanController, PumpSpeedLaw};
use cooltower_core::{
    unix_millis, CoolTowerError, DriveStatus, FailoverStatus, FanAutoParams, FanAutoParamsUpdate,
    FanMode, FanStatus, Result, SensorReading,
};
use cooltower_hardware::DriveRegistry;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;

const COMMAND_QUEUE: usize = 32;

/// Latest state of the controllers, published after every tick and command
#[derive(Debug, Clone)]
pub(crate) struct ControlSnapshot {
    pub fan: FanStatus,
    pub pump: Option<FailoverStatus>,
    /// Last frequency the pressure law wrote
    pub pump_command_hz: Option<f64>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SetFanMode(FanMode, Reply<FanStatus>),
    SetFanSetpoint(f64, Reply<FanStatus>),
    ConfigureFan(FanAutoParamsUpdate, Reply<FanAutoParams>),
    PumpStart(Reply<FailoverStatus>),
    PumpStop(Reply<FailoverStatus>),
    PumpFrequency(f64, Reply<FailoverStatus>),
    PumpSwitch(Reply<FailoverStatus>),
    PumpStatus(Reply<FailoverStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the control task
#[derive(Clone)]
pub(crate) struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ControlSnapshot>,
}

impl SupervisorHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn set_fan_mode(&self, mode: FanMode) -> Result<FanStatus> {
        self.request(|tx| Command::SetFanMode(mode, tx)).await
    }

    pub async fn set_fan_setpoint(&self, hz: f64) -> Result<FanStatus> {
        self.request(|tx| Command::SetFanSetpoint(hz, tx)).await
    }

    pub async fn configure_fan(&self, update: FanAutoParamsUpdate) -> Result<FanAutoParams> {
        self.request(|tx| Command::ConfigureFan(update, tx)).await
    }

    pub async fn pump_start(&self) -> Result<FailoverStatus> {
        self.request(Command::PumpStart).await
    }

    pub async fn pump_stop(&self) -> Result<FailoverStatus> {
        self.request(Command::PumpStop).await
    }

    pub async fn pump_frequency(&self, hz: f64) -> Result<FailoverStatus> {
        self.request(|tx| Command::PumpFrequency(hz, tx)).await
    }

    pub async fn pump_switch(&self) -> Result<FailoverStatus> {
        self.request(Command::PumpSwitch).await
    }

    /// Failover status with a live read of the active pump.
    pub async fn pump_status(&self) -> Result<FailoverStatus> {
        self.request(Command::PumpStatus).await
    }

    /// Stop the fan and the active pump, then end the control loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

fn stopped() -> CoolTowerError {
    CoolTowerError::Unavailable("control loop is not running".to_string())
}

fn failed(what: &str) -> CoolTowerError {
    CoolTowerError::Unavailable(format!("{} was not acknowledged", what))
}

/// The control task's state
pub(crate) struct Supervisor {
    fan: FanController,
    failover: Option<FailoverController>,
    pump_law: PumpSpeedLaw,
    sensors: watch::Receiver<Option<SensorReading>>,
    sensor_stale: Duration,
    interval: Duration,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<ControlSnapshot>,
}

impl Supervisor {
    /// Build the controllers from configuration and spawn the control task.
    pub async fn spawn(
        config: &RuntimeConfig,
        registry: &DriveRegistry,
        sensors: watch::Receiver<Option<SensorReading>>,
    ) -> Result<(SupervisorHandle, JoinHandle<()>)> {
        let cfg = config.static_config();
        let fan = FanController::from_config(registry.get_or_err(&cfg.fan.drive).await?, &cfg.fan)?;
        let failover = if cfg.failover.enabled {
            Some(FailoverController::from_config(registry, &cfg.failover).await?)
        } else {
            info!("Pump failover disabled");
            None
        };
        let pump_law = PumpSpeedLaw::new(cfg.pump_control.clone());
        if pump_law.is_enabled() {
            info!(
                "Pressure control enabled: target {} psi",
                cfg.pump_control.target_pressure_psi
            );
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let initial = ControlSnapshot {
            fan: fan.status(),
            pump: failover.as_ref().map(|f| f.snapshot()),
            pump_command_hz: None,
        };
        let (snapshots, snapshot) = watch::channel(initial);

        let supervisor = Supervisor {
            fan,
            failover,
            pump_law,
            sensors,
            sensor_stale: Duration::from_secs(cfg.polling.sensor_stale_secs),
            interval: Duration::from_millis(cfg.polling.control_interval_ms),
            commands: rx,
            snapshots,
        };
        let task = tokio::spawn(supervisor.run());
        Ok((
            SupervisorHandle {
                commands: tx,
                snapshot,
            },
            task,
        ))
    }

    async fn run(mut self) {
        info!("Control loop started (tick every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.stop_outputs().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        info!("Control loop stopped");
    }

    /// Fresh sensor reading, if any.
    fn reading(&self) -> Option<SensorReading> {
        let reading = (*self.sensors.borrow())?;
        let age = reading.age_ms(unix_millis());
        if age > self.sensor_stale.as_millis() as u64 {
            debug!("Sensor reading is {} ms old; skipping control update", age);
            return None;
        }
        Some(reading)
    }

    async fn tick(&mut self) {
        if let Some(reading) = self.reading() {
            self.fan.update(reading.basin_temp_f).await;

            let next = match &self.failover {
                Some(_) if self.pump_law.is_enabled() => self.pump_law.next(reading.pressure_psi),
                _ => None,
            };
            if let (Some(hz), Some(failover)) = (next, &self.failover) {
                if failover.set_frequency(hz).await {
                    debug!(
                        "Pump speed {:.1} Hz for {:.1} psi",
                        hz, reading.pressure_psi
                    );
                    self.pump_law.applied(hz);
                }
            }
        }

        if let Some(failover) = &mut self.failover {
            if let Some(transition) = failover.check_health().await {
                info!("Pump failover: {:?}", transition);
                // Re-apply the speed law to whichever pump is now active
                self.pump_law.reset();
            }
        }

        self.publish();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetFanMode(mode, reply) => {
                self.fan.set_mode(mode);
                let _ = reply.send(Ok(self.fan.status()));
            }
            Command::SetFanSetpoint(hz, reply) => {
                let result = match self.fan.set_manual_frequency(hz).await {
                    Ok(true) => Ok(self.fan.status()),
                    Ok(false) => Err(failed("Fan command")),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::ConfigureFan(update, reply) => {
                let _ = reply.send(self.fan.configure(&update));
            }
            Command::PumpStart(reply) => {
                let result = match self.pumps() {
                    Ok(f) => Self::acknowledged(f.start().await, "Pump start", f),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::PumpStop(reply) => {
                let result = match self.pumps() {
                    Ok(f) => Self::acknowledged(f.stop().await, "Pump stop", f),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::PumpFrequency(hz, reply) => {
                let result = match self.pumps() {
                    Ok(f) => Self::acknowledged(f.set_frequency(hz).await, "Pump frequency", f),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::PumpSwitch(reply) => {
                let result = match self.failover.as_mut() {
                    Some(f) => {
                        let transition = f.force_switchover().await;
                        info!("Manual pump switchover: {:?}", transition);
                        Ok(f.snapshot())
                    }
                    None => Err(failover_disabled()),
                };
                self.pump_law.reset();
                let _ = reply.send(result);
            }
            Command::PumpStatus(reply) => {
                let result = match self.pumps() {
                    Ok(f) => Ok(f.get_status().await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Shutdown(done) => {
                let _ = done.send(());
            }
        }
        self.publish();
    }

    fn pumps(&self) -> Result<&FailoverController> {
        self.failover.as_ref().ok_or_else(failover_disabled)
    }

    fn acknowledged(
        ok: bool,
        what: &str,
        failover: &FailoverController,
    ) -> Result<FailoverStatus> {
        if ok {
            Ok(failover.snapshot())
        } else {
            Err(failed(what))
        }
    }

    async fn stop_outputs(&mut self) {
        info!("Stopping fan and pumps...");
        if !self.fan.stop().await {
            warn!("Fan did not acknowledge stop");
        }
        if let Some(failover) = &self.failover {
            if !failover.stop().await {
                warn!("Active pump did not acknowledge stop");
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(ControlSnapshot {
            fan: self.fan.status(),
            pump: self.failover.as_ref().map(|f| f.snapshot()),
            pump_command_hz: self.pump_law.last_hz(),
        });
    }
}

fn failover_disabled() -> CoolTowerError {
    CoolTowerError::Unavailable("pump failover is disabled".to_string())
}

/// Poll every drive's status on a fixed interval and publish the results.
pub(crate) fn spawn_status_poller(
    registry: Arc<DriveRegistry>,
    interval: Duration,
) -> (watch::Receiver<BTreeMap<String, DriveStatus>>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(BTreeMap::new());
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let mut statuses = tx.borrow().clone();
            for drive in registry.list().await {
                match drive.get_status().await {
                    Ok(status) => {
                        statuses.insert(drive.name().to_string(), status);
                    }
                    Err(e) => warn!("Status poll of '{}' skipped: {}", drive.name(), e),
                }
            }
            if tx.send(statuses).is_err() {
                break;
            }
        }
    });
    (rx, task)
}
