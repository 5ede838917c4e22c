//! Pump failover
//!
//! Runs one of two pump drives and moves to the other when the active one
//! stops answering. The controller is owned by the control task; every
//! method that changes the role takes `&mut self`.

use std::sync::Arc;
use std::time::Duration;

use cooltower_core::config::FailoverConfig;
use cooltower_core::{unix_millis, FailoverRole, FailoverStatus, Result};
use cooltower_hardware::{DriveController, DriveRegistry};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command_ok;

/// Role change performed by a health check or a forced switchover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Primary stopped, backup running
    FailedOver,
    /// Backup stopped, primary running again
    FellBack,
    /// Backup would not start; no pump is running
    BackupFailed,
    /// Primary would not restart; backup restarted
    FailbackFailed,
}

/// Primary/backup pump state machine
pub struct FailoverController {
    primary: Arc<DriveController>,
    backup: Arc<DriveController>,
    role: FailoverRole,
    max_errors: u32,
    check_interval: Duration,
    last_check: Option<Instant>,
    last_check_ms: Option<u64>,
}

impl FailoverController {
    pub fn new(
        primary: Arc<DriveController>,
        backup: Arc<DriveController>,
        max_errors: u32,
        check_interval: Duration,
    ) -> Self {
        info!(
            "Pump failover: primary '{}', backup '{}', max errors {}, check every {:?}",
            primary.name(),
            backup.name(),
            max_errors,
            check_interval
        );
        Self {
            primary,
            backup,
            role: FailoverRole::Primary,
            max_errors,
            check_interval,
            last_check: None,
            last_check_ms: None,
        }
    }

    /// Look up both pumps in `registry`.
    pub async fn from_config(registry: &DriveRegistry, config: &FailoverConfig) -> Result<Self> {
        let primary = registry.get_or_err(&config.primary).await?;
        let backup = registry.get_or_err(&config.backup).await?;
        Ok(Self::new(
            primary,
            backup,
            config.max_errors,
            Duration::from_secs(config.check_interval_secs),
        ))
    }

    pub fn role(&self) -> FailoverRole {
        self.role
    }

    /// The drive currently running, `None` once both have failed.
    pub fn active_drive(&self) -> Option<&Arc<DriveController>> {
        match self.role {
            FailoverRole::Primary => Some(&self.primary),
            FailoverRole::Backup => Some(&self.backup),
            FailoverRole::Failed => None,
        }
    }

    pub async fn check_health(&mut self) -> Option<Transition> {
        self.check_health_at(Instant::now()).await
    }

    /// Health check as of `now`.
    ///
    /// Does nothing if the previous check ran less than the check interval
    /// before `now`. Otherwise fails over from an unhealthy primary, or, on
    /// backup, probes the primary and fails back once it answers again.
    pub async fn check_health_at(&mut self, now: Instant) -> Option<Transition> {
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < self.check_interval {
                return None;
            }
        }
        self.last_check = Some(now);
        self.last_check_ms = Some(unix_millis());

        match self.role {
            FailoverRole::Primary => {
                if self.primary.is_healthy(self.max_errors) {
                    return None;
                }
                warn!(
                    "Primary pump unhealthy (errors: {})",
                    self.primary.error_count()
                );
                Some(self.fail_over().await)
            }
            FailoverRole::Backup => {
                if let Err(e) = self.primary.get_status().await {
                    debug!("Primary probe skipped: {}", e);
                }
                if !self.primary.is_healthy(self.max_errors) {
                    return None;
                }
                info!("Primary pump recovered, switching back");
                Some(self.fail_back().await)
            }
            FailoverRole::Failed => None,
        }
    }

    /// Manual switchover.
    ///
    /// From primary this fails over; from backup or failed it attempts to
    /// bring the primary back. Health is not consulted.
    pub async fn force_switchover(&mut self) -> Transition {
        info!("Manual pump switchover requested (active: {})", self.role);
        match self.role {
            FailoverRole::Primary => self.fail_over().await,
            FailoverRole::Backup | FailoverRole::Failed => self.fail_back().await,
        }
    }

    async fn fail_over(&mut self) -> Transition {
        warn!("FAILOVER: Switching to backup pump");
        command_ok(self.primary.name(), "stop", self.primary.stop().await);

        if command_ok(self.backup.name(), "start", self.backup.start().await) {
            self.role = FailoverRole::Backup;
            info!("Backup pump activated");
            Transition::FailedOver
        } else {
            self.role = FailoverRole::Failed;
            error!("CRITICAL: Backup pump failed to start, no pump running");
            Transition::BackupFailed
        }
    }

    async fn fail_back(&mut self) -> Transition {
        info!("FAILBACK: Switching to primary pump");
        command_ok(self.backup.name(), "stop", self.backup.stop().await);

        if command_ok(self.primary.name(), "start", self.primary.start().await) {
            self.role = FailoverRole::Primary;
            self.primary.reset_errors();
            info!("Primary pump reactivated");
            return Transition::FellBack;
        }

        match self.role {
            FailoverRole::Failed => {
                error!("Primary pump failed to restart, pumps remain failed");
                Transition::BackupFailed
            }
            _ => {
                error!("Primary pump failed to restart, staying on backup");
                command_ok(self.backup.name(), "start", self.backup.start().await);
                Transition::FailbackFailed
            }
        }
    }

    /// Start the active pump. Reports failure when no pump is active.
    pub async fn start(&self) -> bool {
        match self.active_drive() {
            Some(drive) => command_ok(drive.name(), "start", drive.start().await),
            None => {
                warn!("Pump start ignored: both pumps failed");
                false
            }
        }
    }

    /// Stop the active pump. Reports failure when no pump is active.
    pub async fn stop(&self) -> bool {
        match self.active_drive() {
            Some(drive) => command_ok(drive.name(), "stop", drive.stop().await),
            None => {
                warn!("Pump stop ignored: both pumps failed");
                false
            }
        }
    }

    /// Set the active pump's frequency. Reports failure when no pump is active.
    pub async fn set_frequency(&self, hz: f64) -> bool {
        match self.active_drive() {
            Some(drive) => command_ok(drive.name(), "set frequency", drive.set_frequency(hz).await),
            None => {
                warn!("Pump frequency ignored: both pumps failed");
                false
            }
        }
    }

    /// Status report without bus I/O; the active drive's last cached status
    /// is included when there is one.
    pub fn snapshot(&self) -> FailoverStatus {
        FailoverStatus {
            active_role: self.role,
            active_drive: self.active_drive().map(|d| d.name().to_string()),
            primary_healthy: self.primary.is_healthy(self.max_errors),
            backup_healthy: self.backup.is_healthy(self.max_errors),
            primary_errors: self.primary.error_count(),
            backup_errors: self.backup.error_count(),
            active_drive_status: self.active_drive().and_then(|d| d.cached_status()),
            last_check_ms: self.last_check_ms,
        }
    }

    /// Status report with a live read of the active drive.
    pub async fn get_status(&self) -> FailoverStatus {
        let live = match self.active_drive() {
            Some(drive) => match drive.get_status().await {
                Ok(status) => Some(status),
                Err(e) => {
                    debug!("Active pump status unavailable: {}", e);
                    drive.cached_status()
                }
            },
            None => None,
        };
        FailoverStatus {
            active_drive_status: live,
            ..self.snapshot()
        }
    }
}

impl std::fmt::Debug for FailoverController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverController")
            .field("primary", &self.primary.name())
            .field("backup", &self.backup.name())
            .field("role", &self.role)
            .field("max_errors", &self.max_errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use cooltower_core::DriveState;
    use cooltower_hardware::SimulatedBus;

    const INTERVAL: Duration = Duration::from_secs(5);

    async fn controller() -> (SimulatedBus, FailoverController) {
        let (sim, registry) = testing::registry().await;
        let failover = FailoverController::new(
            registry.get_drive("pump_primary").await.unwrap(),
            registry.get_drive("pump_backup").await.unwrap(),
            3,
            INTERVAL,
        );
        (sim, failover)
    }

    /// Drive the primary's error counter to `count` with failed starts.
    async fn fail_primary(sim: &SimulatedBus, failover: &FailoverController, count: u32) {
        sim.set_online(1, false);
        for _ in 0..count {
            assert!(!failover.start().await);
        }
    }

    #[tokio::test]
    async fn test_healthy_primary_stays_active() {
        let (sim, mut failover) = controller().await;
        assert_eq!(failover.check_health().await, None);
        assert_eq!(failover.role(), FailoverRole::Primary);
        assert!(sim.control_log().is_empty());
    }

    #[tokio::test]
    async fn test_failover_stops_primary_then_starts_backup() {
        let (sim, mut failover) = controller().await;
        fail_primary(&sim, &failover, 3).await;
        // Answers again, but the counter still says unhealthy
        sim.set_online(1, true);

        let t0 = Instant::now();
        assert_eq!(
            failover.check_health_at(t0).await,
            Some(Transition::FailedOver)
        );
        assert_eq!(failover.role(), FailoverRole::Backup);
        assert_eq!(sim.control_log(), vec![(1, 0x0005), (2, 0x0001)]);
        assert!(sim.is_running(2));
    }

    #[tokio::test]
    async fn test_failover_with_dead_primary() {
        let (sim, mut failover) = controller().await;
        fail_primary(&sim, &failover, 3).await;

        let t0 = Instant::now();
        assert_eq!(
            failover.check_health_at(t0).await,
            Some(Transition::FailedOver)
        );
        // The stop never reached the primary
        assert_eq!(sim.control_log(), vec![(2, 0x0001)]);
        assert_eq!(failover.snapshot().primary_errors, 4);
        assert_eq!(failover.active_drive().unwrap().name(), "pump_backup");
    }

    #[tokio::test]
    async fn test_checks_are_throttled() {
        let (sim, mut failover) = controller().await;
        let t0 = Instant::now();
        assert_eq!(failover.check_health_at(t0).await, None);

        fail_primary(&sim, &failover, 3).await;
        assert_eq!(
            failover.check_health_at(t0 + Duration::from_secs(1)).await,
            None
        );
        assert_eq!(failover.role(), FailoverRole::Primary);

        assert_eq!(
            failover.check_health_at(t0 + INTERVAL).await,
            Some(Transition::FailedOver)
        );
    }

    #[tokio::test]
    async fn test_failback_when_primary_recovers() {
        let (sim, mut failover) = controller().await;
        fail_primary(&sim, &failover, 3).await;
        let t0 = Instant::now();
        failover.check_health_at(t0).await;
        assert_eq!(failover.role(), FailoverRole::Backup);

        // Still dead: the probe fails and nothing changes
        assert_eq!(failover.check_health_at(t0 + INTERVAL).await, None);
        assert_eq!(failover.role(), FailoverRole::Backup);

        sim.set_online(1, true);
        sim.clear_log();
        assert_eq!(
            failover.check_health_at(t0 + INTERVAL * 2).await,
            Some(Transition::FellBack)
        );
        assert_eq!(failover.role(), FailoverRole::Primary);
        assert_eq!(sim.control_log(), vec![(2, 0x0005), (1, 0x0001)]);
        assert_eq!(failover.snapshot().primary_errors, 0);
    }

    #[tokio::test]
    async fn test_failback_failure_restarts_backup() {
        let (sim, mut failover) = controller().await;
        failover.force_switchover().await;
        assert_eq!(failover.role(), FailoverRole::Backup);

        // Primary answers status reads but refuses to start
        sim.inject_fault(1, 0x0010);
        sim.clear_log();
        assert_eq!(
            failover.check_health_at(Instant::now()).await,
            Some(Transition::FailbackFailed)
        );
        assert_eq!(failover.role(), FailoverRole::Backup);
        assert_eq!(sim.control_log(), vec![(2, 0x0005), (2, 0x0001)]);
        assert!(sim.is_running(2));
    }

    #[tokio::test]
    async fn test_backup_start_failure_is_terminal() {
        let (sim, mut failover) = controller().await;
        sim.set_online(2, false);
        fail_primary(&sim, &failover, 3).await;

        let t0 = Instant::now();
        assert_eq!(
            failover.check_health_at(t0).await,
            Some(Transition::BackupFailed)
        );
        assert_eq!(failover.role(), FailoverRole::Failed);

        // Both pumps come back; nothing automatic leaves Failed
        sim.set_online(1, true);
        sim.set_online(2, true);
        assert_eq!(failover.check_health_at(t0 + INTERVAL).await, None);
        assert_eq!(failover.role(), FailoverRole::Failed);

        assert!(!failover.set_frequency(40.0).await);
        assert!(!failover.stop().await);
        assert!(failover.active_drive().is_none());
    }

    #[tokio::test]
    async fn test_force_switchover_out_of_failed() {
        let (sim, mut failover) = controller().await;
        sim.set_online(2, false);
        fail_primary(&sim, &failover, 3).await;
        failover.check_health_at(Instant::now()).await;
        assert_eq!(failover.role(), FailoverRole::Failed);

        // Primary still dead: stays failed
        assert_eq!(
            failover.force_switchover().await,
            Transition::BackupFailed
        );
        assert_eq!(failover.role(), FailoverRole::Failed);

        sim.set_online(1, true);
        assert_eq!(failover.force_switchover().await, Transition::FellBack);
        assert_eq!(failover.role(), FailoverRole::Primary);
    }

    #[tokio::test]
    async fn test_commands_follow_active_drive() {
        let (sim, mut failover) = controller().await;
        assert!(failover.set_frequency(45.0).await);
        assert_eq!(sim.setpoint_hz(1), Some(45.0));

        failover.force_switchover().await;
        assert!(failover.set_frequency(35.0).await);
        assert_eq!(sim.setpoint_hz(2), Some(35.0));
        assert_eq!(sim.setpoint_hz(1), Some(45.0));
    }

    #[tokio::test]
    async fn test_status_reads_active_drive() {
        let (sim, failover) = controller().await;
        sim.force_running(1, 42.0).unwrap();

        let status = failover.get_status().await;
        assert_eq!(status.active_role, FailoverRole::Primary);
        assert_eq!(status.active_drive.as_deref(), Some("pump_primary"));
        assert!(status.primary_healthy && status.backup_healthy);
        let drive = status.active_drive_status.unwrap();
        assert_eq!(drive.state, DriveState::Forward);
        assert_eq!(drive.output_frequency_hz, 42.0);
    }
}
