//! Sensor intake
//!
//! The latest `{pressure, basin temperature}` reading lives in a watch
//! channel. An external reader pushes readings through the API; in mock mode
//! a small plant model driven by the simulated drives produces them instead.

use std::sync::Arc;
use std::time::Duration;

use cooltower_core::SensorReading;
use cooltower_hardware::SimulatedBus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) type SensorSender = Arc<watch::Sender<Option<SensorReading>>>;

pub(crate) fn channel() -> (SensorSender, watch::Receiver<Option<SensorReading>>) {
    let (tx, rx) = watch::channel(None);
    (Arc::new(tx), rx)
}

/// Basin and header model for mock mode
#[derive(Debug, Clone)]
pub(crate) struct MockPlant {
    basin_temp_f: f64,
    pressure_psi: f64,
}

impl Default for MockPlant {
    fn default() -> Self {
        Self {
            basin_temp_f: 78.0,
            pressure_psi: 0.0,
        }
    }
}

impl MockPlant {
    /// Heat load warms the basin by 0.05°F per step; the fan removes
    /// 0.004°F per Hz. Header pressure follows the running pump at 0.5 psi/Hz.
    pub fn step(&mut self, fan_hz: Option<f64>, pump_hz: Option<f64>) -> SensorReading {
        let cooling = fan_hz.map(|hz| hz * 0.004).unwrap_or(0.0);
        self.basin_temp_f = (self.basin_temp_f + 0.05 - cooling).clamp(35.0, 110.0);
        self.pressure_psi = pump_hz.map(|hz| hz * 0.5).unwrap_or(0.0);
        SensorReading::new(self.pressure_psi, self.basin_temp_f)
    }
}

/// Feed readings from a [`MockPlant`] following the simulated drives.
pub(crate) fn spawn_mock_feed(
    sender: SensorSender,
    sim: SimulatedBus,
    fan_id: u8,
    pump_ids: Vec<u8>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut plant = MockPlant::default();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let running_hz = |id: u8| {
                sim.is_running(id)
                    .then(|| sim.setpoint_hz(id))
                    .flatten()
            };
            let fan_hz = running_hz(fan_id);
            let pump_hz = pump_ids.iter().copied().find_map(running_hz);
            let reading = plant.step(fan_hz, pump_hz);
            debug!(
                "Mock sensors: {:.1} psi, {:.1}°F",
                reading.pressure_psi, reading.basin_temp_f
            );
            sender.send_replace(Some(reading));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basin_warms_without_fan() {
        let mut plant = MockPlant::default();
        let first = plant.step(None, None);
        let second = plant.step(None, None);
        assert!(second.basin_temp_f > first.basin_temp_f);
        assert_eq!(second.pressure_psi, 0.0);
    }

    #[test]
    fn test_fan_cools_and_pump_pressurizes() {
        let mut plant = MockPlant::default();
        let reading = plant.step(Some(60.0), Some(30.0));
        assert!(reading.basin_temp_f < 78.0);
        assert_eq!(reading.pressure_psi, 15.0);
    }

    #[tokio::test]
    async fn test_mock_feed_publishes() {
        let sim = SimulatedBus::new();
        sim.add_device(1);
        sim.force_running(1, 30.0).unwrap();
        let (tx, mut rx) = channel();

        let task = spawn_mock_feed(tx, sim, 3, vec![1, 2], Duration::from_millis(5));
        rx.changed().await.unwrap();
        let reading = (*rx.borrow()).unwrap();
        assert_eq!(reading.pressure_psi, 15.0);
        task.abort();
    }
}
