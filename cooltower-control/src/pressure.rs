//! Pressure-driven pump speed

use cooltower_core::config::PumpControlConfig;

/// Proportional pump speed law with a write deadband
///
/// `hz = clamp(base + (target - pressure) * kp, min, max)`: low pressure
/// speeds the pump up.
#[derive(Debug, Clone)]
pub struct PumpSpeedLaw {
    config: PumpControlConfig,
    last_hz: Option<f64>,
}

impl PumpSpeedLaw {
    pub fn new(config: PumpControlConfig) -> Self {
        Self {
            config,
            last_hz: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn frequency_for(&self, pressure_psi: f64) -> f64 {
        let c = &self.config;
        let hz = c.base_hz + (c.target_pressure_psi - pressure_psi) * c.kp;
        hz.clamp(c.min_hz, c.max_hz)
    }

    /// Frequency to write for `pressure_psi`, or `None` when it is within the
    /// deadband of the last written value.
    pub fn next(&self, pressure_psi: f64) -> Option<f64> {
        if !pressure_psi.is_finite() {
            return None;
        }
        let hz = self.frequency_for(pressure_psi);
        match self.last_hz {
            Some(last) if (hz - last).abs() < self.config.deadband_hz => None,
            _ => Some(hz),
        }
    }

    /// Record a successful write of `hz`.
    pub fn applied(&mut self, hz: f64) {
        self.last_hz = Some(hz);
    }

    /// Forget the last write, e.g. after a pump switchover.
    pub fn reset(&mut self) {
        self.last_hz = None;
    }

    pub fn last_hz(&self) -> Option<f64> {
        self.last_hz
    }
}
