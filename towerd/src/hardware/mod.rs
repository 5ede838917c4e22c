//! Bus connection for the daemon
//!
//! Opens either the real serial port or, in mock mode, a simulated bus with
//! every configured drive attached.

/// Hardware initialization and connection utilities
pub(crate) mod connection {
    use cooltower_core::{config::StaticConfig, CoolTowerError, Result};
    use cooltower_hardware::{available_ports, DriveRegistry, RtuTransport, SerialDriver, SimulatedBus};
    use tracing::{debug, info, warn};

    /// Open the bus transport.
    ///
    /// In mock mode the simulator is returned alongside the transport so the
    /// mock sensor feed can follow the simulated drives.
    pub fn open_transport(
        config: &StaticConfig,
        mock: bool,
    ) -> Result<(Box<dyn RtuTransport>, Option<SimulatedBus>)> {
        if mock {
            let sim = SimulatedBus::new();
            for drive in &config.drives {
                sim.add_device(drive.device_id);
            }
            info!(
                "Mock mode: simulated bus with {} drive(s)",
                config.drives.len()
            );
            return Ok((Box::new(sim.clone()), Some(sim)));
        }

        info!(
            "Opening serial port {} ({} baud)",
            config.serial.port, config.serial.baud_rate
        );
        match SerialDriver::new(&config.serial) {
            Ok(driver) => Ok((Box::new(driver), None)),
            Err(e) => {
                match available_ports() {
                    Ok(ports) if !ports.is_empty() => {
                        warn!("Available serial ports: {}", ports.join(", "))
                    }
                    Ok(_) => warn!("No serial ports found"),
                    Err(e) => debug!("Could not list serial ports: {}", e),
                }
                Err(CoolTowerError::Transport(format!(
                    "{}. Use --mock for testing without hardware.",
                    e
                )))
            }
        }
    }

    /// Read every drive once and log what answers. Never fails startup.
    pub async fn test_connection(registry: &DriveRegistry) {
        info!("Testing drive communication...");
        for drive in registry.list().await {
            match drive.get_status().await {
                Ok(status) if status.healthy => info!(
                    "  {} (device {}): {} at {:.1} Hz",
                    drive.name(),
                    drive.device_id(),
                    status.state,
                    status.output_frequency_hz
                ),
                Ok(_) => warn!(
                    "  {} (device {}): no response",
                    drive.name(),
                    drive.device_id()
                ),
                Err(e) => warn!("  {}: {}", drive.name(), e),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_transport_has_configured_drives() {
            let mut config = StaticConfig::default();
            config.serial.process_lock = false;
            config.serial.response_timeout_ms = 5;
            config.serial.retries = 0;

            let (transport, sim) = open_transport(&config, true).unwrap();
            let sim = sim.unwrap();
            let registry = DriveRegistry::from_config(transport, &config).await.unwrap();

            test_connection(&registry).await;
            for drive in &config.drives {
                assert!(sim.requests_to(drive.device_id) > 0);
            }
        }

        #[test]
        fn test_missing_port_suggests_mock() {
            let mut config = StaticConfig::default();
            config.serial.port = "/dev/does-not-exist-cooltower".to_string();

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let _guard = runtime.enter();
            match open_transport(&config, false) {
                Err(CoolTowerError::Transport(msg)) => assert!(msg.contains("--mock")),
                Err(e) => panic!("Expected Transport error, got {}", e),
                Ok(_) => panic!("Expected Transport error"),
            }
        }
    }
}
