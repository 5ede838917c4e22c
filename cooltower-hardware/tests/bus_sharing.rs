//! Many tasks sharing one bus never interleave exchanges.

use std::sync::Arc;
use std::time::Duration;

use cooltower_core::DriveState;
use cooltower_hardware::{
    BusArbiter, DriveRegistry, RetryPolicy, SimulatedBus, TransactionEngine, TransactionTiming,
    DEFAULT_STALENESS,
};

fn registry(sim: &SimulatedBus) -> DriveRegistry {
    let bus = Arc::new(BusArbiter::new(
        Box::new(sim.clone()),
        Duration::from_secs(5),
    ));
    let engine = Arc::new(TransactionEngine::new(
        bus,
        TransactionTiming {
            settle: Duration::from_millis(1),
            response_timeout: Duration::from_millis(50),
        },
        RetryPolicy::none(),
    ));
    DriveRegistry::new(engine, DEFAULT_STALENESS)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commands_are_serialized() {
    let sim = SimulatedBus::new().with_latency(Duration::from_millis(2));
    for id in 1..=3 {
        sim.add_device(id);
    }
    let registry = Arc::new(registry(&sim));
    registry.add_drive("pump_primary", 1, "Primary").await.unwrap();
    registry.add_drive("pump_backup", 2, "Backup").await.unwrap();
    registry.add_drive("fan", 3, "Fan").await.unwrap();

    let mut tasks = Vec::new();
    for round in 0..8 {
        for drive in registry.list().await {
            tasks.push(tokio::spawn(async move {
                let hz = 20.0 + round as f64;
                assert!(drive.set_frequency(hz).await.unwrap());
                assert!(drive.start().await.unwrap());
                drive.get_status().await
            }));
        }
    }
    for task in tasks {
        let status = task.await.unwrap().unwrap();
        assert_eq!(status.state, DriveState::Forward);
        assert!(status.healthy);
    }

    assert_eq!(sim.max_concurrent_exchanges(), 1);
    for drive in registry.list().await {
        assert_eq!(drive.error_count(), 0);
        assert!(sim.is_running(drive.device_id()));
    }
}

#[tokio::test]
async fn offline_drive_does_not_block_the_others() {
    let sim = SimulatedBus::new();
    sim.add_device(1);
    sim.add_device(3);
    let registry = registry(&sim);
    registry.add_drive("pump_primary", 1, "Primary").await.unwrap();
    registry.add_drive("fan", 3, "Fan").await.unwrap();

    sim.set_online(1, false);
    let pump = registry.get_or_err("pump_primary").await.unwrap();
    let fan = registry.get_or_err("fan").await.unwrap();

    assert!(!pump.start().await.unwrap());
    assert!(fan.start().await.unwrap());
    assert_eq!(pump.error_count(), 1);
    assert_eq!(fan.error_count(), 0);
}
