//! Lifecycle validation: start, shutdown, and join behavior.
//!
//! These tests verify the host surface contracts: shutdown is non-blocking
//! and idempotent, every started worker returns cleanly, and `join_all`
//! never hangs even when shutdown lands immediately after start.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kernel::{CpuDevice, SimParams};
use orchestrator::{start, Simulation, SimulationConfig};

fn test_config(partitions: usize) -> SimulationConfig {
    SimulationConfig {
        partition_count: partitions,
        particles_per_partition: 64,
        ..SimulationConfig::default()
    }
}

fn start_simulation(config: &SimulationConfig) -> Simulation<CpuDevice> {
    let device = Arc::new(CpuDevice::new(SimParams::for_count(
        config.particles_per_partition,
        config.timestep,
        config.damping,
    )));
    start(device, config).unwrap()
}

/// Join on a helper thread so a hang fails the test instead of wedging it.
fn join_with_deadline(sim: Simulation<CpuDevice>, deadline: Duration) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = sim.join_all();
        let _ = tx.send(result);
    });
    rx.recv_timeout(deadline)
        .expect("join_all did not return before the deadline")
        .expect("a worker returned a fault");
}

#[test]
fn shutdown_joins_every_worker() {
    let config = test_config(3);
    let sim = start_simulation(&config);

    // Let the workers make some progress first.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while (0..3).any(|p| sim.iterations(p) == 0) {
        assert!(
            std::time::Instant::now() < deadline,
            "a worker made no progress"
        );
        thread::sleep(Duration::from_millis(2));
    }

    sim.request_shutdown();
    join_with_deadline(sim, Duration::from_secs(5));
}

#[test]
fn immediate_shutdown_never_hangs() {
    let config = test_config(4);
    let sim = start_simulation(&config);

    // Shutdown before the workers have necessarily dispatched anything;
    // each completes at most its in-flight iteration.
    sim.request_shutdown();
    join_with_deadline(sim, Duration::from_secs(5));
}

#[test]
fn request_shutdown_is_idempotent() {
    let config = test_config(2);
    let sim = start_simulation(&config);

    sim.request_shutdown();
    sim.request_shutdown();
    join_with_deadline(sim, Duration::from_secs(5));
}

#[test]
fn max_iterations_stops_workers_without_shutdown() {
    let mut config = test_config(2);
    config.max_iterations = Some(10);
    let sim = start_simulation(&config);

    // join_all returns on its own once every worker hits the cap.
    let context = Arc::clone(sim.context());
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(sim.join_all());
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("join_all did not return")
        .expect("a worker returned a fault");

    for slot in &context.partitions {
        assert_eq!(slot.iterations.load(std::sync::atomic::Ordering::Acquire), 10);
        // Role index alternates strictly: after K iterations, K mod 2.
        assert_eq!(slot.pair.readable_index(), 0);
    }
}
