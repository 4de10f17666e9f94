//! Protocol scenario runner entry point.
//!
//! Runs every handoff-protocol scenario against the CPU back-end and prints
//! a pass/fail summary.

use std::time::Duration;

use protocol_tests::{ConsumerPacing, ExpectedOutcome, ProtocolScenario};
use orchestrator::SimulationConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn config(name: &str, partitions: usize, particles: u32) -> SimulationConfig {
    SimulationConfig {
        name: name.to_string(),
        partition_count: partitions,
        particles_per_partition: particles,
        ..SimulationConfig::default()
    }
}

/// Free-running producer: no consumer, no waits, steady progress.
fn free_running_scenario() -> ProtocolScenario {
    ProtocolScenario {
        name: "Free-Running Producer".to_string(),
        config: config("free-running", 1, 256),
        consumer: ConsumerPacing::Absent,
        run_for: Duration::from_millis(200),
        expected: ExpectedOutcome {
            min_iterations: 5,
            exact_iterations: None,
            waits_allowed: false,
        },
    }
}

/// Frame-paced consumer reading two partitions.
fn paced_consumer_scenario() -> ProtocolScenario {
    ProtocolScenario {
        name: "Frame-Paced Consumer".to_string(),
        config: config("paced", 2, 256),
        consumer: ConsumerPacing::Frames { frames: 30 },
        run_for: Duration::from_millis(100),
        expected: ExpectedOutcome {
            min_iterations: 1,
            exact_iterations: None,
            waits_allowed: true,
        },
    }
}

/// Four partitions shut down immediately after start.
fn immediate_shutdown_scenario() -> ProtocolScenario {
    ProtocolScenario {
        name: "Immediate Shutdown".to_string(),
        config: config("immediate-shutdown", 4, 256),
        consumer: ConsumerPacing::Absent,
        run_for: Duration::ZERO,
        expected: ExpectedOutcome {
            min_iterations: 0,
            exact_iterations: None,
            waits_allowed: false,
        },
    }
}

/// Workers stop on their own at the configured iteration cap.
fn iteration_cap_scenario() -> ProtocolScenario {
    let mut cfg = config("iteration-cap", 2, 256);
    cfg.max_iterations = Some(50);
    ProtocolScenario {
        name: "Iteration Cap".to_string(),
        config: cfg,
        consumer: ConsumerPacing::Absent,
        run_for: Duration::ZERO,
        expected: ExpectedOutcome {
            min_iterations: 50,
            exact_iterations: Some(50),
            waits_allowed: false,
        },
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "protocol_tests=info,orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scenarios = vec![
        free_running_scenario(),
        paced_consumer_scenario(),
        immediate_shutdown_scenario(),
        iteration_cap_scenario(),
    ];

    let mut failures = 0;
    for scenario in &scenarios {
        match scenario.run() {
            Ok(result) => {
                result.print_summary();
                if !result.passed {
                    failures += 1;
                }
            }
            Err(err) => {
                eprintln!("Scenario '{}' failed to run: {}", scenario.name, err);
                failures += 1;
            }
        }
    }

    println!(
        "\n{} scenarios, {} failed",
        scenarios.len(),
        failures
    );
    if failures > 0 {
        std::process::exit(1);
    }
}
