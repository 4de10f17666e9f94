//! Smoke tests for the scenario harness itself.

use std::time::Duration;

use crate::{ConsumerPacing, ExpectedOutcome, ProtocolScenario};
use orchestrator::SimulationConfig;

fn small_config(partitions: usize) -> SimulationConfig {
    SimulationConfig {
        name: "harness-smoke".to_string(),
        partition_count: partitions,
        particles_per_partition: 64,
        ..SimulationConfig::default()
    }
}

#[test]
fn free_running_scenario_passes() {
    let scenario = ProtocolScenario {
        name: "smoke: free-running".to_string(),
        config: small_config(1),
        consumer: ConsumerPacing::Absent,
        run_for: Duration::from_millis(100),
        expected: ExpectedOutcome {
            min_iterations: 1,
            exact_iterations: None,
            waits_allowed: false,
        },
    };

    let result = scenario.run().unwrap();
    assert!(result.passed, "checks failed: {:?}", result.checks);
}

#[test]
fn iteration_cap_scenario_is_exact() {
    let mut config = small_config(2);
    config.max_iterations = Some(8);
    let scenario = ProtocolScenario {
        name: "smoke: iteration cap".to_string(),
        config,
        consumer: ConsumerPacing::Absent,
        run_for: Duration::ZERO,
        expected: ExpectedOutcome {
            min_iterations: 8,
            exact_iterations: Some(8),
            waits_allowed: false,
        },
    };

    let result = scenario.run().unwrap();
    assert!(result.passed, "checks failed: {:?}", result.checks);
    assert_eq!(result.iterations, vec![8, 8]);
}

#[test]
fn unmet_progress_expectation_fails_the_scenario() {
    let mut config = small_config(1);
    config.max_iterations = Some(2);
    let scenario = ProtocolScenario {
        name: "smoke: impossible progress".to_string(),
        config,
        consumer: ConsumerPacing::Absent,
        run_for: Duration::ZERO,
        expected: ExpectedOutcome {
            min_iterations: 1000,
            exact_iterations: None,
            waits_allowed: false,
        },
    };

    let result = scenario.run().unwrap();
    assert!(!result.passed);
}
