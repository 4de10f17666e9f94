//! Protocol validation harness for the async-compute particle simulation.
//!
//! Each scenario starts a full simulation on the CPU back-end, drives an
//! optional consumer at its own pace, shuts the simulation down, and
//! validates the handoff protocol's observable guarantees: clean joins,
//! strict role alternation, forward progress, and consumer-wait behavior.

#[cfg(test)]
mod tests;

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kernel::{CpuDevice, SimParams};
use orchestrator::{start, SimulationConfig};

/// How the scenario's consumer behaves while the producers run.
#[derive(Debug, Clone, Copy)]
pub enum ConsumerPacing {
    /// No consumer at all; workers must never stall.
    Absent,
    /// Read and release every partition once per frame, `frames` times.
    Frames {
        /// Number of frames to consume.
        frames: u32,
    },
}

/// Expected outcome of a scenario.
#[derive(Debug, Clone)]
pub struct ExpectedOutcome {
    /// Every partition must complete at least this many iterations.
    pub min_iterations: u64,
    /// Every partition must complete exactly this many iterations.
    pub exact_iterations: Option<u64>,
    /// Whether any consumer waits are permitted at all.
    pub waits_allowed: bool,
}

/// One protocol scenario.
pub struct ProtocolScenario {
    /// Scenario name.
    pub name: String,
    /// Simulation configuration to start with.
    pub config: SimulationConfig,
    /// Consumer behavior.
    pub consumer: ConsumerPacing,
    /// Wall-clock time to let the producers run after the consumer is done.
    pub run_for: Duration,
    /// Outcome to validate.
    pub expected: ExpectedOutcome,
}

/// Result of an individual validation check.
#[derive(Debug)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Detail message.
    pub message: Option<String>,
}

/// Result of running a scenario.
#[derive(Debug)]
pub struct ScenarioResult {
    /// Scenario name.
    pub name: String,
    /// Whether every check passed.
    pub passed: bool,
    /// Individual check results.
    pub checks: Vec<CheckResult>,
    /// Final per-partition iteration counts.
    pub iterations: Vec<u64>,
}

impl ProtocolScenario {
    /// Run the scenario and validate its outcome.
    pub fn run(&self) -> Result<ScenarioResult, String> {
        tracing::info!("running protocol scenario: {}", self.name);

        let device = Arc::new(CpuDevice::new(SimParams::for_count(
            self.config.particles_per_partition,
            self.config.timestep,
            self.config.damping,
        )));
        let sim = start(device, &self.config).map_err(|e| e.to_string())?;
        let context = Arc::clone(sim.context());

        // Drive the consumer at its own pace.
        if let ConsumerPacing::Frames { frames } = self.consumer {
            let consumer = sim.render_handle();
            for _ in 0..frames {
                for partition in 0..sim.partition_count() {
                    consumer.acquire(partition).map_err(|e| e.to_string())?;
                    consumer.release(partition).map_err(|e| e.to_string())?;
                }
            }
        }

        if !self.run_for.is_zero() {
            thread::sleep(self.run_for);
        }

        // Workers with an iteration cap stop on their own; everyone else is
        // asked to stop now.
        if self.config.max_iterations.is_none() {
            sim.request_shutdown();
        }

        let mut checks = Vec::new();
        checks.push(join_within(sim, Duration::from_secs(10)));

        let iterations: Vec<u64> = context
            .partitions
            .iter()
            .map(|slot| slot.iterations.load(Ordering::Acquire))
            .collect();

        // Role index must equal the completed iteration count mod 2.
        let mut role_ok = true;
        let mut role_message = None;
        for (partition, slot) in context.partitions.iter().enumerate() {
            let expected = (iterations[partition] % 2) as usize;
            let actual = slot.pair.readable_index();
            if actual != expected {
                role_ok = false;
                role_message = Some(format!(
                    "partition {partition}: readable index {actual} after {} iterations",
                    iterations[partition]
                ));
                break;
            }
        }
        checks.push(CheckResult {
            name: "Role Alternation".to_string(),
            passed: role_ok,
            message: role_message,
        });

        // Progress bounds.
        let min_done = iterations.iter().copied().min().unwrap_or(0);
        checks.push(CheckResult {
            name: "Progress".to_string(),
            passed: min_done >= self.expected.min_iterations,
            message: Some(format!(
                "slowest partition: {} iterations (required {})",
                min_done, self.expected.min_iterations
            )),
        });

        if let Some(exact) = self.expected.exact_iterations {
            let all_exact = iterations.iter().all(|&done| done == exact);
            checks.push(CheckResult {
                name: "Iteration Cap".to_string(),
                passed: all_exact,
                message: Some(format!("iterations: {iterations:?} (expected {exact})")),
            });
        }

        // Without a consumer there is nothing to wait on.
        if !self.expected.waits_allowed {
            let total_waits: u64 = context
                .partitions
                .iter()
                .map(|slot| slot.consumer_waits.load(Ordering::Relaxed))
                .sum();
            checks.push(CheckResult {
                name: "No Spurious Waits".to_string(),
                passed: total_waits == 0,
                message: Some(format!("{total_waits} consumer waits inserted")),
            });
        }

        // Buffers must never have seen a read overlap a write.
        let torn = context.partitions.iter().any(|slot| {
            slot.pair.readable().aliasing_detected() || slot.pair.writable().aliasing_detected()
        });
        checks.push(CheckResult {
            name: "No Torn Reads".to_string(),
            passed: !torn,
            message: None,
        });

        let passed = checks.iter().all(|check| check.passed);
        Ok(ScenarioResult {
            name: self.name.clone(),
            passed,
            checks,
            iterations,
        })
    }
}

/// Join the simulation on a helper thread; a hang becomes a failed check
/// instead of a wedged harness.
fn join_within(sim: orchestrator::Simulation<CpuDevice>, deadline: Duration) -> CheckResult {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(sim.join_all());
    });

    match rx.recv_timeout(deadline) {
        Ok(Ok(())) => CheckResult {
            name: "Clean Shutdown".to_string(),
            passed: true,
            message: Some(format!("joined in {:?}", started.elapsed())),
        },
        Ok(Err(err)) => CheckResult {
            name: "Clean Shutdown".to_string(),
            passed: false,
            message: Some(format!("worker fault: {err}")),
        },
        Err(_) => CheckResult {
            name: "Clean Shutdown".to_string(),
            passed: false,
            message: Some(format!("join_all still blocked after {deadline:?}")),
        },
    }
}

impl ScenarioResult {
    /// Print a summary of the scenario result.
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(72));
        println!("Scenario: {}", self.name);
        println!("{}", "=".repeat(72));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Iterations per partition: {:?}", self.iterations);
        println!("\nChecks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(72));
    }
}
