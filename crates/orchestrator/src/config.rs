//! Configuration parsing and validation for particle simulations.

use serde::{Deserialize, Serialize};
use std::fs;

/// Main simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Number of independent partitions, one compute worker each
    #[serde(default = "default_partition_count")]
    pub partition_count: usize,
    /// Particles per partition
    #[serde(default = "default_particle_count")]
    pub particles_per_partition: u32,
    /// Radius of the seeded particle clusters
    #[serde(default = "default_particle_spread")]
    pub particle_spread: f32,
    /// Integration timestep of the transform
    #[serde(default = "default_timestep")]
    pub timestep: f32,
    /// Velocity damping factor applied after integration
    #[serde(default = "default_damping")]
    pub damping: f32,
    /// Which compute back-end to run on
    #[serde(default)]
    pub backend: BackendType,
    /// Stop workers after this many iterations (run indefinitely if unset)
    pub max_iterations: Option<u64>,
}

/// Compute back-end selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// Reference CPU back-end
    Cpu,
    /// wgpu GPU back-end (requires the `gpu` feature)
    Gpu,
    /// GPU if an adapter is available, CPU otherwise
    #[default]
    Auto,
}

// Default values
fn default_partition_count() -> usize {
    1
}

fn default_particle_count() -> u32 {
    10000
}

fn default_particle_spread() -> f32 {
    400.0
}

fn default_timestep() -> f32 {
    0.1
}

fn default_damping() -> f32 {
    1.0
}

impl SimulationConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: SimulationConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.partition_count == 0 {
            return Err("partition_count must be at least 1".to_string());
        }

        // The seeded cloud splits into two opposing clusters.
        if self.particles_per_partition < 2 {
            return Err("particles_per_partition must be at least 2".to_string());
        }
        if self.particles_per_partition % 2 != 0 {
            return Err("particles_per_partition must be even".to_string());
        }

        if self.particle_spread <= 0.0 {
            return Err("particle_spread must be positive".to_string());
        }

        if self.timestep <= 0.0 {
            return Err("timestep must be positive".to_string());
        }

        if self.damping <= 0.0 || self.damping > 1.0 {
            return Err("damping must be in range (0, 1]".to_string());
        }

        if let Some(max_iterations) = self.max_iterations {
            if max_iterations == 0 {
                return Err("max_iterations must be at least 1".to_string());
            }
        }

        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "particles".to_string(),
            partition_count: default_partition_count(),
            particles_per_partition: default_particle_count(),
            particle_spread: default_particle_spread(),
            timestep: default_timestep(),
            damping: default_damping(),
            backend: BackendType::default(),
            max_iterations: None,
        }
    }
}
