//! Particle motion payload and deterministic cloud seeding.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Squared cluster mass stored in `position.w`; the transform reads it as
/// the gravitational mass of each body.
pub const CLUSTER_MASS: f32 = 1.0e8;

/// Per-particle motion state as it lives in device buffers.
///
/// `position.w` carries the body mass and `velocity.w` the inverse-mass
/// scale applied to accumulated acceleration, so the whole transform input
/// is two vec4s per particle and the layout maps directly onto the shader
/// struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleMotion {
    /// Position (xyz) and body mass (w).
    pub position: [f32; 4],
    /// Velocity (xyz) and inverse-mass scale (w).
    pub velocity: [f32; 4],
}

/// Seed one partition's particle cloud: two clusters of `count / 2`
/// particles on opposing sides of the origin with opposing z velocities.
///
/// Offsets are rejection-sampled inside a sphere of radius `spread`, so the
/// clusters are isotropic rather than cubic. Deterministic for a given
/// `seed`, which keeps partition contents reproducible across runs.
pub fn seed_particle_cloud(count: usize, spread: f32, seed: u64) -> Vec<ParticleMotion> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut particles = Vec::with_capacity(count);

    let half = count / 2;
    let center_offset = spread * 0.5;

    load_cluster(
        &mut particles,
        &mut rng,
        half,
        [center_offset, 0.0, 0.0],
        [0.0, 0.0, -20.0],
        spread,
    );
    load_cluster(
        &mut particles,
        &mut rng,
        count - half,
        [-center_offset, 0.0, 0.0],
        [0.0, 0.0, 20.0],
        spread,
    );

    particles
}

/// Fill one cluster centered at `center` with a shared initial velocity.
fn load_cluster(
    particles: &mut Vec<ParticleMotion>,
    rng: &mut StdRng,
    count: usize,
    center: [f32; 3],
    velocity: [f32; 3],
    spread: f32,
) {
    for _ in 0..count {
        let mut delta = [spread, spread, spread];
        while delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2] > spread * spread
        {
            delta[0] = rng.gen_range(-1.0..=1.0) * spread;
            delta[1] = rng.gen_range(-1.0..=1.0) * spread;
            delta[2] = rng.gen_range(-1.0..=1.0) * spread;
        }

        particles.push(ParticleMotion {
            position: [
                center[0] + delta[0],
                center[1] + delta[1],
                center[2] + delta[2],
                CLUSTER_MASS,
            ],
            velocity: [velocity[0], velocity[1], velocity[2], 1.0 / CLUSTER_MASS],
        });
    }
}
