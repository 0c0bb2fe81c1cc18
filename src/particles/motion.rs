//! Flow-field integration and lifecycle scale

use glam::Vec3;
use rand::Rng;

use super::noise::NoiseField;
use super::BandMix;
use crate::config::particles::{FADE_START, GRAPH_NODE_SCALE, NODE_LIFETIME, SPAWN_RADIUS, WALL_RESTITUTION};

/// Per-frame inputs shared by every free particle
#[derive(Debug, Clone, Copy)]
pub struct MotionParams {
    /// Simulation clock in seconds
    pub t: f32,
    pub oscillation: f32,
    pub noise_amp: f32,
    pub radial_amp: f32,
    pub bounds: f32,
    pub drag: f32,
    pub mix: BandMix,
    pub kick_level: f32,
    pub audio_active: bool,
    pub energy: f32,
}

impl MotionParams {
    /// Force multiplier; zero while paused so idle particles freeze
    pub fn calm(&self) -> f32 {
        if self.audio_active {
            0.05 + self.energy * 0.95
        } else {
            0.0
        }
    }
}

/// Uniform-ish point in a hollow sphere of radius `SPAWN_RADIUS * bounds`
pub fn sphere_point<R: Rng>(rng: &mut R, bounds: f32) -> Vec3 {
    let theta = 2.0 * std::f32::consts::PI * rng.random::<f32>();
    let phi = (2.0 * rng.random::<f32>() - 1.0).clamp(-1.0, 1.0).acos();
    let r = (rng.random::<f32>().cbrt() * 0.85 + 0.15) * (bounds * SPAWN_RADIUS);
    Vec3::new(
        r * phi.sin() * theta.cos(),
        r * phi.sin() * theta.sin(),
        r * phi.cos(),
    )
}

/// Advance one free particle by a frame.
///
/// `prev` receives the position before the step so trails can draw the
/// segment travelled.
pub fn step_particle(
    pos: &mut Vec3,
    vel: &mut Vec3,
    prev: &mut Vec3,
    noise: &NoiseField,
    p: &MotionParams,
) {
    let (x, y, z) = (pos.x, pos.y, pos.z);
    let t = p.t;
    *prev = *pos;

    let nx = noise.signed(x * 0.15 + t * 0.25, y * 0.12 - t * 0.22, z * 0.1);
    let ny = noise.signed(y * 0.16 - t * 0.21, z * 0.14 + t * 0.24, x * 0.11);
    let nz = noise.signed(z * 0.13 + t * 0.2, x * 0.1 - t * 0.18, y * 0.09);

    let BandMix { low, mid, hi } = p.mix;
    let flow_gain = p.noise_amp * p.oscillation * (0.2 + mid * 1.2);
    let mut flow = Vec3::new(nx, ny, nz) * flow_gain;
    flow.z += ((t * 0.45 + x * 0.7).sin() + (t * 0.37 + y * 0.9).cos()) * 0.12 * (0.3 + mid + hi);

    let r = pos.length().max(1e-4);
    let radial_dir = *pos / r;
    let radial = p.radial_amp * (t * 0.6 + r * 1.6).sin() - 0.18 * r + p.kick_level * 0.9 * (0.6 + low);

    let spin = 0.6 * (0.3 + hi);
    let swirl = Vec3::new(-y * spin * 0.02, x * spin * 0.02, 0.0);

    let force = flow + radial_dir * radial * 0.02 + swirl;
    let mut v = *vel * p.drag + force * p.calm();
    let mut next = *pos + v;

    for axis in 0..3 {
        if next[axis] > p.bounds {
            next[axis] = p.bounds;
            v[axis] *= WALL_RESTITUTION;
        } else if next[axis] < -p.bounds {
            next[axis] = -p.bounds;
            v[axis] *= WALL_RESTITUTION;
        }
    }
    // NaN input would otherwise escape the cube
    if !next.is_finite() {
        next = next.clamp(Vec3::splat(-p.bounds), Vec3::splat(p.bounds));
        if !next.is_finite() {
            next = Vec3::ZERO;
        }
        v = Vec3::ZERO;
    }

    *pos = next;
    *vel = v;
}

/// Multiplier over the last `1 - FADE_START` of the lifetime; 0 once expired
pub fn lifetime_fade(age: f32) -> f32 {
    let fade_start = NODE_LIFETIME * FADE_START;
    if age > NODE_LIFETIME {
        0.0
    } else if age > fade_start {
        1.0 - (age - fade_start) / (NODE_LIFETIME - fade_start)
    } else {
        1.0
    }
}

/// Inputs to [`particle_scale`]
#[derive(Debug, Clone, Copy)]
pub struct ScaleParams {
    pub t: f32,
    pub active: usize,
    pub graph_node: bool,
    pub mix: BandMix,
    pub kick_level: f32,
    pub audio_active: bool,
}

/// Rendered size of particle `index`; 0 means hidden
pub fn particle_scale(index: usize, spawn_time: Option<f32>, p: &ScaleParams) -> f32 {
    if index >= p.active {
        return 0.0;
    }

    let base = if p.graph_node {
        GRAPH_NODE_SCALE
    } else if p.audio_active {
        let BandMix { low, mid, hi } = p.mix;
        let amp = (low * 0.9 + mid * 0.7 + hi * 0.5).clamp(0.0, 1.0);
        0.6 + amp * 1.6 + p.kick_level * 0.8
    } else {
        0.0
    };

    match spawn_time {
        Some(spawned) => base * lifetime_fade(p.t - spawned),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::particles::{BOUNDS, DRAG, NOISE_AMP, RADIAL_AMP};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(audio_active: bool, energy: f32, kick_level: f32) -> MotionParams {
        MotionParams {
            t: 1.0,
            oscillation: 1.0,
            noise_amp: NOISE_AMP,
            radial_amp: RADIAL_AMP,
            bounds: BOUNDS,
            drag: DRAG,
            mix: BandMix {
                low: energy,
                mid: energy,
                hi: energy,
            },
            kick_level,
            audio_active,
            energy,
        }
    }

    #[test]
    fn test_sphere_points_within_shell() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let r = sphere_point(&mut rng, BOUNDS).length();
            assert!(r >= 0.15 * BOUNDS * SPAWN_RADIUS - 1e-4);
            assert!(r <= BOUNDS * SPAWN_RADIUS + 1e-4);
        }
    }

    #[test]
    fn test_paused_particles_only_coast() {
        let noise = NoiseField::default();
        let mut pos = Vec3::new(1.0, 2.0, 3.0);
        let mut vel = Vec3::new(0.1, 0.0, -0.1);
        let mut prev = Vec3::ZERO;
        step_particle(&mut pos, &mut vel, &mut prev, &noise, &params(false, 0.8, 1.0));
        assert_eq!(prev, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(vel, Vec3::new(0.1, 0.0, -0.1) * DRAG);
        assert_eq!(pos, prev + vel);
    }

    #[test]
    fn test_walls_reflect_inelastically() {
        let noise = NoiseField::default();
        let mut pos = Vec3::new(BOUNDS - 0.01, 0.0, -BOUNDS + 0.01);
        let mut vel = Vec3::new(1.0, 0.0, -1.0);
        let mut prev = Vec3::ZERO;
        step_particle(&mut pos, &mut vel, &mut prev, &noise, &params(false, 0.0, 0.0));
        assert_eq!(pos.x, BOUNDS);
        assert_eq!(pos.z, -BOUNDS);
        assert!((vel.x - DRAG * WALL_RESTITUTION).abs() < 1e-6);
        assert!((vel.z + DRAG * WALL_RESTITUTION).abs() < 1e-6);
    }

    #[test]
    fn test_containment_under_loud_input() {
        let noise = NoiseField::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = params(true, 1.0, 1.0);
        for _ in 0..50 {
            let mut pos = sphere_point(&mut rng, BOUNDS);
            let mut vel = Vec3::new(3.0, -4.0, 5.0);
            let mut prev = pos;
            for frame in 0..300 {
                p.t = frame as f32 / 60.0;
                step_particle(&mut pos, &mut vel, &mut prev, &noise, &p);
                assert!(pos.abs().max_element() <= BOUNDS);
            }
        }
    }

    #[test]
    fn test_nan_position_is_recovered() {
        let noise = NoiseField::default();
        let mut pos = Vec3::new(f32::NAN, 0.0, 0.0);
        let mut vel = Vec3::ZERO;
        let mut prev = Vec3::ZERO;
        step_particle(&mut pos, &mut vel, &mut prev, &noise, &params(true, 0.5, 0.0));
        assert!(pos.is_finite());
        assert!(pos.abs().max_element() <= BOUNDS);
    }

    #[test]
    fn test_lifetime_fade() {
        assert_eq!(lifetime_fade(0.0), 1.0);
        assert_eq!(lifetime_fade(NODE_LIFETIME * FADE_START), 1.0);
        let halfway = NODE_LIFETIME * (FADE_START + (1.0 - FADE_START) / 2.0);
        assert!((lifetime_fade(halfway) - 0.5).abs() < 1e-5);
        assert_eq!(lifetime_fade(NODE_LIFETIME + 0.01), 0.0);
    }

    #[test]
    fn test_scale_rules() {
        let mix = BandMix {
            low: 0.4,
            mid: 0.4,
            hi: 0.4,
        };
        let swarm = ScaleParams {
            t: 1.0,
            active: 10,
            graph_node: false,
            mix,
            kick_level: 0.5,
            audio_active: true,
        };
        assert_eq!(particle_scale(10, Some(0.0), &swarm), 0.0);
        let expected = 0.6 + (0.36 + 0.28 + 0.2) * 1.6 + 0.4;
        assert!((particle_scale(3, Some(0.0), &swarm) - expected).abs() < 1e-5);

        let paused = ScaleParams {
            audio_active: false,
            ..swarm
        };
        assert_eq!(particle_scale(3, Some(0.0), &paused), 0.0);

        let graph = ScaleParams {
            graph_node: true,
            audio_active: false,
            t: 100.0,
            ..swarm
        };
        assert_eq!(particle_scale(0, Some(99.0), &graph), GRAPH_NODE_SCALE);
        assert_eq!(particle_scale(0, Some(80.0), &graph), 0.0);
    }
}
