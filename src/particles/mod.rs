pub mod color;
pub mod motion;
pub mod noise;
pub mod placement;
pub mod spawning;
pub mod trails;

pub use color::{ColorBlend, ColorPreset};
pub use noise::NoiseField;
pub use placement::PlacementSource;
pub use spawning::SpawnController;
pub use trails::{fade_opacity, EdgeList, Segment, TrailBuffer};

use glam::Vec3;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use crate::audio::{sanitize_bands, BandVector, BeatFrame, OfflineScanResult, NUM_BANDS};
use crate::config::particles::{
    BOUNDS, DRAG, GAMMA, MAX_GRID_SIZE, MIN_GRID_SIZE, NODE_LIFETIME, NOISE_AMP, NOISE_SEED,
    PARAM_HALF_LIFE, RADIAL_AMP, SPAWN_RATE_HALF_LIFE,
};
use crate::config::{SimulationConfig, SpawnMode};
use motion::{MotionParams, ScaleParams};
use placement::PlacementInput;

/// Linear map from one interval onto another; a collapsed input interval maps to `out_min`
pub fn map_range(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    if in_max == in_min {
        return out_min;
    }
    let t = (value - in_min) / (in_max - in_min);
    out_min + (out_max - out_min) * t
}

/// Gamma-corrected bands folded into three registers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandMix {
    /// Sub-bass plus 0.6 of bass
    pub low: f32,
    pub mid: f32,
    pub hi: f32,
}

impl BandMix {
    pub fn from_weights(w: &BandVector) -> Self {
        Self {
            low: w[0] + w[1] * 0.6,
            mid: (w[2] + w[3] + w[4]) / 3.0,
            hi: (w[5] + w[6] + w[7]) / 3.0,
        }
    }

    pub fn energy(&self) -> f32 {
        ((self.low + self.mid + self.hi) / 3.0).clamp(0.0, 1.0)
    }
}

/// Bands raised to `gamma` after clamping into 0.0-1.0
pub fn band_weights(bands: &BandVector, gamma: f32) -> BandVector {
    let mut weights = sanitize_bands(bands);
    for w in weights.iter_mut() {
        *w = w.powf(gamma);
    }
    weights
}

/// Value that eases toward a target with a fixed half-life
#[derive(Debug, Clone, Copy, PartialEq)]
struct Smoothed {
    current: f32,
    target: f32,
    half_life: f32,
}

impl Smoothed {
    fn new(value: f32, half_life: f32) -> Self {
        Self {
            current: value,
            target: value,
            half_life,
        }
    }

    fn step(&mut self, dt: f32) {
        self.current = self.target + (self.current - self.target) * 0.5f32.powf(dt / self.half_life);
    }
}

/// Structure-of-arrays storage for the particle pool.
///
/// All vectors always have the same length; a density change builds a new
/// arena rather than resizing this one.
#[derive(Debug, Clone)]
pub struct ParticleArena {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub previous: Vec<Vec3>,
    /// `None` until the particle is first activated
    pub spawn_times: Vec<Option<f32>>,
    /// Color band, -1 while unassigned
    pub band_of: Vec<i8>,
}

impl ParticleArena {
    pub fn new(count: usize, bounds: f32, rng: &mut StdRng) -> Self {
        let mut arena = Self {
            positions: vec![Vec3::ZERO; count],
            velocities: vec![Vec3::ZERO; count],
            previous: vec![Vec3::ZERO; count],
            spawn_times: vec![None; count],
            band_of: vec![-1; count],
        };
        arena.scatter(bounds, rng);
        arena
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Fresh random sphere positions, zero velocity, nothing spawned
    pub fn scatter(&mut self, bounds: f32, rng: &mut StdRng) {
        for i in 0..self.len() {
            let p = motion::sphere_point(rng, bounds);
            self.positions[i] = p;
            self.previous[i] = p;
            self.velocities[i] = Vec3::ZERO;
            self.spawn_times[i] = None;
            self.band_of[i] = -1;
        }
    }

    fn respawn(&mut self, i: usize, t: f32, bounds: f32, rng: &mut StdRng) {
        let p = motion::sphere_point(rng, bounds);
        self.positions[i] = p;
        self.velocities[i] = Vec3::ZERO;
        self.spawn_times[i] = Some(t);
    }
}

/// The audio-driven particle field.
///
/// Owns the pool, its clock and every tuning value; the host feeds it one
/// band vector (plus the beat frame when available) per rendered frame and
/// reads positions, scales and colors back.
pub struct ParticleSimulation {
    grid_size: usize,
    bounds: f32,
    spawn_mode: SpawnMode,

    oscillation: Smoothed,
    trail_strength: Smoothed,
    spawn_rate: Smoothed,
    colors: ColorBlend,

    noise: NoiseField,
    rng: StdRng,
    arena: ParticleArena,
    scales: Vec<f32>,
    spawner: SpawnController,
    trails: TrailBuffer,
    edges: EdgeList,
    prescan: Option<Arc<OfflineScanResult>>,

    time: f32,
    energy: f32,
    audio_active: bool,
}

impl ParticleSimulation {
    pub fn new(config: &SimulationConfig) -> Self {
        let config = config.sanitized();
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let count = config.particle_count();
        let arena = ParticleArena::new(count, BOUNDS, &mut rng);

        Self {
            grid_size: config.grid_size,
            bounds: BOUNDS,
            spawn_mode: config.spawn_mode,
            oscillation: Smoothed::new(config.oscillation, PARAM_HALF_LIFE),
            trail_strength: Smoothed::new(config.trail_strength, PARAM_HALF_LIFE),
            spawn_rate: Smoothed::new(config.spawn_rate, SPAWN_RATE_HALF_LIFE),
            colors: ColorBlend::new(config.color_preset),
            noise: NoiseField::new(NOISE_SEED),
            rng,
            arena,
            scales: vec![0.0; count],
            spawner: SpawnController::new(),
            trails: TrailBuffer::new(count),
            edges: EdgeList::new(count),
            prescan: None,
            time: 0.0,
            energy: 0.0,
            audio_active: false,
        }
    }

    /// Advance the field by `dt` seconds.
    ///
    /// `beat` is `None` when no detector is running. Missing or garbage input
    /// degrades to still, invisible particles.
    pub fn update(&mut self, bands: &BandVector, beat: Option<&BeatFrame>, dt: f32, audio_active: bool) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.time += dt;
        let t = self.time;

        self.oscillation.step(dt);
        self.trail_strength.step(dt);
        self.spawn_rate.step(dt);
        self.colors.advance(dt);

        let weights = band_weights(bands, GAMMA);
        let mix = BandMix::from_weights(&weights);
        let energy = if audio_active { mix.energy() } else { 0.0 };
        let kick_level = beat.map_or(0.0, |b| b.kick.level);
        self.energy = energy;
        self.audio_active = audio_active;

        let count = self.arena.len();
        let graph = self.spawn_mode == SpawnMode::Graph;
        let prev_active = self.spawner.active_count();
        if graph {
            self.spawner
                .update_graph(energy, beat, t, self.spawn_rate.current, dt, count);
        } else {
            self.spawner.set_all(audio_active, count);
        }
        let active = self.spawner.active_count().min(count);

        if active > prev_active {
            self.activate(prev_active..active, &weights, energy, beat, graph);
        }

        let motion = MotionParams {
            t,
            oscillation: self.oscillation.current,
            noise_amp: NOISE_AMP,
            radial_amp: RADIAL_AMP,
            bounds: self.bounds,
            drag: DRAG,
            mix,
            kick_level,
            audio_active,
            energy,
        };
        let mut scale = ScaleParams {
            t,
            active,
            graph_node: false,
            mix,
            kick_level,
            audio_active,
        };

        let arena = &mut self.arena;
        for i in 0..count {
            if graph && i < active {
                // graph nodes stay where they were placed
                scale.graph_node = true;
                self.scales[i] = motion::particle_scale(i, arena.spawn_times[i], &scale);
                continue;
            }

            if !graph {
                if let Some(spawned) = arena.spawn_times[i] {
                    if t - spawned > NODE_LIFETIME {
                        arena.respawn(i, t, self.bounds, &mut self.rng);
                    }
                }
            }

            motion::step_particle(
                &mut arena.positions[i],
                &mut arena.velocities[i],
                &mut arena.previous[i],
                &self.noise,
                &motion,
            );
            scale.graph_node = false;
            self.scales[i] = motion::particle_scale(i, arena.spawn_times[i], &scale);
        }

        if graph {
            self.trails.clear();
        } else {
            self.trails
                .update(&self.arena.positions, &self.arena.previous, active);
        }
    }

    fn activate(
        &mut self,
        range: std::ops::Range<usize>,
        weights: &BandVector,
        energy: f32,
        beat: Option<&BeatFrame>,
        graph: bool,
    ) {
        let t = self.time;
        if !graph {
            for i in range {
                self.arena.spawn_times[i] = Some(t);
            }
            return;
        }

        let count = self.arena.len();
        let band = spawning::assign_band(weights);
        for i in range {
            let source = PlacementSource::select(self.prescan.as_deref(), beat);
            let input = PlacementInput {
                index: i,
                count,
                weights,
                energy,
                bounds: self.bounds,
            };
            let pos = placement::place(source, &input, &mut self.rng);

            self.arena.spawn_times[i] = Some(t);
            self.arena.band_of[i] = band;
            self.arena.positions[i] = pos;
            self.arena.previous[i] = pos;
            self.arena.velocities[i] = Vec3::ZERO;

            if i > 0 {
                let from = self.arena.positions[i - 1];
                self.edges.connect(i, from, pos);
            }
        }
    }

    /// Change the grid edge (clamped to 10..=100) and rebuild the pool
    pub fn set_density(&mut self, grid_size: usize) {
        let size = grid_size.clamp(MIN_GRID_SIZE, MAX_GRID_SIZE);
        if size == self.grid_size {
            return;
        }
        let count = size * size;
        info!("Rebuilding particle pool: {} -> {} particles", self.arena.len(), count);

        self.grid_size = size;
        self.arena = ParticleArena::new(count, self.bounds, &mut self.rng);
        self.scales = vec![0.0; count];
        self.trails = TrailBuffer::new(count);
        self.edges = EdgeList::new(count);
        self.spawner.clear(true);
    }

    /// Forget everything about the previous track.
    ///
    /// Positions are re-scattered, counters zeroed, the clock restarted and
    /// any pre-scan dropped.
    pub fn reset_for_new_track(&mut self) {
        debug!("Resetting particle field for new track");
        self.spawner.clear(false);
        self.edges.reset();
        self.trails.clear();
        self.time = 0.0;
        self.energy = 0.0;
        self.prescan = None;
        self.arena.scatter(self.bounds, &mut self.rng);
        self.scales.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Install (or clear) the whole-track scan used for graph placement
    pub fn set_prescan(&mut self, prescan: Option<Arc<OfflineScanResult>>) {
        self.prescan = prescan;
    }

    pub fn prescan(&self) -> Option<&Arc<OfflineScanResult>> {
        self.prescan.as_ref()
    }

    pub fn set_oscillation(&mut self, value: f32) {
        self.oscillation.target = unit_or(value, self.oscillation.target);
    }

    pub fn set_trail_strength(&mut self, value: f32) {
        self.trail_strength.target = unit_or(value, self.trail_strength.target);
    }

    pub fn set_spawn_rate(&mut self, per_second: f32) {
        self.spawn_rate.target = if per_second.is_finite() { per_second.max(1.0) } else { 1.0 };
    }

    pub fn set_color_preset(&mut self, preset: ColorPreset) {
        self.colors.set_preset(preset);
    }

    pub fn set_spawn_mode(&mut self, mode: SpawnMode) {
        if mode != self.spawn_mode {
            debug!("Spawn mode {:?} -> {:?}", self.spawn_mode, mode);
            self.spawn_mode = mode;
            self.spawner.clear(true);
            self.edges.reset();
        }
    }

    /// Apply a settings snapshot; sliders ease in, density rebuilds
    pub fn apply_config(&mut self, config: &SimulationConfig) {
        let config = config.sanitized();
        self.set_oscillation(config.oscillation);
        self.set_trail_strength(config.trail_strength);
        self.set_spawn_rate(config.spawn_rate);
        if config.color_preset != self.colors.current() {
            self.set_color_preset(config.color_preset);
        }
        self.set_spawn_mode(config.spawn_mode);
        self.set_density(config.grid_size);
    }

    pub fn count(&self) -> usize {
        self.arena.len()
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn bounds(&self) -> f32 {
        self.bounds
    }

    pub fn spawn_mode(&self) -> SpawnMode {
        self.spawn_mode
    }

    pub fn active_count(&self) -> usize {
        self.spawner.active_count().min(self.arena.len())
    }

    /// Seconds since construction or the last track reset
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Energy used this frame (0 while paused)
    pub fn energy(&self) -> f32 {
        self.energy
    }

    pub fn oscillation(&self) -> f32 {
        self.oscillation.current
    }

    pub fn trail_strength(&self) -> f32 {
        self.trail_strength.current
    }

    pub fn spawn_rate(&self) -> f32 {
        self.spawn_rate.current
    }

    pub fn arena(&self) -> &ParticleArena {
        &self.arena
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.arena.positions
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn band_of(&self) -> &[i8] {
        &self.arena.band_of
    }

    /// Trail segments for swarm mode; empty in graph mode
    pub fn trail_segments(&self) -> &[Segment] {
        self.trails.segments()
    }

    /// Node-to-node edges in graph mode
    pub fn edges(&self) -> &[Segment] {
        match self.spawn_mode {
            SpawnMode::Graph => self.edges.edges(),
            SpawnMode::Swarm => &[],
        }
    }

    pub fn fade_opacity(&self) -> f32 {
        fade_opacity(self.trail_strength.current, self.audio_active)
    }

    /// Color of particle `i`: its band on the gradient, or its pool position when unassigned
    pub fn color_of(&self, i: usize) -> Vec3 {
        let t = match self.arena.band_of.get(i) {
            Some(&band) if band >= 0 => band as f32 / (NUM_BANDS - 1) as f32,
            _ => i as f32 / self.arena.len().saturating_sub(1).max(1) as f32,
        };
        self.colors.sample(t)
    }

    pub fn colors(&self) -> Vec<Vec3> {
        (0..self.arena.len()).map(|i| self.color_of(i)).collect()
    }
}

fn unit_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
