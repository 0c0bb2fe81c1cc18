//! Configuration constants and the user-facing simulation settings

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::particles::color::ColorPreset;

/// Band analysis configuration
pub mod analysis {
    /// Number of frequency bands produced by both analysis paths
    pub const NUM_BANDS: usize = 8;

    /// Band edges in Hz. The last edge is clipped to Nyquist.
    pub const BAND_EDGES_HZ: [f32; NUM_BANDS + 1] =
        [20.0, 60.0, 150.0, 300.0, 600.0, 1200.0, 2400.0, 4800.0, 9600.0];

    /// Representative frequency per band, used for spectral centroid estimates
    pub const BAND_CENTERS_HZ: [f32; NUM_BANDS] =
        [40.0, 100.0, 225.0, 450.0, 900.0, 1800.0, 3600.0, 7200.0];

    /// Default analyser FFT window
    pub const DEFAULT_FFT_SIZE: usize = 2048;

    /// Allowed FFT sizes (inclusive, powers of two)
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32768;

    /// Peak-hold decay applied to each band per computation
    pub const PEAK_HOLD_DECAY: f32 = 0.9;

    /// Temporal smoothing of the byte spectrum (0.0-1.0, higher = slower)
    pub const DEFAULT_SMOOTHING: f32 = 0.6;

    /// Decibel window mapped onto 0-255
    pub const MIN_DECIBELS: f32 = -100.0;
    pub const MAX_DECIBELS: f32 = -30.0;
}

/// Beat detection configuration
pub mod beat {
    pub const DEFAULT_KICK_SENSITIVITY: f32 = 0.35;

    /// Kick threshold is `KICK_THRESHOLD_BASE + (1 - sensitivity) * KICK_THRESHOLD_RANGE`
    pub const KICK_THRESHOLD_BASE: f32 = 0.22;
    pub const KICK_THRESHOLD_RANGE: f32 = 0.25;

    pub const SNARE_THRESHOLD: f32 = 0.25;
    pub const HIHAT_THRESHOLD: f32 = 0.2;

    /// Per-frame envelope decay, referenced to 60 fps
    pub const ONSET_DECAY: f32 = 0.85;
    pub const HIHAT_DECAY_FACTOR: f32 = 0.9;
    pub const DECAY_REFERENCE_FPS: f32 = 60.0;

    /// Weights of kick/snare/hi-hat levels in the combined beat energy
    pub const OVERALL_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];

    pub const BEAT_HISTORY: usize = 8;
    pub const MIN_BEATS_FOR_BPM: usize = 4;

    pub const DEFAULT_BPM: u32 = 120;
    pub const MIN_BPM: u32 = 60;
    pub const MAX_BPM: u32 = 200;
}

/// Offline pre-scan configuration
pub mod prescan {
    /// Fixed analysis rate of the frequency map
    pub const ANALYSIS_FPS: u32 = 30;

    /// A frame is a beat candidate when its sub-bass band exceeds this
    pub const BEAT_THRESHOLD: f32 = 0.25;

    /// Progress is reported every N frames
    pub const PROGRESS_INTERVAL: usize = 10;

    /// The async scan yields to the runtime every N frames
    pub const YIELD_INTERVAL: usize = 50;

    /// Default duration ceiling for the CLI (seconds)
    pub const DEFAULT_MAX_DURATION_SECS: f64 = 3600.0;
}

/// Particle field configuration
pub mod particles {
    pub const DEFAULT_GRID_SIZE: usize = 40;
    pub const MIN_GRID_SIZE: usize = 10;
    pub const MAX_GRID_SIZE: usize = 100;

    /// Half-extent of the simulation cube
    pub const BOUNDS: f32 = 9.0;

    /// Velocity damping per frame
    pub const DRAG: f32 = 0.94;

    /// Restitution applied when a particle hits a wall
    pub const WALL_RESTITUTION: f32 = -0.6;

    /// Seconds a spawned particle stays alive
    pub const NODE_LIFETIME: f32 = 15.0;

    /// Fraction of the lifetime after which particles start fading
    pub const FADE_START: f32 = 0.7;

    /// Spawn sphere radius as a fraction of `BOUNDS`
    pub const SPAWN_RADIUS: f32 = 0.6;

    pub const GAMMA: f32 = 1.4;
    pub const NOISE_AMP: f32 = 1.0;
    pub const RADIAL_AMP: f32 = 0.6;
    pub const NOISE_SEED: u32 = 2024;

    /// Energy at or below this counts as silence for spawning
    pub const IDLE_ENERGY: f32 = 0.02;

    /// Early-fire tolerance on the BPM cadence (seconds)
    pub const CADENCE_SLACK: f32 = 0.05;

    /// Placement jitter per axis, as a fraction of `BOUNDS` (total span)
    pub const PLACEMENT_JITTER: f32 = 0.12;

    /// Smoothing half-lives for UI-driven parameters (seconds)
    pub const PARAM_HALF_LIFE: f32 = 0.25;
    pub const SPAWN_RATE_HALF_LIFE: f32 = 0.35;
    pub const COLOR_BLEND_SECS: f32 = 0.35;

    /// Scale of a static graph node
    pub const GRAPH_NODE_SCALE: f32 = 0.8;
}

/// How newly activated particles behave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    /// Every particle is active while audio plays and flows through the noise field
    #[default]
    Swarm,
    /// Particles appear one per beat at audio-derived positions and stay put
    Graph,
}

/// User-adjustable settings for the particle field.
///
/// Values arrive from UI controls and may be out of range; call
/// [`SimulationConfig::sanitized`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Flow-field strength (0.0-1.0)
    pub oscillation: f32,

    /// Trail persistence (0.0-1.0)
    pub trail_strength: f32,

    /// Particle grid edge; the pool holds `grid_size²` particles
    pub grid_size: usize,

    /// Particles per second spawned before a BPM is known
    pub spawn_rate: f32,

    /// Kick detector sensitivity (0.0-1.0)
    pub kick_sensitivity: f32,

    pub color_preset: ColorPreset,

    pub spawn_mode: SpawnMode,

    /// Fixed RNG seed for reproducible layouts
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            oscillation: 0.7,
            trail_strength: 0.6,
            grid_size: particles::DEFAULT_GRID_SIZE,
            spawn_rate: 120.0,
            kick_sensitivity: beat::DEFAULT_KICK_SENSITIVITY,
            color_preset: ColorPreset::default(),
            spawn_mode: SpawnMode::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Clamp every field into its documented range
    pub fn sanitized(&self) -> Self {
        let unit = |v: f32, fallback: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { fallback };
        Self {
            oscillation: unit(self.oscillation, 0.7),
            trail_strength: unit(self.trail_strength, 0.6),
            grid_size: self
                .grid_size
                .clamp(particles::MIN_GRID_SIZE, particles::MAX_GRID_SIZE),
            spawn_rate: if self.spawn_rate.is_finite() { self.spawn_rate.max(1.0) } else { 1.0 },
            kick_sensitivity: unit(self.kick_sensitivity, beat::DEFAULT_KICK_SENSITIVITY),
            color_preset: self.color_preset,
            spawn_mode: self.spawn_mode,
            seed: self.seed,
        }
    }

    /// Number of particles in the pool
    pub fn particle_count(&self) -> usize {
        let size = self
            .grid_size
            .clamp(particles::MIN_GRID_SIZE, particles::MAX_GRID_SIZE);
        size * size
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&json)?;
        Ok(config.sanitized())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_count_is_1600() {
        let config = SimulationConfig::default();
        assert_eq!(config.particle_count(), 1600);
    }

    #[test]
    fn test_sanitized_clamps_ranges() {
        let config = SimulationConfig {
            oscillation: 3.0,
            trail_strength: -1.0,
            grid_size: 500,
            spawn_rate: 0.0,
            kick_sensitivity: f32::NAN,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.oscillation, 1.0);
        assert_eq!(config.trail_strength, 0.0);
        assert_eq!(config.grid_size, particles::MAX_GRID_SIZE);
        assert_eq!(config.spawn_rate, 1.0);
        assert_eq!(config.kick_sensitivity, beat::DEFAULT_KICK_SENSITIVITY);
    }

    #[test]
    fn test_json_round_trip_with_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "grid_size": 5, "spawn_mode": "graph" }"#).unwrap();

        let config = SimulationConfig::load_json(&path).unwrap();
        assert_eq!(config.grid_size, particles::MIN_GRID_SIZE);
        assert_eq!(config.spawn_mode, SpawnMode::Graph);
        assert_eq!(config.oscillation, 0.7);

        config.save_json(&path).unwrap();
        let reloaded = SimulationConfig::load_json(&path).unwrap();
        assert_eq!(reloaded, config);
    }
}
