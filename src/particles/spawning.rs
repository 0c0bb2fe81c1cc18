//! Activation counter for the particle pool

use crate::audio::{dominant_band, BandVector, BeatFrame};
use crate::config::particles::{CADENCE_SLACK, IDLE_ENERGY};

/// Tracks how many particles of the pool are live.
///
/// The count is fractional so the spawn-rate fallback can add less than one
/// particle per frame; callers read [`SpawnController::active_count`].
#[derive(Debug, Clone, Default)]
pub struct SpawnController {
    active: f32,
    last_beat_time: Option<f32>,
}

impl SpawnController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole particles currently active
    pub fn active_count(&self) -> usize {
        self.active.max(0.0).floor() as usize
    }

    pub fn active(&self) -> f32 {
        self.active
    }

    pub fn last_beat_time(&self) -> Option<f32> {
        self.last_beat_time
    }

    /// Swarm mode: the whole pool while playing, nothing while paused
    pub fn set_all(&mut self, playing: bool, count: usize) {
        self.active = if playing { count as f32 } else { 0.0 };
    }

    /// Graph mode: one particle per beat.
    ///
    /// With an estimated tempo a particle is added on each cadence tick
    /// (every `60 / bpm` seconds, with a little early slack) and on every
    /// instrument hit; either one restarts the cadence timer. Without a tempo
    /// the pool fills at `spawn_rate` particles per second. Near-silence drains
    /// it at 1.2 times that rate.
    pub fn update_graph(
        &mut self,
        energy: f32,
        beat: Option<&BeatFrame>,
        t: f32,
        spawn_rate: f32,
        dt: f32,
        count: usize,
    ) {
        let count = count as f32;

        if energy <= IDLE_ENERGY {
            self.active = (self.active - spawn_rate * 1.2 * dt).max(0.0);
            return;
        }

        match beat.filter(|b| b.bpm_estimated && b.bpm > 0) {
            Some(beat) => {
                let interval = 60.0 / beat.bpm as f32;
                let cadence_due = self
                    .last_beat_time
                    .map_or(true, |last| t - last >= interval - CADENCE_SLACK);
                if cadence_due || beat.any_hit() {
                    self.last_beat_time = Some(t);
                    self.active = (self.active + 1.0).min(count);
                }
            }
            None => {
                self.active = (self.active + spawn_rate * dt).min(count);
            }
        }
    }

    /// Drop back to an empty pool; `keep_cadence` preserves the beat timer
    pub fn clear(&mut self, keep_cadence: bool) {
        self.active = 0.0;
        if !keep_cadence {
            self.last_beat_time = None;
        }
    }
}

/// Color band for a new node: the strongest weighted band
pub fn assign_band(weights: &BandVector) -> i8 {
    dominant_band(weights) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OnsetState;

    const DT: f32 = 1.0 / 60.0;

    fn tempo(bpm: u32) -> BeatFrame {
        BeatFrame {
            bpm,
            bpm_estimated: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_swarm_is_all_or_nothing() {
        let mut spawn = SpawnController::new();
        spawn.set_all(true, 1600);
        assert_eq!(spawn.active_count(), 1600);
        spawn.set_all(false, 1600);
        assert_eq!(spawn.active_count(), 0);
    }

    #[test]
    fn test_fallback_rate_before_tempo_is_known() {
        let mut spawn = SpawnController::new();
        let unknown = BeatFrame::default();
        spawn.update_graph(0.5, Some(&unknown), 0.1, 120.0, 0.1, 1000);
        assert!((spawn.active() - 12.0).abs() < 1e-4);
        spawn.update_graph(0.5, None, 0.2, 120.0, 0.1, 1000);
        assert!((spawn.active() - 24.0).abs() < 1e-4);
        spawn.update_graph(0.5, None, 0.3, 120.0, 100.0, 1000);
        assert_eq!(spawn.active_count(), 1000);
    }

    #[test]
    fn test_one_per_cadence_tick() {
        let mut spawn = SpawnController::new();
        let beat = tempo(120);
        let mut t = 0.0;
        let mut previous = 0.0;
        for _ in 0..600 {
            t += DT;
            spawn.update_graph(0.5, Some(&beat), t, 120.0, DT, 10_000);
            assert!(spawn.active() >= previous);
            assert!(spawn.active() - previous <= 1.0);
            previous = spawn.active();
        }
        // 10 s at 0.45 s minimum spacing, first tick spawns immediately
        let n = spawn.active_count();
        assert!((20..=23).contains(&n), "{n}");
    }

    #[test]
    fn test_hits_spawn_and_reset_cadence() {
        let mut spawn = SpawnController::new();
        let mut beat = tempo(60);
        spawn.update_graph(0.5, Some(&beat), 0.0, 120.0, DT, 100);
        assert_eq!(spawn.active_count(), 1);

        beat.hihat = OnsetState {
            level: 1.0,
            is_hit: true,
            last_update: Some(0.1),
        };
        spawn.update_graph(0.5, Some(&beat), 0.1, 120.0, DT, 100);
        assert_eq!(spawn.active_count(), 2);
        assert_eq!(spawn.last_beat_time(), Some(0.1));

        beat.hihat.is_hit = false;
        spawn.update_graph(0.5, Some(&beat), 1.0, 120.0, DT, 100);
        assert_eq!(spawn.active_count(), 2);
        spawn.update_graph(0.5, Some(&beat), 1.06, 120.0, DT, 100);
        assert_eq!(spawn.active_count(), 3);
    }

    #[test]
    fn test_reaches_capacity_and_stops() {
        let mut spawn = SpawnController::new();
        let beat = tempo(200);
        let mut t = 0.0;
        for _ in 0..2000 {
            t += DT;
            spawn.update_graph(0.5, Some(&beat), t, 120.0, DT, 50);
        }
        assert_eq!(spawn.active_count(), 50);
    }

    #[test]
    fn test_idle_drains() {
        let mut spawn = SpawnController::new();
        spawn.update_graph(0.5, None, 0.0, 100.0, 0.5, 1000);
        assert_eq!(spawn.active_count(), 50);
        spawn.update_graph(0.01, None, 0.5, 100.0, 0.25, 1000);
        assert!((spawn.active() - 20.0).abs() < 1e-3);
        spawn.update_graph(0.0, None, 0.75, 100.0, 10.0, 1000);
        assert_eq!(spawn.active(), 0.0);
    }

    #[test]
    fn test_assign_band() {
        assert_eq!(assign_band(&[0.0, 0.2, 0.9, 0.1, 0.0, 0.0, 0.0, 0.0]), 2);
        assert_eq!(assign_band(&[0.0; 8]), 0);
    }
}
