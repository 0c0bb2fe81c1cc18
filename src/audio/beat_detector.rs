use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::BandVector;
use crate::config::beat::{
    BEAT_HISTORY, DECAY_REFERENCE_FPS, DEFAULT_BPM, DEFAULT_KICK_SENSITIVITY, HIHAT_DECAY_FACTOR,
    HIHAT_THRESHOLD, KICK_THRESHOLD_BASE, KICK_THRESHOLD_RANGE, MAX_BPM, MIN_BEATS_FOR_BPM,
    MIN_BPM, ONSET_DECAY, OVERALL_WEIGHTS, SNARE_THRESHOLD,
};

/// Envelope of one drum voice
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnsetState {
    /// 1.0 on a hit, decaying exponentially toward 0 afterwards
    pub level: f32,
    /// True only on the tick the onset was detected
    pub is_hit: bool,
    /// Time of the last update in seconds, `None` before the first tick
    pub last_update: Option<f64>,
}

impl OnsetState {
    /// Advance the envelope to `now`. `decay` is the per-frame factor at 60 fps.
    fn step(&mut self, hit: bool, now: f64, decay: f32) {
        let dt = self
            .last_update
            .map(|last| (now - last).max(0.0) as f32)
            .unwrap_or(0.0);
        self.last_update = Some(now);
        self.is_hit = hit;
        self.level = if hit {
            1.0
        } else {
            self.level * decay.powf(dt * DECAY_REFERENCE_FPS)
        };
    }
}

/// Combined rhythm snapshot for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatFrame {
    /// Weighted kick/snare/hi-hat energy (0.0-1.0)
    pub overall: f32,
    pub bpm: u32,
    /// False while `bpm` is still the default
    pub bpm_estimated: bool,
    pub kick: OnsetState,
    pub snare: OnsetState,
    pub hihat: OnsetState,
}

impl Default for BeatFrame {
    fn default() -> Self {
        Self {
            overall: 0.0,
            bpm: DEFAULT_BPM,
            bpm_estimated: false,
            kick: OnsetState::default(),
            snare: OnsetState::default(),
            hihat: OnsetState::default(),
        }
    }
}

impl BeatFrame {
    /// True when any drum voice fired this tick
    pub fn any_hit(&self) -> bool {
        self.kick.is_hit || self.snare.is_hit || self.hihat.is_hit
    }
}

/// Per-instrument onset detector with a rolling BPM estimate.
///
/// Kick reads the sub-bass band, snare the low mids and hi-hat the top three
/// bands. A kick on the same tick suppresses the snare so one bass transient
/// is never counted twice.
pub struct BeatDetector {
    sensitivity: f32,
    kick: OnsetState,
    snare: OnsetState,
    hihat: OnsetState,
    overall: f32,
    bpm: u32,
    bpm_estimated: bool,
    beat_history: VecDeque<f64>,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(DEFAULT_KICK_SENSITIVITY)
    }
}

impl BeatDetector {
    pub fn new(sensitivity: f32) -> Self {
        let mut detector = Self {
            sensitivity: DEFAULT_KICK_SENSITIVITY,
            kick: OnsetState::default(),
            snare: OnsetState::default(),
            hihat: OnsetState::default(),
            overall: 0.0,
            bpm: DEFAULT_BPM,
            bpm_estimated: false,
            beat_history: VecDeque::with_capacity(BEAT_HISTORY + 1),
        };
        detector.set_sensitivity(sensitivity);
        detector
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = if sensitivity.is_finite() {
            sensitivity.clamp(0.0, 1.0)
        } else {
            DEFAULT_KICK_SENSITIVITY
        };
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn kick_threshold(&self) -> f32 {
        KICK_THRESHOLD_BASE + (1.0 - self.sensitivity) * KICK_THRESHOLD_RANGE
    }

    /// Run one detection tick. `now` is wall-clock time in seconds.
    pub fn update(&mut self, bands: &BandVector, now: f64) {
        let kick_trigger = bands[0];
        let kick_hit = kick_trigger > self.kick_threshold();
        self.kick.step(kick_hit, now, ONSET_DECAY);

        let snare_trigger = bands[3] * 0.7 + bands[4] * 0.3;
        let snare_hit = snare_trigger > SNARE_THRESHOLD && !kick_hit;
        self.snare.step(snare_hit, now, ONSET_DECAY);

        let hihat_trigger = bands[5] * 0.4 + bands[6] * 0.4 + bands[7] * 0.2;
        let hihat_hit = hihat_trigger > HIHAT_THRESHOLD;
        self.hihat.step(hihat_hit, now, ONSET_DECAY * HIHAT_DECAY_FACTOR);

        self.refresh_overall();

        if kick_hit || snare_hit {
            self.record_beat(now);
        }
    }

    /// Tick without a spectrum: envelopes decay, nothing fires and the beat
    /// history is left alone.
    pub fn idle(&mut self, now: f64) {
        self.kick.step(false, now, ONSET_DECAY);
        self.snare.step(false, now, ONSET_DECAY);
        self.hihat.step(false, now, ONSET_DECAY * HIHAT_DECAY_FACTOR);
        self.refresh_overall();
    }

    fn refresh_overall(&mut self) {
        let [wk, ws, wh] = OVERALL_WEIGHTS;
        let overall = self.kick.level * wk + self.snare.level * ws + self.hihat.level * wh;
        self.overall = if overall.is_nan() { 0.0 } else { overall.clamp(0.0, 1.0) };
    }

    fn record_beat(&mut self, now: f64) {
        self.beat_history.push_back(now);
        if self.beat_history.len() > BEAT_HISTORY {
            self.beat_history.pop_front();
        }

        if self.beat_history.len() >= MIN_BEATS_FOR_BPM {
            let intervals: Vec<f64> = self
                .beat_history
                .iter()
                .zip(self.beat_history.iter().skip(1))
                .map(|(a, b)| b - a)
                .collect();
            let avg_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
            self.bpm = bpm_from_interval(avg_interval);
            self.bpm_estimated = true;
        }
    }

    pub fn beat(&self) -> BeatFrame {
        BeatFrame {
            overall: self.overall,
            bpm: self.bpm,
            bpm_estimated: self.bpm_estimated,
            kick: self.kick,
            snare: self.snare,
            hihat: self.hihat,
        }
    }

    pub fn kick(&self) -> OnsetState {
        self.kick
    }

    /// Clear envelopes and beat history for a new track. Sensitivity is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.sensitivity);
    }
}

/// Convert an average beat interval in seconds to a clamped BPM
pub(crate) fn bpm_from_interval(interval_secs: f64) -> u32 {
    if !(interval_secs.is_finite() && interval_secs > 0.0) {
        return MAX_BPM;
    }
    let bpm = (60.0 / interval_secs).round();
    bpm.clamp(MIN_BPM as f64, MAX_BPM as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NUM_BANDS;

    const SILENT: BandVector = [0.0; NUM_BANDS];

    fn kick_bands() -> BandVector {
        [0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    }

    #[test]
    fn test_default_threshold() {
        let detector = BeatDetector::default();
        assert!((detector.kick_threshold() - 0.3825).abs() < 1e-6);
    }

    #[test]
    fn test_single_kick_pulse_then_decay() {
        let mut detector = BeatDetector::default();
        detector.update(&kick_bands(), 1.0);
        let beat = detector.beat();
        assert!(beat.kick.is_hit);
        assert_eq!(beat.kick.level, 1.0);
        assert!(!beat.snare.is_hit);

        let dt = 1.0 / 60.0;
        detector.update(&SILENT, 1.0 + dt);
        let beat = detector.beat();
        assert!(!beat.kick.is_hit);
        let expected = 0.85f32.powf(dt as f32 * 60.0);
        assert!((beat.kick.level - expected).abs() < 1e-5);
    }

    #[test]
    fn test_decay_law_over_uneven_steps() {
        let mut detector = BeatDetector::default();
        detector.update(&kick_bands(), 0.0);

        let steps = [0.013, 0.02, 0.4, 0.001, 0.3, 0.07, 1.25];
        let mut now = 0.0;
        for step in steps {
            now += step;
            detector.update(&SILENT, now);
            let expected = 0.85f32.powf(now as f32 * 60.0);
            let level = detector.kick().level;
            assert!(
                (level - expected).abs() <= 1e-4 * expected.max(1e-6) + 1e-9,
                "t={now} level={level} expected={expected}"
            );
        }
    }

    #[test]
    fn test_hihat_decays_faster_than_kick() {
        let mut detector = BeatDetector::default();
        let all = [0.9, 0.0, 0.0, 0.0, 0.0, 0.9, 0.9, 0.9];
        detector.update(&all, 0.0);
        detector.update(&SILENT, 0.1);
        let beat = detector.beat();
        assert!(beat.hihat.level < beat.kick.level);
    }

    #[test]
    fn test_kick_suppresses_snare() {
        let mut detector = BeatDetector::default();
        let both = [0.95, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        detector.update(&both, 0.0);
        let beat = detector.beat();
        assert!(beat.kick.is_hit);
        assert!(!beat.snare.is_hit);

        let snare_only = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        detector.update(&snare_only, 0.1);
        assert!(detector.beat().snare.is_hit);
    }

    #[test]
    fn test_silence_has_no_hits_and_zero_energy() {
        let mut detector = BeatDetector::default();
        for frame in 0..300 {
            detector.update(&SILENT, frame as f64 / 60.0);
            let beat = detector.beat();
            assert!(!beat.any_hit());
            assert_eq!(beat.overall, 0.0);
        }
        assert_eq!(detector.beat().bpm, DEFAULT_BPM);
        assert!(!detector.beat().bpm_estimated);
    }

    #[test]
    fn test_120_bpm_from_half_second_kicks() {
        let mut detector = BeatDetector::default();
        let mut now = 0.0;
        for _ in 0..6 {
            detector.update(&kick_bands(), now);
            detector.update(&SILENT, now + 0.1);
            now += 0.5;
        }
        let beat = detector.beat();
        assert!(beat.bpm_estimated);
        assert!((119..=121).contains(&beat.bpm));
    }

    #[test]
    fn test_idle_ticks_only_decay() {
        let mut detector = BeatDetector::default();
        detector.update(&kick_bands(), 0.0);
        detector.update(&kick_bands(), 0.5);
        for i in 1..=60 {
            detector.idle(0.5 + i as f64 / 60.0);
            let beat = detector.beat();
            assert!(!beat.any_hit());
        }
        let beat = detector.beat();
        let expected = 0.85f32.powf(60.0);
        assert!((beat.kick.level - expected).abs() < 1e-4);
        assert_eq!(beat.bpm, DEFAULT_BPM);
        assert!(!beat.bpm_estimated);
        assert_eq!(detector.beat_history.len(), 2);
    }

    #[test]
    fn test_bpm_persists_without_hits() {
        let mut detector = BeatDetector::default();
        for i in 0..4 {
            detector.update(&kick_bands(), i as f64 * 0.4);
        }
        let bpm = detector.beat().bpm;
        assert_eq!(bpm, 150);
        for i in 0..100 {
            detector.update(&SILENT, 2.0 + i as f64);
        }
        assert_eq!(detector.beat().bpm, bpm);
    }

    #[test]
    fn test_bpm_always_clamped() {
        for &interval in &[0.0, 1e-4, 0.05, 0.2, 0.5, 1.0, 3.0, 60.0] {
            let mut detector = BeatDetector::default();
            for i in 0..8 {
                detector.update(&kick_bands(), i as f64 * interval);
            }
            let bpm = detector.beat().bpm;
            assert!((MIN_BPM..=MAX_BPM).contains(&bpm), "interval {interval} -> {bpm}");
        }
    }

    #[test]
    fn test_reset_clears_history_keeps_sensitivity() {
        let mut detector = BeatDetector::new(0.8);
        for i in 0..5 {
            detector.update(&kick_bands(), i as f64 * 0.3);
        }
        detector.reset();
        let beat = detector.beat();
        assert_eq!(beat.bpm, DEFAULT_BPM);
        assert!(!beat.bpm_estimated);
        assert_eq!(beat.kick.level, 0.0);
        assert_eq!(detector.sensitivity(), 0.8);
    }
}
