//! Where a newly spawned graph node goes

use glam::Vec3;
use rand::Rng;

use super::map_range;
use crate::audio::{BandVector, BeatFrame, FrequencyFrame, OfflineScanResult};
use crate::config::analysis::BAND_CENTERS_HZ;
use crate::config::particles::PLACEMENT_JITTER;

/// Which data positions a new node, in priority order
#[derive(Debug, Clone, Copy)]
pub enum PlacementSource<'a> {
    /// Whole-track scan: node index maps to a point in the track
    Prescan(&'a OfflineScanResult),
    /// Live detector output: the instrument that fired picks the region
    LiveBeat(&'a BeatFrame),
    /// Band weights only
    Fallback,
}

impl<'a> PlacementSource<'a> {
    pub fn select(prescan: Option<&'a OfflineScanResult>, beat: Option<&'a BeatFrame>) -> Self {
        match (prescan, beat) {
            (Some(scan), _) if !scan.frequency_map.is_empty() => PlacementSource::Prescan(scan),
            (_, Some(beat)) => PlacementSource::LiveBeat(beat),
            _ => PlacementSource::Fallback,
        }
    }
}

/// Live audio features at the moment of spawning
#[derive(Debug, Clone, Copy)]
pub struct PlacementInput<'a> {
    pub index: usize,
    pub count: usize,
    /// Gamma-corrected bands
    pub weights: &'a BandVector,
    pub energy: f32,
    pub bounds: f32,
}

/// Position for node `input.index`, jittered and clamped to the cube
pub fn place<R: Rng>(source: PlacementSource<'_>, input: &PlacementInput<'_>, rng: &mut R) -> Vec3 {
    let base = base_position(source, input);
    let b = input.bounds;
    let mut jitter = || (rng.random::<f32>() - 0.5) * PLACEMENT_JITTER * b;
    let jittered = base + Vec3::new(jitter(), jitter(), jitter());
    jittered.clamp(Vec3::splat(-b), Vec3::splat(b))
}

/// Un-jittered position
pub fn base_position(source: PlacementSource<'_>, input: &PlacementInput<'_>) -> Vec3 {
    match source {
        PlacementSource::Prescan(scan) => match prescan_frame(scan, input.index, input.count) {
            Some(frame) => from_prescan_frame(frame, input.bounds),
            None => fallback(input),
        },
        PlacementSource::LiveBeat(beat) => from_beat(beat, input),
        PlacementSource::Fallback => fallback(input),
    }
}

/// Frame of the track that node `index` of `count` represents
fn prescan_frame(scan: &OfflineScanResult, index: usize, count: usize) -> Option<&FrequencyFrame> {
    if count == 0 {
        return None;
    }
    scan.frame_wrapping(index as f64 / count as f64 * scan.duration)
}

fn from_prescan_frame(frame: &FrequencyFrame, bounds: f32) -> Vec3 {
    let w = &frame.bands;
    let total: f32 = w.iter().sum();

    // X: spectral centroid on a log axis
    let weighted: f32 = w.iter().zip(BAND_CENTERS_HZ.iter()).map(|(v, hz)| v * hz).sum();
    let centroid = weighted / (total + 0.001);
    let px = map_range((centroid + 1.0).log10(), 1.5, 4.0, -bounds, bounds);

    // Y: high vs low balance
    let low = w[0] + w[1];
    let mid = w[2] + w[3] + w[4];
    let high = w[5] + w[6] + w[7];
    let balance = (high - low) / (high + mid + low + 0.001);
    let py = map_range(balance, -1.0, 1.0, -bounds, bounds);

    let pz = map_range(frame.energy, 0.0, 1.0, -bounds * 0.5, bounds * 0.5);
    Vec3::new(px, py, pz)
}

fn from_beat(beat: &BeatFrame, input: &PlacementInput<'_>) -> Vec3 {
    let w = input.weights;
    let h = input.bounds;

    if beat.kick.is_hit {
        // left half
        Vec3::new(
            map_range(w[0], 0.0, 1.0, -h * 0.8, -h * 0.3),
            map_range(w[1], 0.0, 1.0, -h * 0.5, h * 0.5),
            map_range(beat.kick.level, 0.0, 1.0, -h, h),
        )
    } else if beat.snare.is_hit {
        // right half
        Vec3::new(
            map_range(w[3], 0.0, 1.0, h * 0.3, h * 0.8),
            map_range(w[2], 0.0, 1.0, -h * 0.5, h * 0.5),
            map_range(beat.snare.level, 0.0, 1.0, -h, h),
        )
    } else if beat.hihat.is_hit {
        Vec3::new(
            map_range(w[6] - w[5], -1.0, 1.0, -h * 0.5, h * 0.5),
            map_range(w[7], 0.0, 1.0, -h * 0.5, h * 0.5),
            map_range(beat.hihat.level, 0.0, 1.0, -h, h),
        )
    } else {
        // cadence tick with no instrument: tilt by bass against treble
        let bass = (w[0] + w[1]) / 2.0;
        let treble = (w[6] + w[7]) / 2.0;
        let mid = (w[2] + w[3] + w[4]) / 3.0;
        Vec3::new(
            map_range(bass - treble, -1.0, 1.0, -h, h),
            map_range(mid, 0.0, 1.0, -h, h),
            map_range(input.energy, 0.0, 1.0, -h, h),
        )
    }
}

fn fallback(input: &PlacementInput<'_>) -> Vec3 {
    let w = input.weights;
    let h = input.bounds;
    Vec3::new(
        map_range(w[0] - w[7], -1.0, 1.0, -h, h),
        map_range((w[2] + w[3] + w[4]) / 3.0, 0.0, 1.0, -h, h),
        map_range(input.energy, 0.0, 1.0, -h, h),
    )
}
