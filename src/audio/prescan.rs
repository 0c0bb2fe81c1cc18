use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use super::bands::{band_ranges, hz_per_bin, normalize_fft_size, BinRange};
use super::beat_detector::bpm_from_interval;
use super::scan_task::CancelToken;
use super::{BandVector, DecodedAudio, NUM_BANDS};
use crate::config::analysis::DEFAULT_FFT_SIZE;
use crate::config::beat::{DEFAULT_BPM, MIN_BEATS_FOR_BPM};
use crate::config::prescan::{ANALYSIS_FPS, BEAT_THRESHOLD, PROGRESS_INTERVAL, YIELD_INTERVAL};
use crate::error::{Result, VixelError};

/// Band snapshot for one 1/30 s slice of the track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyFrame {
    /// Start of the slice in seconds
    pub time: f64,
    /// Bands normalized by the loudest band of this slice
    pub bands: BandVector,
    /// Mean of `bands`
    pub energy: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicRange {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

/// Whole-track analysis produced ahead of playback.
///
/// Immutable once produced. Hosts share it behind an `Arc` so the particle
/// field only ever sees a complete result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineScanResult {
    pub duration: f64,
    pub bpm: u32,
    #[serde(alias = "beats")]
    pub beat_timestamps: Vec<f64>,
    pub frequency_map: Vec<FrequencyFrame>,
    pub dynamic_range: DynamicRange,
    pub sample_rate: u32,
    #[serde(alias = "analysisTime")]
    pub analysis_time_seconds: f64,
}

impl OfflineScanResult {
    pub fn frame_count(&self) -> usize {
        self.frequency_map.len()
    }

    /// Frame covering `time`, clamped to the ends of the track
    pub fn frame_at(&self, time: f64) -> Option<&FrequencyFrame> {
        self.frame_index(time, false)
            .and_then(|i| self.frequency_map.get(i))
    }

    /// Frame covering `time`, wrapping past the end back to the start
    pub fn frame_wrapping(&self, time: f64) -> Option<&FrequencyFrame> {
        self.frame_index(time, true)
            .and_then(|i| self.frequency_map.get(i))
    }

    fn frame_index(&self, time: f64, wrap: bool) -> Option<usize> {
        let len = self.frequency_map.len();
        if len == 0 {
            return None;
        }
        if !(time.is_finite() && time > 0.0) {
            return Some(0);
        }
        let index = (time * ANALYSIS_FPS as f64).floor() as usize;
        Some(if wrap { index % len } else { index.min(len - 1) })
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Scan progress, reported every few analysis frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProgress {
    pub frames_done: usize,
    pub total_frames: usize,
    /// 0.0-100.0
    pub percent: f32,
}

impl ScanProgress {
    fn new(frames_done: usize, total_frames: usize) -> Self {
        let percent = if total_frames == 0 {
            100.0
        } else {
            frames_done as f32 / total_frames as f32 * 100.0
        };
        Self {
            frames_done,
            total_frames,
            percent,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.frames_done >= self.total_frames
    }
}

/// Deterministic whole-file band analysis.
///
/// Each 1/30 s slice is Hann-windowed and every bin of every band is measured
/// with a Goertzel filter at the bin frequencies of an FFT grid, so the band
/// layout matches [`super::BandAnalyzer`] without running a full transform.
/// Slices are independent of each other, so the same samples always give the
/// same frequency map.
#[derive(Debug, Clone)]
pub struct OfflineScanner {
    fft_size: usize,
    max_duration: Option<f64>,
}

impl Default for OfflineScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineScanner {
    pub fn new() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            max_duration: None,
        }
    }

    /// Bin grid used to lay out the bands
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = normalize_fft_size(fft_size);
        self
    }

    /// Refuse tracks longer than `secs`
    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration = Some(secs);
        self
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn max_duration(&self) -> Option<f64> {
        self.max_duration
    }

    fn begin<'a>(&self, audio: &'a DecodedAudio) -> Result<ScanState<'a>> {
        let duration = audio.duration();
        if let Some(limit) = self.max_duration {
            if duration > limit {
                return Err(VixelError::TooLong { duration, limit });
            }
        }
        let samples = audio
            .channel(0)
            .ok_or_else(|| VixelError::Decode("no audio channels".to_string()))?;
        info!(
            "Scanning {:.1}s of audio at {} Hz",
            duration,
            audio.sample_rate()
        );
        Ok(ScanState::new(samples, audio.sample_rate(), duration, self.fft_size))
    }

    /// Scan on the calling thread. Cancellation is checked every few dozen frames.
    pub fn scan<F>(
        &self,
        audio: &DecodedAudio,
        mut on_progress: F,
        cancel: &CancelToken,
    ) -> Result<OfflineScanResult>
    where
        F: FnMut(ScanProgress),
    {
        let mut state = self.begin(audio)?;
        on_progress(state.progress());
        while !state.is_done() {
            if state.at_yield_point() && cancel.is_cancelled() {
                return Err(VixelError::Cancelled);
            }
            state.step(&mut on_progress);
        }
        Ok(state.finish())
    }

    /// Scan as a task, handing control back to the runtime every
    /// `YIELD_INTERVAL` frames and stopping there if `cancel` is set.
    pub async fn scan_async(
        &self,
        audio: &DecodedAudio,
        progress: Option<crossbeam_channel::Sender<ScanProgress>>,
        cancel: &CancelToken,
    ) -> Result<OfflineScanResult> {
        let mut report = |p: ScanProgress| {
            if let Some(tx) = &progress {
                // receiver gone means nobody is watching, not a failure
                let _ = tx.send(p);
            }
        };

        let mut state = self.begin(audio)?;
        report(state.progress());
        while !state.is_done() {
            if state.at_yield_point() {
                if state.next_frame > 0 {
                    tokio::task::yield_now().await;
                }
                if cancel.is_cancelled() {
                    return Err(VixelError::Cancelled);
                }
            }
            state.step(&mut report);
        }
        Ok(state.finish())
    }
}

/// Frame-by-frame progress of one scan
struct ScanState<'a> {
    started: Instant,
    samples: &'a [f32],
    sample_rate: u32,
    duration: f64,
    ranges: [BinRange; NUM_BANDS],
    bin_hz: f64,
    frame_len: usize,
    window: Vec<f64>,
    total_frames: usize,
    next_frame: usize,
    frequency_map: Vec<FrequencyFrame>,
    beat_timestamps: Vec<f64>,
    energy_min: f32,
    energy_max: f32,
    energy_sum: f64,
}

impl<'a> ScanState<'a> {
    fn new(samples: &'a [f32], sample_rate: u32, duration: f64, fft_size: usize) -> Self {
        let total_frames = (duration * ANALYSIS_FPS as f64).floor() as usize;
        let frame_len = (sample_rate as f64 / ANALYSIS_FPS as f64).floor() as usize;
        Self {
            started: Instant::now(),
            samples,
            sample_rate,
            duration,
            ranges: band_ranges(sample_rate as f32, fft_size),
            bin_hz: hz_per_bin(sample_rate as f32, fft_size) as f64,
            frame_len,
            window: hann_window(frame_len),
            total_frames,
            next_frame: 0,
            frequency_map: Vec::with_capacity(total_frames),
            beat_timestamps: Vec::new(),
            energy_min: f32::INFINITY,
            energy_max: 0.0,
            energy_sum: 0.0,
        }
    }

    fn is_done(&self) -> bool {
        self.next_frame >= self.total_frames
    }

    fn at_yield_point(&self) -> bool {
        self.next_frame % YIELD_INTERVAL == 0
    }

    fn progress(&self) -> ScanProgress {
        ScanProgress::new(self.next_frame, self.total_frames)
    }

    fn step<F: FnMut(ScanProgress)>(&mut self, on_progress: &mut F) {
        let frame = self.next_frame;
        let time = frame as f64 / ANALYSIS_FPS as f64;
        let start = ((time * self.sample_rate as f64).floor() as usize).min(self.samples.len());
        let end = (start + self.frame_len).min(self.samples.len());

        let bands = self.analyze_chunk(&self.samples[start..end]);
        let energy = bands.iter().sum::<f32>() / NUM_BANDS as f32;

        self.energy_min = self.energy_min.min(energy);
        self.energy_max = self.energy_max.max(energy);
        self.energy_sum += energy as f64;
        if bands[0] > BEAT_THRESHOLD {
            self.beat_timestamps.push(time);
        }
        self.frequency_map.push(FrequencyFrame { time, bands, energy });

        self.next_frame += 1;
        if self.next_frame % PROGRESS_INTERVAL == 0 || self.is_done() {
            on_progress(self.progress());
        }
    }

    fn analyze_chunk(&self, chunk: &[f32]) -> BandVector {
        let window = if chunk.len() == self.window.len() {
            std::borrow::Cow::Borrowed(&self.window)
        } else {
            // only the final slice can be short
            std::borrow::Cow::Owned(hann_window(chunk.len()))
        };
        let windowed: Vec<f64> = chunk
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| if s.is_finite() { s as f64 * w } else { 0.0 })
            .collect();

        let mut magnitudes = [0.0f64; NUM_BANDS];
        for (magnitude, range) in magnitudes.iter_mut().zip(self.ranges.iter()) {
            let sum: f64 = range
                .bins()
                .map(|bin| {
                    goertzel_magnitude(&windowed, bin as f64 * self.bin_hz, self.sample_rate as f64)
                })
                .sum();
            *magnitude = sum / range.bin_count() as f64;
        }

        let max = magnitudes.iter().copied().fold(0.0f64, f64::max);
        let mut bands = [0.0f32; NUM_BANDS];
        if max > 0.0 {
            for (band, &m) in bands.iter_mut().zip(magnitudes.iter()) {
                *band = (m / max).min(1.0) as f32;
            }
        }
        bands
    }

    fn finish(self) -> OfflineScanResult {
        let frames = self.frequency_map.len();
        let dynamic_range = if frames == 0 {
            DynamicRange::default()
        } else {
            DynamicRange {
                min: self.energy_min,
                max: self.energy_max,
                avg: (self.energy_sum / frames as f64) as f32,
            }
        };
        let bpm = estimate_bpm_iqr(&self.beat_timestamps);
        let analysis_time_seconds = self.started.elapsed().as_secs_f64();

        info!(
            "Scan complete: {} frames, {} beat candidates, {} BPM in {:.2}s",
            frames,
            self.beat_timestamps.len(),
            bpm,
            analysis_time_seconds
        );

        OfflineScanResult {
            duration: self.duration,
            bpm,
            beat_timestamps: self.beat_timestamps,
            frequency_map: self.frequency_map,
            dynamic_range,
            sample_rate: self.sample_rate,
            analysis_time_seconds,
        }
    }
}

fn hann_window(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos())
        .collect()
}

/// Magnitude of the correlation of `samples` with a complex sinusoid at `freq`
fn goertzel_magnitude(samples: &[f64], freq: f64, sample_rate: f64) -> f64 {
    let omega = 2.0 * std::f64::consts::PI * freq / sample_rate;
    let (sin, cos) = omega.sin_cos();
    let coeff = 2.0 * cos;

    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for &x in samples {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    let real = s1 - s2 * cos;
    let imag = s2 * sin;
    (real * real + imag * imag).sqrt()
}

/// BPM from beat timestamps with interquartile outlier rejection.
///
/// Intervals outside `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]` are dropped before
/// averaging. Fewer than four beats give the default tempo.
pub fn estimate_bpm_iqr(beat_timestamps: &[f64]) -> u32 {
    if beat_timestamps.len() < MIN_BEATS_FOR_BPM {
        return DEFAULT_BPM;
    }

    let intervals: Vec<f64> = beat_timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    let mut sorted = intervals.clone();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let q1 = sorted[(n as f64 * 0.25).floor() as usize];
    let q3 = sorted[((n as f64 * 0.75).floor() as usize).min(n - 1)];
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let valid: Vec<f64> = intervals
        .into_iter()
        .filter(|&i| i >= lo && i <= hi)
        .collect();
    if valid.is_empty() {
        return DEFAULT_BPM;
    }
    let avg = valid.iter().sum::<f64>() / valid.len() as f64;
    bpm_from_interval(avg)
}
