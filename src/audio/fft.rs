use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Arc;

use super::bands::{band_ranges, normalize_fft_size, BinRange};
use super::{BandVector, FrequencyBands, NUM_BANDS};
use crate::config::analysis::{
    DEFAULT_SMOOTHING, MAX_DECIBELS, MIN_DECIBELS, PEAK_HOLD_DECAY,
};

/// Produces byte-valued magnitude spectra (0-255 per bin) from PCM, the way
/// a browser analyser node does: Blackman window, FFT, temporal smoothing,
/// then a decibel window mapped onto bytes.
pub struct SpectrumAnalyser {
    fft_size: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = normalize_fft_size(fft_size);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            fft_size,
            fft,
            window: Self::blackman_window(fft_size),
            smoothing: DEFAULT_SMOOTHING,
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    fn blackman_window(size: usize) -> Vec<f32> {
        let (a0, a1, a2) = (0.42, 0.5, 0.08);
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
                a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
            })
            .collect()
    }

    /// Change the window size. Smoothing history is discarded.
    pub fn set_fft_size(&mut self, fft_size: usize) {
        let fft_size = normalize_fft_size(fft_size);
        if fft_size != self.fft_size {
            *self = Self {
                smoothing: self.smoothing,
                ..Self::new(fft_size)
            };
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = if smoothing.is_finite() { smoothing.clamp(0.0, 1.0) } else { DEFAULT_SMOOTHING };
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Analyse the most recent `fft_size` samples of `recent`.
    ///
    /// Shorter inputs are zero-padded at the front, so the newest sample always
    /// lands at the end of the window.
    pub fn byte_frequency_data(&mut self, recent: &[f32]) -> Vec<u8> {
        let n = self.fft_size;
        let take = recent.len().min(n);
        let pad = n - take;
        let tail = &recent[recent.len() - take..];

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        let tau = self.smoothing;
        self.buffer[..n / 2]
            .iter()
            .zip(self.smoothed.iter_mut())
            .map(|(c, smoothed)| {
                let magnitude = c.norm() / n as f32;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (255.0 * (db - MIN_DECIBELS) / range).floor().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// Converts byte spectra into 8 normalized bands with peak-hold smoothing
pub struct BandAnalyzer {
    sample_rate: f32,
    fft_size: usize,
    ranges: [BinRange; NUM_BANDS],
    band_gains: BandVector,
    band_amps: BandVector,
}

impl BandAnalyzer {
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let fft_size = normalize_fft_size(fft_size);
        Self {
            sample_rate,
            fft_size,
            ranges: band_ranges(sample_rate, fft_size),
            band_gains: [0.0; NUM_BANDS],
            band_amps: [0.0; NUM_BANDS],
        }
    }

    /// Update the spectrum format; held band values are kept
    pub fn set_format(&mut self, sample_rate: f32, fft_size: usize) {
        let fft_size = normalize_fft_size(fft_size);
        if sample_rate != self.sample_rate || fft_size != self.fft_size {
            self.sample_rate = sample_rate;
            self.fft_size = fft_size;
            self.ranges = band_ranges(sample_rate, fft_size);
        }
    }

    pub fn ranges(&self) -> &[BinRange; NUM_BANDS] {
        &self.ranges
    }

    /// Fold one byte spectrum into the held bands.
    ///
    /// With no spectrum (nothing playing yet) the last held vector is returned
    /// unchanged. Bins missing from a short spectrum count as silence.
    pub fn compute_bands(&mut self, spectrum: Option<&[u8]>) -> BandVector {
        let Some(spectrum) = spectrum.filter(|s| !s.is_empty()) else {
            return self.band_amps;
        };

        for (i, range) in self.ranges.iter().enumerate() {
            let sum: u32 = range
                .bins()
                .map(|b| spectrum.get(b).copied().unwrap_or(0) as u32)
                .sum();
            let norm = (sum as f32 / range.bin_count() as f32) / 255.0;
            self.band_gains[i] = norm;
            self.band_amps[i] = norm.max(self.band_amps[i] * PEAK_HOLD_DECAY);
        }

        self.band_amps
    }

    /// Held (peak-decayed) band values
    pub fn bands(&self) -> BandVector {
        self.band_amps
    }

    /// Instantaneous band values from the last spectrum, without peak hold
    pub fn raw_gains(&self) -> BandVector {
        self.band_gains
    }

    pub fn frequency_distribution(&self) -> FrequencyBands {
        FrequencyBands::from(&self.band_amps)
    }

    pub fn reset(&mut self) {
        self.band_gains = [0.0; NUM_BANDS];
        self.band_amps = [0.0; NUM_BANDS];
    }
}
