pub mod bands;
pub mod beat_detector;
pub mod decode;
pub mod fft;
pub mod prescan;
pub mod scan_task;

pub use bands::{band_ranges, dominant_band, BinRange};
pub use beat_detector::{BeatDetector, BeatFrame, OnsetState};
pub use decode::DecodedAudio;
pub use fft::{BandAnalyzer, SpectrumAnalyser};
pub use prescan::{DynamicRange, FrequencyFrame, OfflineScanResult, OfflineScanner, ScanProgress};
pub use scan_task::{AudioSource, CancelToken, FileSource, MemorySource, ScanTask};

use serde::{Deserialize, Serialize};

pub use crate::config::analysis::NUM_BANDS;

/// Normalized energy (0.0-1.0) in each of the 8 logarithmic bands,
/// sub-bass first.
pub type BandVector = [f32; NUM_BANDS];

/// One analysis tick worth of features, handed to the particle field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFrame {
    pub bands: BandVector,
    pub beat: BeatFrame,
}

/// Named view over a [`BandVector`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    /// 20-60 Hz, kick fundamental
    pub sub_bass: f32,
    /// 60-150 Hz, bass synths and kick harmonics
    pub bass: f32,
    /// 150-300 Hz
    pub low_mid: f32,
    /// 300-600 Hz, snare body
    pub mid: f32,
    /// 600-1200 Hz, leads and bells
    pub upper_mid: f32,
    /// 1.2-2.4 kHz, hi-hats
    pub high: f32,
    /// 2.4-4.8 kHz
    pub very_high: f32,
    /// 4.8 kHz and up, cymbals and air
    pub ultra_high: f32,
}

impl From<&BandVector> for FrequencyBands {
    fn from(bands: &BandVector) -> Self {
        Self {
            sub_bass: bands[0],
            bass: bands[1],
            low_mid: bands[2],
            mid: bands[3],
            upper_mid: bands[4],
            high: bands[5],
            very_high: bands[6],
            ultra_high: bands[7],
        }
    }
}

/// Clamp every band into 0.0-1.0, mapping NaN to silence
pub fn sanitize_bands(bands: &BandVector) -> BandVector {
    let mut out = [0.0; NUM_BANDS];
    for (dst, &src) in out.iter_mut().zip(bands.iter()) {
        *dst = if src.is_nan() { 0.0 } else { src.clamp(0.0, 1.0) };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_view_order() {
        let bands = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let named = FrequencyBands::from(&bands);
        assert_eq!(named.sub_bass, 0.0);
        assert_eq!(named.mid, 0.3);
        assert_eq!(named.ultra_high, 0.7);
    }

    #[test]
    fn test_sanitize_bands() {
        let bands = [f32::NAN, -1.0, 2.0, 0.5, f32::INFINITY, 0.0, 1.0, 0.25];
        assert_eq!(sanitize_bands(&bands), [0.0, 0.0, 1.0, 0.5, 1.0, 0.0, 1.0, 0.25]);
    }
}
