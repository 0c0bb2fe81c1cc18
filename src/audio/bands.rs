//! Band-range math shared by the live analyzer and the offline scanner

use super::BandVector;
use crate::config::analysis::{BAND_EDGES_HZ, MAX_FFT_SIZE, MIN_FFT_SIZE, NUM_BANDS};

/// Inclusive range of FFT bins covered by one band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRange {
    pub lo: usize,
    pub hi: usize,
}

impl BinRange {
    /// Number of bins in the range
    pub fn bin_count(&self) -> usize {
        self.hi - self.lo + 1
    }

    pub fn bins(&self) -> std::ops::RangeInclusive<usize> {
        self.lo..=self.hi
    }
}

/// Round `fft_size` to a power of two inside the supported window sizes
pub fn normalize_fft_size(fft_size: usize) -> usize {
    fft_size
        .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
        .next_power_of_two()
        .min(MAX_FFT_SIZE)
}

/// Width of one FFT bin in Hz
pub fn hz_per_bin(sample_rate: f32, fft_size: usize) -> f32 {
    let fft_size = normalize_fft_size(fft_size);
    (sample_rate / 2.0) / (fft_size / 2) as f32
}

/// Map the 8 band edges onto bin ranges.
///
/// Every range spans at least two bins and stays below `fft_size / 2`.
pub fn band_ranges(sample_rate: f32, fft_size: usize) -> [BinRange; NUM_BANDS] {
    let fft_size = normalize_fft_size(fft_size);
    let bin_count = fft_size / 2;
    let nyquist = sample_rate.max(1.0) / 2.0;
    let per_bin = nyquist / bin_count as f32;

    let mut edges = BAND_EDGES_HZ;
    edges[NUM_BANDS] = edges[NUM_BANDS].min(nyquist);

    let mut ranges = [BinRange { lo: 0, hi: 1 }; NUM_BANDS];
    for (i, range) in ranges.iter_mut().enumerate() {
        let lo = ((edges[i] / per_bin).floor() as usize).min(bin_count - 2);
        let hi = ((edges[i + 1] / per_bin).floor() as usize).min(bin_count - 1);
        *range = BinRange {
            lo,
            hi: hi.max(lo + 1),
        };
    }
    ranges
}

/// Index of the strongest band; the lowest index wins ties
pub fn dominant_band(bands: &BandVector) -> usize {
    let mut dom = 0;
    let mut dom_val = f32::NEG_INFINITY;
    for (i, &v) in bands.iter().enumerate() {
        if v > dom_val {
            dom_val = v;
            dom = i;
        }
    }
    dom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_at_44100_2048() {
        let ranges = band_ranges(44100.0, 2048);
        // 21.53 Hz per bin
        assert_eq!(ranges[0], BinRange { lo: 0, hi: 2 });
        assert_eq!(ranges[1], BinRange { lo: 2, hi: 6 });
        assert_eq!(ranges[7].lo, 222);
        assert_eq!(ranges[7].hi, 445);
    }

    #[test]
    fn test_ranges_stay_in_bounds_for_any_format() {
        for &sample_rate in &[8000.0, 11025.0, 22050.0, 44100.0, 48000.0, 96000.0] {
            for &fft_size in &[32, 256, 1024, 2048, 8192, 32768] {
                let bin_count = fft_size / 2;
                for range in band_ranges(sample_rate, fft_size) {
                    assert!(range.hi >= range.lo + 1, "{sample_rate} {fft_size} {range:?}");
                    assert!(range.hi <= bin_count - 1, "{sample_rate} {fft_size} {range:?}");
                }
            }
        }
    }

    #[test]
    fn test_normalize_fft_size() {
        assert_eq!(normalize_fft_size(0), MIN_FFT_SIZE);
        assert_eq!(normalize_fft_size(1000), 1024);
        assert_eq!(normalize_fft_size(1 << 20), MAX_FFT_SIZE);
    }

    #[test]
    fn test_dominant_band_prefers_first_on_tie() {
        assert_eq!(dominant_band(&[0.0; NUM_BANDS]), 0);
        assert_eq!(dominant_band(&[0.1, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0]), 1);
        assert_eq!(dominant_band(&[0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 0.9]), 7);
    }
}
