//! Per-track orchestration: live analysis, background pre-scan and the
//! particle field, wired together for a host's render loop.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::runtime::Handle;

use crate::audio::{
    AudioFrame, AudioSource, BandAnalyzer, BeatDetector, OfflineScanResult, OfflineScanner,
    ScanProgress, ScanTask, SpectrumAnalyser,
};
use crate::config::analysis::DEFAULT_FFT_SIZE;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::particles::ParticleSimulation;

/// Identity of a track for scan caching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub filename: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: u64,
}

impl TrackKey {
    pub fn new(filename: impl Into<String>, size: u64, last_modified: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            last_modified,
        }
    }

    /// Build a key from file metadata
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, meta.len(), last_modified))
    }
}

/// Completed scans by track
#[derive(Debug, Default)]
pub struct PrescanCache {
    entries: HashMap<TrackKey, Arc<OfflineScanResult>>,
}

impl PrescanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TrackKey) -> Option<Arc<OfflineScanResult>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: TrackKey, result: Arc<OfflineScanResult>) {
        self.entries.insert(key, result);
    }

    pub fn remove(&mut self, key: &TrackKey) -> Option<Arc<OfflineScanResult>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &TrackKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// How a freshly loaded track gets its pre-scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackLoad {
    /// A cached scan was installed before the first frame
    Cached,
    /// A background scan is running; placement uses live beats until it lands
    Scanning,
    /// No source or no runtime; live beats only
    LiveOnly,
}

struct PendingScan {
    key: TrackKey,
    generation: u64,
    task: ScanTask,
}

/// Everything one playing track needs, driven once per rendered frame.
///
/// The render thread owns this value. Background scans talk to it only
/// through the channels inside [`ScanTask`], so a result is either installed
/// whole or never seen.
pub struct Visualizer {
    sample_rate: u32,
    analyzer: BandAnalyzer,
    spectrum: SpectrumAnalyser,
    detector: BeatDetector,
    simulation: ParticleSimulation,
    scanner: OfflineScanner,
    cache: PrescanCache,
    runtime: Option<Handle>,
    pending: Option<PendingScan>,
    progress: Option<ScanProgress>,
    track: Option<TrackKey>,
    generation: u64,
    clock: f64,
}

impl Visualizer {
    pub fn new(config: &SimulationConfig, sample_rate: u32) -> Self {
        let config = config.sanitized();
        Self {
            sample_rate,
            analyzer: BandAnalyzer::new(sample_rate as f32, DEFAULT_FFT_SIZE),
            spectrum: SpectrumAnalyser::new(DEFAULT_FFT_SIZE),
            detector: BeatDetector::new(config.kick_sensitivity),
            simulation: ParticleSimulation::new(&config),
            scanner: OfflineScanner::new(),
            cache: PrescanCache::new(),
            runtime: None,
            pending: None,
            progress: None,
            track: None,
            generation: 0,
            clock: 0.0,
        }
    }

    /// Spawn scans on this runtime instead of the ambient one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_scanner(mut self, scanner: OfflineScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Switch to a new track.
    ///
    /// Any scan still running for the previous track is cancelled and its
    /// result dropped. Detector history, the particle field and the clock are
    /// reset before this returns.
    pub fn load_track(&mut self, key: TrackKey, source: Option<Arc<dyn AudioSource>>) -> TrackLoad {
        if let Some(pending) = self.pending.take() {
            info!("Abandoning scan of {}", pending.key.filename);
            pending.task.cancel();
        }
        self.generation += 1;
        self.progress = None;
        self.clock = 0.0;
        self.analyzer.reset();
        self.spectrum.reset();
        self.detector.reset();
        self.simulation.reset_for_new_track();
        info!("Loaded track {} ({} bytes)", key.filename, key.size);

        if let Some(cached) = self.cache.get(&key) {
            info!("Using cached scan for {}: {} BPM", key.filename, cached.bpm);
            self.simulation.set_prescan(Some(cached));
            self.track = Some(key);
            return TrackLoad::Cached;
        }

        let outcome = match (source, self.scan_runtime()) {
            (Some(source), Some(runtime)) => {
                debug!("Starting scan of {}", source.describe());
                let task = ScanTask::spawn_on(&runtime, source, self.scanner.clone());
                self.pending = Some(PendingScan {
                    key: key.clone(),
                    generation: self.generation,
                    task,
                });
                TrackLoad::Scanning
            }
            (Some(_), None) => {
                warn!("No async runtime available; {} plays without a pre-scan", key.filename);
                TrackLoad::LiveOnly
            }
            (None, _) => TrackLoad::LiveOnly,
        };
        self.track = Some(key);
        outcome
    }

    fn scan_runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Run one frame: bands, beats, scan handoff, then the particle step.
    ///
    /// `spectrum` is the host's byte spectrum (0-255 per bin). `None` holds
    /// the previous bands and only lets the beat envelopes decay.
    pub fn frame(&mut self, spectrum: Option<&[u8]>, dt: f32, audio_active: bool) -> AudioFrame {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.clock += dt as f64;

        let spectrum = spectrum.filter(|s| !s.is_empty());
        let bands = self.analyzer.compute_bands(spectrum);
        // held bands are not a new onset
        match spectrum {
            Some(_) => self.detector.update(&bands, self.clock),
            None => self.detector.idle(self.clock),
        }
        let beat = self.detector.beat();

        self.poll_scan();
        self.simulation.update(&bands, Some(&beat), dt, audio_active);

        AudioFrame { bands, beat }
    }

    /// [`Visualizer::frame`] from the most recent PCM window instead of a byte spectrum
    pub fn frame_from_samples(&mut self, recent: &[f32], dt: f32, audio_active: bool) -> AudioFrame {
        let bytes = self.spectrum.byte_frequency_data(recent);
        self.frame(Some(&bytes), dt, audio_active)
    }

    /// Collect progress and, once finished, the result of the running scan.
    ///
    /// Returns true when a scan result was installed by this call.
    pub fn poll_scan(&mut self) -> bool {
        let Some(pending) = self.pending.as_ref() else {
            return false;
        };

        if let Some(progress) = pending.task.latest_progress() {
            debug!(
                "Scan of {}: {}/{} frames",
                pending.key.filename, progress.frames_done, progress.total_frames
            );
            self.progress = Some(progress);
        }

        let Some(outcome) = pending.task.try_result() else {
            return false;
        };
        let Some(pending) = self.pending.take() else {
            return false;
        };

        match outcome {
            Ok(result) if pending.generation == self.generation => {
                info!(
                    "Installing scan of {}: {} BPM, {} frames",
                    pending.key.filename,
                    result.bpm,
                    result.frame_count()
                );
                self.cache.insert(pending.key, Arc::clone(&result));
                self.simulation.set_prescan(Some(result));
                true
            }
            Ok(_) => {
                debug!("Discarding stale scan of {}", pending.key.filename);
                false
            }
            Err(e) if e.is_cancellation() => {
                debug!("Scan of {} cancelled", pending.key.filename);
                false
            }
            Err(e) => {
                warn!(
                    "Scan of {} failed, placing from live beats: {}",
                    pending.key.filename, e
                );
                false
            }
        }
    }

    /// Apply a settings snapshot to the detector and the particle field
    pub fn apply_config(&mut self, config: &SimulationConfig) {
        let config = config.sanitized();
        self.detector.set_sensitivity(config.kick_sensitivity);
        self.simulation.apply_config(&config);
    }

    /// Change the analyser window; the host's byte spectrum must match it
    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.spectrum.set_fft_size(fft_size);
        self.analyzer
            .set_format(self.sample_rate as f32, self.spectrum.fft_size());
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_scanning(&self) -> bool {
        self.pending.is_some()
    }

    /// Last progress report of the running scan
    pub fn scan_progress(&self) -> Option<ScanProgress> {
        self.progress
    }

    pub fn current_track(&self) -> Option<&TrackKey> {
        self.track.as_ref()
    }

    /// Incremented on every [`Visualizer::load_track`]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Seconds since the current track was loaded
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn analyzer(&self) -> &BandAnalyzer {
        &self.analyzer
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn simulation(&self) -> &ParticleSimulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut ParticleSimulation {
        &mut self.simulation
    }

    pub fn cache(&self) -> &PrescanCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PrescanCache {
        &mut self.cache
    }
}
