use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

use vixel::audio::decode::decode_file;
use vixel::audio::{AudioSource, MemorySource, OfflineScanResult};
use vixel::config::analysis::DEFAULT_FFT_SIZE;
use vixel::config::{SimulationConfig, SpawnMode};
use vixel::particles::ColorPreset;
use vixel::session::{TrackKey, Visualizer};

#[derive(Parser)]
#[command(name = "vixel-headless")]
#[command(about = "Run the live analysis and particle field over an audio file without rendering")]
struct Args {
    /// Audio file to play through the pipeline
    #[arg()]
    input_file: PathBuf,

    /// Simulated render rate
    #[arg(long, default_value_t = 60.0)]
    fps: f32,

    /// Settings file (JSON); command-line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use graph (one node per beat) instead of swarm motion
    #[arg(long)]
    graph: bool,

    /// Particle grid edge (10-100)
    #[arg(long)]
    grid_size: Option<usize>,

    /// Color preset: aurora, neon, sunset, mono
    #[arg(long)]
    preset: Option<ColorPreset>,

    /// Existing pre-scan JSON to place graph nodes from
    #[arg(long, conflicts_with = "scan")]
    prescan: Option<PathBuf>,

    /// Pre-scan the file in the background while playing
    #[arg(long)]
    scan: bool,

    /// Fixed RNG seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Default)]
struct Stats {
    frames: usize,
    kicks: usize,
    snares: usize,
    hihats: usize,
    peak_active: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::load_json(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if args.graph {
        config.spawn_mode = SpawnMode::Graph;
    }
    if let Some(size) = args.grid_size {
        config.grid_size = size;
    }
    if let Some(preset) = args.preset {
        config.color_preset = preset;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    let config = config.sanitized();

    info!("Decoding {}", args.input_file.display());
    let audio = Arc::new(decode_file(&args.input_file)?);
    info!(
        "{} channel(s), {} Hz, {:.2} s",
        audio.num_channels(),
        audio.sample_rate(),
        audio.duration()
    );

    let mut viz = Visualizer::new(&config, audio.sample_rate());
    let key = TrackKey::from_path(&args.input_file)?;

    if let Some(path) = &args.prescan {
        let scan = OfflineScanResult::load_json(path)
            .with_context(|| format!("loading pre-scan from {}", path.display()))?;
        viz.cache_mut().insert(key.clone(), Arc::new(scan));
    }
    let source: Option<Arc<dyn AudioSource>> = if args.scan {
        Some(Arc::new(MemorySource::new(key.filename.clone(), Arc::clone(&audio))))
    } else {
        None
    };
    let load = viz.load_track(key, source);
    info!("Track loaded: {:?}, {} particles in {:?} mode", load, viz.simulation().count(), config.spawn_mode);

    let samples = audio.mixdown();
    let fps = args.fps.clamp(1.0, 1000.0);
    let dt = 1.0 / fps;
    let total_frames = (audio.duration() * fps as f64).floor() as usize;
    let rate = audio.sample_rate() as f64;
    let mut stats = Stats::default();

    for frame_index in 0..total_frames {
        let end = (((frame_index + 1) as f64 / fps as f64) * rate) as usize;
        let end = end.min(samples.len());
        let start = end.saturating_sub(DEFAULT_FFT_SIZE);
        let frame = viz.frame_from_samples(&samples[start..end], dt, true);

        stats.frames += 1;
        stats.kicks += frame.beat.kick.is_hit as usize;
        stats.snares += frame.beat.snare.is_hit as usize;
        stats.hihats += frame.beat.hihat.is_hit as usize;
        stats.peak_active = stats.peak_active.max(viz.simulation().active_count());

        if frame_index % fps as usize == 0 {
            debug!(
                "t={:.1}s bpm={} overall={:.2} active={} energy={:.2}",
                viz.clock(),
                frame.beat.bpm,
                frame.beat.overall,
                viz.simulation().active_count(),
                viz.simulation().energy()
            );
        }

        if viz.is_scanning() {
            // give the background scan a chance on small runtimes
            tokio::task::yield_now().await;
        }
    }

    let beat = viz.detector().beat();
    info!("=== HEADLESS RUN ===");
    info!("Frames simulated: {}", stats.frames);
    info!("Kicks: {}, snares: {}, hi-hats: {}", stats.kicks, stats.snares, stats.hihats);
    info!(
        "Live BPM: {}{}",
        beat.bpm,
        if beat.bpm_estimated { "" } else { " (default)" }
    );
    info!(
        "Active particles: {} now, {} peak of {}",
        viz.simulation().active_count(),
        stats.peak_active,
        viz.simulation().count()
    );
    match viz.simulation().prescan() {
        Some(scan) => info!("Pre-scan installed: {} BPM over {} frames", scan.bpm, scan.frame_count()),
        None => info!("No pre-scan installed; graph nodes used live beats"),
    }

    Ok(())
}
