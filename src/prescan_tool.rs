use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use vixel::audio::{AudioSource, FileSource, OfflineScanner, ScanTask};
use vixel::config::analysis::DEFAULT_FFT_SIZE;
use vixel::config::prescan::DEFAULT_MAX_DURATION_SECS;

#[derive(Parser)]
#[command(name = "vixel-prescan")]
#[command(about = "Pre-scan an audio file into a frequency map for stable particle layouts")]
struct Args {
    /// Audio file to pre-scan (WAV, MP3, M4A/AAC)
    #[arg()]
    input_file: String,

    /// Output file for the scan (JSON)
    #[arg(short, long, default_value = "prescan.json")]
    output: String,

    /// FFT grid the band bins are laid out on
    #[arg(long, default_value_t = DEFAULT_FFT_SIZE)]
    fft_size: usize,

    /// Refuse files longer than this many seconds
    #[arg(long, default_value_t = DEFAULT_MAX_DURATION_SECS)]
    max_duration: f64,

    /// Print every beat candidate timestamp
    #[arg(long)]
    beats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Vixel pre-scan tool");
    info!("Input file: {}", args.input_file);
    info!("Output file: {}", args.output);

    let scanner = OfflineScanner::new()
        .with_fft_size(args.fft_size)
        .with_max_duration(args.max_duration);
    let source: Arc<dyn AudioSource> = Arc::new(FileSource::new(&args.input_file));
    let task = ScanTask::spawn(source, scanner);

    let mut last_percent = -1.0;
    while !task.is_finished() {
        if let Some(progress) = task.latest_progress() {
            if progress.percent - last_percent >= 10.0 || progress.is_complete() {
                info!(
                    "Scanning... {:.0}% ({}/{} frames)",
                    progress.percent, progress.frames_done, progress.total_frames
                );
                last_percent = progress.percent;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let result = match task.join().await {
        Ok(result) => result,
        Err(e) => {
            warn!("Pre-scan failed: {}", e);
            return Err(e.into());
        }
    };

    info!("=== PRE-SCAN RESULTS ===");
    info!("Duration: {:.2} seconds", result.duration);
    info!("Sample rate: {} Hz", result.sample_rate);
    info!("Frames: {}", result.frame_count());
    info!("Beat candidates: {}", result.beat_timestamps.len());
    info!("Estimated BPM: {}", result.bpm);
    info!(
        "Dynamic range: min {:.3}, max {:.3}, avg {:.3}",
        result.dynamic_range.min, result.dynamic_range.max, result.dynamic_range.avg
    );
    info!("Analysis time: {:.2} s", result.analysis_time_seconds);

    if args.beats {
        for t in &result.beat_timestamps {
            println!("{t:.3}");
        }
    }

    result.save_json(&args.output)?;
    let file_size = std::fs::metadata(&args.output)?.len();
    info!("Saved {} ({:.1} KB)", args.output, file_size as f64 / 1024.0);

    Ok(())
}
