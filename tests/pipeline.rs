use std::sync::Arc;
use std::time::Duration;

use vixel::audio::{
    dominant_band, AudioSource, BandAnalyzer, CancelToken, DecodedAudio, FileSource, MemorySource,
    OfflineScanner, SpectrumAnalyser, NUM_BANDS,
};
use vixel::config::analysis::DEFAULT_FFT_SIZE;
use vixel::config::{SimulationConfig, SpawnMode};
use vixel::session::{TrackKey, TrackLoad, Visualizer};

const RATE: u32 = 44_100;

/// One second per tone, back to back
fn tone_steps(freqs: &[f32], amplitude: f32) -> Vec<f32> {
    freqs
        .iter()
        .flat_map(|&hz| {
            (0..RATE as usize).map(move |i| {
                amplitude * (2.0 * std::f32::consts::PI * hz * i as f32 / RATE as f32).sin()
            })
        })
        .collect()
}

fn write_wav(path: &std::path::Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn small_config(mode: SpawnMode) -> SimulationConfig {
    SimulationConfig {
        grid_size: 10,
        spawn_mode: mode,
        seed: Some(1),
        ..Default::default()
    }
}

async fn wait_until_idle(viz: &mut Visualizer) -> bool {
    for _ in 0..1000 {
        if viz.poll_scan() {
            return true;
        }
        if !viz.is_scanning() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[test]
fn offline_and_live_paths_agree_on_dominant_band() {
    let freqs = [100.0, 450.0, 1800.0, 3600.0];
    let samples = tone_steps(&freqs, 0.05);
    let audio = DecodedAudio::from_mono(samples.clone(), RATE).unwrap();
    let scan = OfflineScanner::new()
        .scan(&audio, |_| {}, &CancelToken::new())
        .unwrap();
    assert_eq!(scan.frame_count(), 120);

    for segment in 0..freqs.len() {
        let offline = dominant_band(&scan.frequency_map[segment * 30 + 15].bands);

        // fresh analysers so earlier tones cannot leak through smoothing
        let mut spectrum = SpectrumAnalyser::new(DEFAULT_FFT_SIZE);
        let mut bands = BandAnalyzer::new(RATE as f32, DEFAULT_FFT_SIZE);
        let start = segment * RATE as usize + RATE as usize / 2;
        let mut live = [0.0; NUM_BANDS];
        for hop in 0..4 {
            let from = start + hop * DEFAULT_FFT_SIZE;
            let bytes = spectrum.byte_frequency_data(&samples[from..from + DEFAULT_FFT_SIZE]);
            live = bands.compute_bands(Some(&bytes));
        }

        assert_eq!(
            dominant_band(&live),
            offline,
            "segment {segment}: live {live:?}, offline {:?}",
            scan.frequency_map[segment * 30 + 15].bands
        );
    }
}

#[test]
fn silence_settles_to_invisible_particles() {
    let mut viz = Visualizer::new(&small_config(SpawnMode::Swarm), RATE);
    let silence = vec![0u8; DEFAULT_FFT_SIZE / 2];
    for _ in 0..(5 * 60) {
        let frame = viz.frame(Some(&silence), 1.0 / 60.0, false);
        assert_eq!(frame.beat.overall, 0.0);
        assert!(!frame.beat.kick.is_hit && !frame.beat.snare.is_hit && !frame.beat.hihat.is_hit);
    }
    assert!(viz.simulation().scales().iter().all(|&s| s == 0.0));
}

#[test]
fn kick_pulse_reaches_the_particle_field() {
    let mut viz = Visualizer::new(&small_config(SpawnMode::Graph), RATE);
    let mut kick = vec![0u8; DEFAULT_FFT_SIZE / 2];
    kick[..4].fill(255);
    let silence = vec![0u8; DEFAULT_FFT_SIZE / 2];

    let first = viz.frame(Some(&kick), 1.0 / 60.0, true);
    assert!(first.beat.kick.is_hit);
    assert_eq!(first.beat.kick.level, 1.0);
    assert!(viz.simulation().active_count() > 0);

    // peak hold keeps band 0 above threshold for a few frames, then the envelope decays
    let mut frame = first;
    for _ in 0..20 {
        frame = viz.frame(Some(&silence), 1.0 / 60.0, true);
    }
    assert!(!frame.beat.kick.is_hit);
    assert!(frame.beat.kick.level < 1.0);
    assert!(frame.bands[0] < 0.2);
}

#[tokio::test]
async fn wav_file_is_scanned_in_background_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steps.wav");
    write_wav(&path, &tone_steps(&[100.0, 1800.0], 0.3));

    let mut viz = Visualizer::new(&small_config(SpawnMode::Graph), RATE);
    let key = TrackKey::from_path(&path).unwrap();
    let source: Arc<dyn AudioSource> = Arc::new(FileSource::new(&path));
    assert_eq!(viz.load_track(key.clone(), Some(source)), TrackLoad::Scanning);

    assert!(wait_until_idle(&mut viz).await);
    let scan = viz.simulation().prescan().cloned().unwrap();
    assert_eq!(scan.frame_count(), 60);
    assert_eq!(dominant_band(&scan.frequency_map[15].bands), 1);
    assert_eq!(dominant_band(&scan.frequency_map[45].bands), 5);
    assert!(viz.cache().contains(&key));
}

#[tokio::test]
async fn new_track_abandons_running_scan() {
    let long = DecodedAudio::from_mono(tone_steps(&[100.0; 30], 0.2), RATE).unwrap();
    let short = DecodedAudio::from_mono(tone_steps(&[3600.0], 0.2), RATE).unwrap();

    let mut viz = Visualizer::new(&small_config(SpawnMode::Graph), RATE);
    let first: Arc<dyn AudioSource> = Arc::new(MemorySource::new("long", Arc::new(long)));
    viz.load_track(TrackKey::new("long.wav", 1, 1), Some(first));
    viz.frame(None, 1.0 / 60.0, true);

    let second: Arc<dyn AudioSource> = Arc::new(MemorySource::new("short", Arc::new(short)));
    let key = TrackKey::new("short.wav", 2, 2);
    viz.load_track(key.clone(), Some(second));
    assert_eq!(viz.simulation().active_count(), 0);
    assert!(viz.simulation().prescan().is_none());

    assert!(wait_until_idle(&mut viz).await);
    let scan = viz.simulation().prescan().cloned().unwrap();
    assert_eq!(scan.duration, 1.0);
    assert_eq!(viz.cache().len(), 1);
    assert!(viz.cache().contains(&key));

    // give the abandoned task time to notice; it must never be installed
    tokio::time::sleep(Duration::from_millis(50)).await;
    viz.poll_scan();
    assert_eq!(viz.simulation().prescan().map(|s| s.duration), Some(1.0));
}

#[tokio::test]
async fn corrupt_file_leaves_live_placement_working() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.mp3");
    std::fs::write(&path, b"definitely not audio").unwrap();

    let mut viz = Visualizer::new(&small_config(SpawnMode::Graph), RATE);
    let source: Arc<dyn AudioSource> = Arc::new(FileSource::new(&path));
    viz.load_track(TrackKey::from_path(&path).unwrap(), Some(source));
    assert!(!wait_until_idle(&mut viz).await);
    assert!(viz.simulation().prescan().is_none());

    let loud = vec![200u8; DEFAULT_FFT_SIZE / 2];
    for _ in 0..120 {
        viz.frame(Some(&loud), 1.0 / 60.0, true);
    }
    assert!(viz.simulation().active_count() > 0);
}
