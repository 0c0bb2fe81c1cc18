use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::decode::decode_file;
use super::prescan::{OfflineScanResult, OfflineScanner, ScanProgress};
use super::DecodedAudio;
use crate::error::{Result, VixelError};

/// Shared flag that asks a running scan to stop at its next yield point
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a background scan gets its decoded samples from.
///
/// The scan task owns an independent decode of the track, so nothing here is
/// shared with the real-time path.
///
/// # Implementation Requirements
/// - Must be `Send + Sync`; decoding runs on the tokio runtime
/// - Heavy work should go through `spawn_blocking`, not run on the async worker
/// - Unreadable input must come back as [`VixelError::Decode`]
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn decode(&self) -> Result<Arc<DecodedAudio>>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Decodes a file from disk on the blocking pool
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AudioSource for FileSource {
    async fn decode(&self) -> Result<Arc<DecodedAudio>> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || decode_file(path))
            .await
            .map_err(|e| VixelError::Task(e.to_string()))??;
        Ok(Arc::new(audio))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Already-decoded samples, e.g. from a host that decodes itself
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    audio: Arc<DecodedAudio>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, audio: Arc<DecodedAudio>) -> Self {
        Self {
            name: name.into(),
            audio,
        }
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    async fn decode(&self) -> Result<Arc<DecodedAudio>> {
        Ok(Arc::clone(&self.audio))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A decode + offline scan running on the tokio runtime.
///
/// Progress and the final result arrive over channels, so the render thread
/// can poll without blocking. The result is sent once, after the scan has
/// fully finished, which makes the handoff all-or-nothing. Dropping the task
/// cancels it.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use vixel::audio::{AudioSource, FileSource, OfflineScanner, ScanTask};
///
/// # async fn example() -> vixel::Result<()> {
/// let source: Arc<dyn AudioSource> = Arc::new(FileSource::new("track.mp3"));
/// let task = ScanTask::spawn(source, OfflineScanner::new());
/// let result = task.join().await?;
/// println!("{} BPM", result.bpm);
/// # Ok(())
/// # }
/// ```
pub struct ScanTask {
    cancel: CancelToken,
    progress: Receiver<ScanProgress>,
    result: Receiver<Result<Arc<OfflineScanResult>>>,
    handle: Option<JoinHandle<()>>,
}

impl ScanTask {
    /// Spawn on the current runtime. Panics outside a tokio context, like `tokio::spawn`.
    pub fn spawn(source: Arc<dyn AudioSource>, scanner: OfflineScanner) -> Self {
        Self::spawn_on(&Handle::current(), source, scanner)
    }

    pub fn spawn_on(
        runtime: &Handle,
        source: Arc<dyn AudioSource>,
        scanner: OfflineScanner,
    ) -> Self {
        let cancel = CancelToken::new();
        let (progress_tx, progress_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();

        let task_cancel = cancel.clone();
        let handle = runtime.spawn(async move {
            let label = source.describe();
            let outcome = run_scan(source, scanner, progress_tx, task_cancel).await;
            match &outcome {
                Ok(result) => info!("Scan of {} finished: {} BPM", label, result.bpm),
                Err(e) if e.is_cancellation() => info!("Scan of {} cancelled", label),
                Err(e) => warn!("Scan of {} failed: {}", label, e),
            }
            let _ = result_tx.send(outcome);
        });

        Self {
            cancel,
            progress: progress_rx,
            result: result_rx,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Most recent progress report since the last call
    pub fn latest_progress(&self) -> Option<ScanProgress> {
        self.progress.try_iter().last()
    }

    /// Non-blocking check for the outcome. Yields `Some` at most once.
    pub fn try_result(&self) -> Option<Result<Arc<OfflineScanResult>>> {
        self.result.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the scan to end
    pub async fn join(mut self) -> Result<Arc<OfflineScanResult>> {
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| VixelError::Task(e.to_string()))?;
        }
        self.result
            .try_recv()
            .map_err(|_| VixelError::Task("scan ended without a result".to_string()))?
    }
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_scan(
    source: Arc<dyn AudioSource>,
    scanner: OfflineScanner,
    progress: crossbeam_channel::Sender<ScanProgress>,
    cancel: CancelToken,
) -> Result<Arc<OfflineScanResult>> {
    debug!("Decoding {} for scan", source.describe());
    let audio = source.decode().await?;
    if cancel.is_cancelled() {
        return Err(VixelError::Cancelled);
    }
    let result = scanner.scan_async(&audio, Some(progress), &cancel).await?;
    Ok(Arc::new(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_source(secs: f32) -> Arc<dyn AudioSource> {
        let rate = 8000;
        let samples = (0..(secs * rate as f32) as usize)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 100.0 * i as f32 / rate as f32).sin())
            .collect();
        let audio = DecodedAudio::from_mono(samples, rate).unwrap();
        Arc::new(MemorySource::new("tone", Arc::new(audio)))
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn test_scan_task_delivers_result() {
        let task = ScanTask::spawn(tone_source(1.0), OfflineScanner::new());
        let result = task.join().await.unwrap();
        assert_eq!(result.frame_count(), 30);
        assert_eq!(result.frequency_map[10].bands[1], 1.0);
    }

    #[tokio::test]
    async fn test_cancelled_task_reports_cancellation() {
        let task = ScanTask::spawn(tone_source(5.0), OfflineScanner::new());
        task.cancel();
        let err = task.join().await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_result() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn AudioSource> = Arc::new(FileSource::new(dir.path().join("nope.mp3")));
        let task = ScanTask::spawn(source, OfflineScanner::new());
        assert!(task.join().await.is_err());
    }
}
