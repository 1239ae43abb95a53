//! Audio segment sampling for episode identification.
//!
//! Pulls short mono MP3 clips out of a media file (by default the first,
//! middle, and last minute of the runtime) for the transcription stage.
//! Clips are written to a dedicated temp directory and removed before a
//! call returns, even on the failure path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filesystem::FileSystem;

/// Attempts per segment, including the first.
const SEGMENT_ATTEMPTS: u32 = 3;

/// Fixed pause between attempts for a failing segment.
const SEGMENT_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Length of each default sample in seconds.
const DEFAULT_SEGMENT_SECS: f64 = 60.0;

/// Producer of audio clips from a media file. Implemented by `FfmpegService`.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Total runtime of the media file in seconds.
    async fn media_duration(&self, path: &Path) -> Result<f64>;

    /// Extract `duration_secs` of audio starting at `start_secs` into `output_path`.
    async fn extract(
        &self,
        path: &Path,
        start_secs: f64,
        duration_secs: f64,
        output_path: &Path,
    ) -> Result<()>;
}

/// A time window to sample from the source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSpec {
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// A successfully sampled segment with its audio bytes.
#[derive(Debug, Clone)]
pub struct ExtractedSegment {
    pub start_secs: f64,
    pub duration_secs: f64,
    pub payload: Vec<u8>,
}

/// Result of a sampling run that did not error out entirely.
#[derive(Debug)]
pub enum SampleOutcome {
    /// The segments that survived, possibly fewer than requested.
    Segments(Vec<ExtractedSegment>),
    /// The run was cancelled before all segments resolved.
    Cancelled,
}

/// Default sampling plan: first minute, middle minute, last minute.
///
/// The last segment is clamped so it never starts before zero. The middle
/// segment start can go negative for very short files, which seeks to the
/// beginning when handed to ffmpeg.
pub fn plan_default_segments(duration_secs: f64) -> Vec<SegmentSpec> {
    vec![
        SegmentSpec {
            start_secs: 0.0,
            duration_secs: DEFAULT_SEGMENT_SECS,
        },
        SegmentSpec {
            start_secs: (duration_secs / 2.0).floor() - 30.0,
            duration_secs: DEFAULT_SEGMENT_SECS,
        },
        SegmentSpec {
            start_secs: (duration_secs - 60.0).max(0.0),
            duration_secs: DEFAULT_SEGMENT_SECS,
        },
    ]
}

/// Samples audio segments from media files into temporary MP3 clips.
pub struct AudioSampler {
    extractor: Arc<dyn AudioExtractor>,
    fs: Arc<dyn FileSystem>,
    temp_dir: PathBuf,
    retry_pause: Duration,
}

impl AudioSampler {
    pub fn new(
        extractor: Arc<dyn AudioExtractor>,
        fs: Arc<dyn FileSystem>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            fs,
            temp_dir,
            retry_pause: SEGMENT_RETRY_PAUSE,
        }
    }

    /// Override the pause between attempts for a failing segment.
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Extract the given segments (or the default plan when `segments` is
    /// empty or absent) and return their audio payloads.
    ///
    /// Each segment gets up to three attempts with a fixed pause between
    /// them. A segment that exhausts its attempts is dropped from the
    /// result; the call only fails when every segment fails. Fractional
    /// progress (resolved segments over total) is sent after each segment,
    /// and temporary clips are deleted before this returns.
    pub async fn extract_segments(
        &self,
        path: &Path,
        segments: Option<Vec<SegmentSpec>>,
        progress: mpsc::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<SampleOutcome> {
        let mut artifacts: Vec<PathBuf> = Vec::new();
        let result = self
            .run_segments(path, segments, progress, cancel, &mut artifacts)
            .await;
        self.cleanup(&artifacts).await;
        result
    }

    async fn run_segments(
        &self,
        path: &Path,
        segments: Option<Vec<SegmentSpec>>,
        progress: mpsc::Sender<f32>,
        cancel: &CancellationToken,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<SampleOutcome> {
        let specs = match segments {
            Some(specs) if !specs.is_empty() => specs,
            _ => {
                let duration = self
                    .extractor
                    .media_duration(path)
                    .await
                    .with_context(|| {
                        format!("Failed to determine duration of '{}'", path.display())
                    })?;
                plan_default_segments(duration)
            }
        };

        self.fs
            .create_dir_all(&self.temp_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create audio temp directory '{}'",
                    self.temp_dir.display()
                )
            })?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("segment");
        let run_id = chrono::Utc::now().timestamp_millis();

        let total = specs.len();
        let mut extracted: Vec<ExtractedSegment> = Vec::with_capacity(total);
        let mut last_error: Option<anyhow::Error> = None;
        let mut failed = 0usize;

        for (index, spec) in specs.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    path = %path.display(),
                    "Audio sampling cancelled after {} of {} segments",
                    index,
                    total
                );
                return Ok(SampleOutcome::Cancelled);
            }

            let clip_path = self.temp_dir.join(format!("{stem}-{run_id}-{index}.mp3"));
            artifacts.push(clip_path.clone());

            let mut attempt = 1;
            loop {
                match self.extract_one(path, spec, &clip_path).await {
                    Ok(payload) => {
                        debug!(
                            path = %path.display(),
                            start_secs = spec.start_secs,
                            bytes = payload.len(),
                            "Extracted audio segment"
                        );
                        extracted.push(ExtractedSegment {
                            start_secs: spec.start_secs,
                            duration_secs: spec.duration_secs,
                            payload,
                        });
                        break;
                    }
                    Err(err) if attempt < SEGMENT_ATTEMPTS => {
                        warn!(
                            path = %path.display(),
                            start_secs = spec.start_secs,
                            attempt,
                            "Segment extraction failed, retrying: {}",
                            err
                        );
                        attempt += 1;
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                info!(
                                    path = %path.display(),
                                    "Audio sampling cancelled while retrying segment {}",
                                    index
                                );
                                return Ok(SampleOutcome::Cancelled);
                            }
                            _ = sleep(self.retry_pause) => {}
                        }
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            start_secs = spec.start_secs,
                            "Giving up on segment after {} attempts: {}",
                            SEGMENT_ATTEMPTS,
                            err
                        );
                        failed += 1;
                        last_error = Some(err);
                        break;
                    }
                }
            }

            let _ = progress.send((index + 1) as f32 / total as f32).await;
        }

        if extracted.is_empty() {
            let err = last_error
                .unwrap_or_else(|| anyhow::anyhow!("no segments were attempted"));
            return Err(err.context(format!(
                "All {} audio segments failed for '{}'",
                total,
                path.display()
            )));
        }

        if failed > 0 {
            warn!(
                path = %path.display(),
                "{} of {} audio segments failed, continuing with the rest",
                failed,
                total
            );
        }

        Ok(SampleOutcome::Segments(extracted))
    }

    async fn extract_one(
        &self,
        source: &Path,
        spec: &SegmentSpec,
        output: &Path,
    ) -> Result<Vec<u8>> {
        self.extractor
            .extract(source, spec.start_secs, spec.duration_secs, output)
            .await?;
        self.fs.read(output).await.with_context(|| {
            format!("Failed to read extracted audio '{}'", output.display())
        })
    }

    /// Best-effort removal of temporary clips. Missing files are skipped,
    /// deletion failures are logged and never propagated.
    pub async fn cleanup(&self, paths: &[PathBuf]) {
        for path in paths {
            if !self.fs.exists(path).await {
                continue;
            }
            match self.fs.remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Deleted temporary audio clip"),
                Err(err) => warn!(
                    path = %path.display(),
                    "Could not delete temporary audio clip: {}",
                    err
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::filesystem::OsFileSystem;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct ScriptedExtractor {
        duration: f64,
        // start seconds -> failures left before the segment succeeds
        flaky: Mutex<HashMap<i64, u32>>,
        always_fail: Vec<i64>,
        calls: AtomicU32,
    }

    impl ScriptedExtractor {
        fn new(duration: f64) -> Self {
            Self {
                duration,
                flaky: Mutex::new(HashMap::new()),
                always_fail: Vec::new(),
                calls: AtomicU32::new(0),
            }
        }

        fn failing_first(mut self, start_secs: i64, times: u32) -> Self {
            self.flaky.get_mut().insert(start_secs, times);
            self
        }

        fn always_failing(mut self, start_secs: i64) -> Self {
            self.always_fail.push(start_secs);
            self
        }
    }

    #[async_trait]
    impl AudioExtractor for ScriptedExtractor {
        async fn media_duration(&self, _path: &Path) -> Result<f64> {
            Ok(self.duration)
        }

        async fn extract(
            &self,
            _path: &Path,
            start_secs: f64,
            _duration_secs: f64,
            output_path: &Path,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = start_secs as i64;
            if self.always_fail.contains(&key) {
                anyhow::bail!("scripted failure at {}s", key);
            }
            {
                let mut flaky = self.flaky.lock();
                if let Some(left) = flaky.get_mut(&key) {
                    if *left > 0 {
                        *left -= 1;
                        anyhow::bail!("scripted transient failure at {}s", key);
                    }
                }
            }
            std::fs::write(output_path, b"fake mp3 bytes")?;
            Ok(())
        }
    }

    fn sampler(extractor: ScriptedExtractor, dir: &TempDir) -> AudioSampler {
        AudioSampler::new(
            Arc::new(extractor),
            Arc::new(OsFileSystem),
            dir.path().join("clips"),
        )
        .with_retry_pause(Duration::from_millis(1))
    }

    async fn drain(mut rx: mpsc::Receiver<f32>) -> Vec<f32> {
        let mut values = Vec::new();
        while let Some(value) = rx.recv().await {
            values.push(value);
        }
        values
    }

    #[test]
    fn test_plan_default_segments_for_long_file() {
        let segments = plan_default_segments(600.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start_secs, 0.0);
        assert_eq!(segments[1].start_secs, 270.0);
        assert_eq!(segments[2].start_secs, 540.0);
        assert!(segments.iter().all(|s| s.duration_secs == 60.0));
    }

    #[test]
    fn test_plan_default_segments_for_short_file() {
        let segments = plan_default_segments(30.0);
        assert_eq!(segments[1].start_secs, -15.0);
        assert_eq!(segments[2].start_secs, 0.0);
    }

    #[tokio::test]
    async fn test_extract_segments_returns_all_on_success() {
        let dir = TempDir::new().unwrap();
        let sampler = sampler(ScriptedExtractor::new(600.0), &dir);
        let (tx, rx) = mpsc::channel(16);

        let outcome = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                None,
                tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let segments = match outcome {
            SampleOutcome::Segments(segments) => segments,
            other => panic!("expected segments, got {:?}", other),
        };
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start_secs, 0.0);
        assert_eq!(segments[1].start_secs, 270.0);
        assert!(segments.iter().all(|s| s.payload == b"fake mp3 bytes"));

        let progress = drain(rx).await;
        assert_eq!(progress.len(), 3);
        assert!((progress[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((progress[2] - 1.0).abs() < 1e-6);

        // Temp clips are gone once the call returns
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("clips"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_retries_transient_segment_failure() {
        let dir = TempDir::new().unwrap();
        let extractor = ScriptedExtractor::new(600.0).failing_first(10, 2);
        let sampler = sampler(extractor, &dir);
        let (tx, _rx) = mpsc::channel(16);

        let outcome = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                Some(vec![SegmentSpec {
                    start_secs: 10.0,
                    duration_secs: 60.0,
                }]),
                tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            SampleOutcome::Segments(segments) => assert_eq!(segments.len(), 1),
            other => panic!("expected segments, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_surviving_segments() {
        let dir = TempDir::new().unwrap();
        let extractor = ScriptedExtractor::new(600.0).always_failing(100);
        let sampler = sampler(extractor, &dir);
        let (tx, rx) = mpsc::channel(16);

        let outcome = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                Some(vec![
                    SegmentSpec {
                        start_secs: 0.0,
                        duration_secs: 60.0,
                    },
                    SegmentSpec {
                        start_secs: 100.0,
                        duration_secs: 60.0,
                    },
                ]),
                tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            SampleOutcome::Segments(segments) => {
                assert_eq!(segments.len(), 1);
                assert_eq!(segments[0].start_secs, 0.0);
            }
            other => panic!("expected segments, got {:?}", other),
        }

        // Both segments still resolve for progress purposes
        let progress = drain(rx).await;
        assert!((progress.last().unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_all_segments_failed_is_an_error() {
        let dir = TempDir::new().unwrap();
        let extractor = ScriptedExtractor::new(600.0)
            .always_failing(0)
            .always_failing(5);
        let sampler = sampler(extractor, &dir);
        let (tx, _rx) = mpsc::channel(16);

        let err = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                Some(vec![
                    SegmentSpec {
                        start_secs: 0.0,
                        duration_secs: 60.0,
                    },
                    SegmentSpec {
                        start_secs: 5.0,
                        duration_secs: 60.0,
                    },
                ]),
                tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("All 2 audio segments failed"));
    }

    #[tokio::test]
    async fn test_exhausts_three_attempts_before_giving_up() {
        let dir = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(600.0).always_failing(0));
        let sampler = AudioSampler::new(
            extractor.clone(),
            Arc::new(OsFileSystem),
            dir.path().join("clips"),
        )
        .with_retry_pause(Duration::from_millis(1));
        let (tx, _rx) = mpsc::channel(16);

        let result = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                Some(vec![SegmentSpec {
                    start_secs: 0.0,
                    duration_secs: 60.0,
                }]),
                tx,
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let dir = TempDir::new().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(600.0));
        let sampler = AudioSampler::new(
            extractor.clone(),
            Arc::new(OsFileSystem),
            dir.path().join("clips"),
        );
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = sampler
            .extract_segments(
                Path::new("/media/show/episode.mkv"),
                Some(vec![SegmentSpec {
                    start_secs: 0.0,
                    duration_secs: 60.0,
                }]),
                tx,
                &cancel,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SampleOutcome::Cancelled));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cleanup_ignores_missing_files() {
        let dir = TempDir::new().unwrap();
        let sampler = sampler(ScriptedExtractor::new(600.0), &dir);

        let existing = dir.path().join("keep-me.mp3");
        std::fs::write(&existing, b"data").unwrap();
        let missing = dir.path().join("never-existed.mp3");

        sampler.cleanup(&[existing.clone(), missing]).await;

        assert!(!existing.exists());
    }
}
