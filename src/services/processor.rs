//! Episode identification pipeline.
//!
//! Drives one media file through its identification lifecycle: filename
//! match first, then audio sampling, transcription, and synopsis matching.
//! Also owns series onboarding (metadata fetch, directory scan, filename
//! pass) and the user-facing fix and reset actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    CreateEpisode, CreateSeries, Database, EpisodeRecord, ExtractionStatus, FileOutcome,
    FileStatus, MediaFileRecord, MediaFileRepository, ProcessingStep, ProcessingSummary,
    SaveAudioSegment,
};

use super::audio_sampler::{AudioSampler, SampleOutcome};
use super::filename_parser::{EpisodeNumbering, generate_filename, parse_episode_numbering};
use super::filesystem::FileSystem;
use super::metadata::MetadataService;
use super::scanner::ScannerService;
use super::transcriber::{Transcriber, transcribe_all};
use super::transcript_matcher::TranscriptMatcher;

/// Minimum synopsis-overlap score for an audio match to link an episode.
pub const CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Terminal result of identifying one file
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub file_id: Uuid,
    pub status: FileStatus,
    pub episode_id: Option<Uuid>,
    pub corrected_filename: Option<String>,
    pub confidence: f64,
}

/// Result of an identification run that was not aborted by an error
#[derive(Debug)]
pub enum IdentifyOutcome {
    Update(StatusUpdate),
    Cancelled,
}

/// The identification pipeline and series lifecycle operations
pub struct IdentificationPipeline {
    db: Database,
    metadata: Arc<MetadataService>,
    sampler: AudioSampler,
    transcriber: Arc<dyn Transcriber>,
    matcher: TranscriptMatcher,
    fs: Arc<dyn FileSystem>,
    scanner: ScannerService,
}

impl IdentificationPipeline {
    pub fn new(
        db: Database,
        metadata: Arc<MetadataService>,
        sampler: AudioSampler,
        transcriber: Arc<dyn Transcriber>,
        matcher: TranscriptMatcher,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let scanner = ScannerService::new(db.clone());
        Self {
            db,
            metadata,
            sampler,
            transcriber,
            matcher,
            fs,
            scanner,
        }
    }

    /// Onboard a series: fetch metadata, upsert its episode list, scan the
    /// directory, and finalize every file whose filename already names a
    /// known episode. Files that fail the filename pass stay pending for
    /// the extraction scheduler.
    pub async fn process_series(
        &self,
        directory: &str,
        provider_id: i64,
    ) -> Result<ProcessingSummary> {
        let series_info = self.metadata.series_info(provider_id).await?;
        info!(title = %series_info.title, provider_id, "Processing series");

        let series = self
            .db
            .series()
            .create(CreateSeries {
                provider_id,
                imdb_id: series_info.imdb_id.clone(),
                title: series_info.title.clone(),
                directory: directory.to_string(),
            })
            .await?;

        let episode_infos = self.metadata.all_episodes(provider_id).await?;
        info!(
            title = %series_info.title,
            count = episode_infos.len(),
            "Fetched episode list"
        );

        let episodes_repo = self.db.episodes();
        for episode in episode_infos {
            episodes_repo
                .create(CreateEpisode {
                    series_id: series.id,
                    season_number: episode.season_number,
                    episode_number: episode.episode_number,
                    title: episode.title,
                    synopsis: episode.plot,
                    external_id: episode.external_id,
                    air_date: episode.air_date,
                })
                .await?;
        }

        self.scanner.scan_directory(series.id, directory).await?;

        let episodes = episodes_repo.list_by_series(series.id).await?;
        let files = self.db.media_files().list_by_series(series.id).await?;
        let mut matched = 0;

        for file in &files {
            if file.status != FileStatus::Pending {
                continue;
            }
            if let Some(update) = self.apply_filename_pass(file, &episodes).await? {
                debug!(
                    file = %file.original_filename,
                    episode_id = ?update.episode_id,
                    "Filename matched an episode"
                );
                matched += 1;
            }
        }
        info!(
            title = %series_info.title,
            matched,
            total = files.len(),
            "Filename pass complete"
        );

        self.db.media_files().summary(series.id).await
    }

    /// Identify one file against a series' episode list.
    ///
    /// Never fails for pipeline-stage reasons: a stage failure is recorded
    /// as the `error` status and returned as a normal update. Only
    /// persistence failures propagate as `Err`.
    pub async fn identify_file(
        &self,
        file: &MediaFileRecord,
        episodes: &[EpisodeRecord],
        progress: mpsc::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<IdentifyOutcome> {
        info!(file = %file.original_filename, "Identifying file");

        if let Some(update) = self.apply_filename_pass(file, episodes).await? {
            return Ok(IdentifyOutcome::Update(update));
        }

        match self
            .identify_by_content(file, episodes, progress, cancel)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(
                    file = %file.original_filename,
                    "Identification failed: {:#}",
                    err
                );
                let update = self
                    .finalize(
                        file.id,
                        FileOutcome {
                            episode_id: None,
                            status: FileStatus::Error,
                            corrected_filename: None,
                            confidence: 0.0,
                            is_verified: false,
                        },
                        ProcessingStep::Error,
                    )
                    .await?;
                Ok(IdentifyOutcome::Update(update))
            }
        }
    }

    /// Finalize a file whose filename names an episode that actually exists.
    /// Returns `None` (and writes nothing) when the filename is no help.
    pub async fn apply_filename_pass(
        &self,
        file: &MediaFileRecord,
        episodes: &[EpisodeRecord],
    ) -> Result<Option<StatusUpdate>> {
        let Some(numbering) = parse_episode_numbering(&file.original_filename) else {
            return Ok(None);
        };
        let Some(episode) = find_episode(episodes, numbering) else {
            return Ok(None);
        };

        // No audio needed; mark the extraction sub-state done so the
        // scheduler skips this file.
        self.db
            .media_files()
            .update_extraction(file.id, ExtractionStatus::Completed, 100)
            .await?;
        let update = self
            .finalize(
                file.id,
                FileOutcome {
                    episode_id: Some(episode.id),
                    status: FileStatus::Correct,
                    corrected_filename: None,
                    confidence: 1.0,
                    is_verified: true,
                },
                ProcessingStep::Completed,
            )
            .await?;

        info!(
            file = %file.original_filename,
            season = numbering.season,
            episode = numbering.episode,
            "File is correctly named"
        );
        Ok(Some(update))
    }

    async fn identify_by_content(
        &self,
        file: &MediaFileRecord,
        episodes: &[EpisodeRecord],
        progress: mpsc::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<IdentifyOutcome> {
        let files = self.db.media_files();
        let segments_repo = self.db.audio_segments();

        files
            .update_extraction(file.id, ExtractionStatus::InProgress, 0)
            .await?;
        files
            .update_processing_step(file.id, ProcessingStep::Extracting)
            .await?;
        // Stale segments from an earlier pass would otherwise outlive the upsert
        segments_repo.delete_by_file(file.id).await?;

        let (segment_tx, segment_rx) = mpsc::channel(16);
        let forwarder = self.spawn_progress_writer(file.id, segment_rx, progress);

        let sample_result = self
            .sampler
            .extract_segments(Path::new(&file.original_path), None, segment_tx, cancel)
            .await;
        // The sender is gone, so the writer drains and exits; joining it
        // keeps this task the only extraction-state writer from here on.
        let _ = forwarder.await;

        let outcome = match sample_result {
            Ok(outcome) => outcome,
            Err(err) => {
                files
                    .update_extraction(file.id, ExtractionStatus::Error, 0)
                    .await?;
                return Err(err);
            }
        };

        let segments = match outcome {
            SampleOutcome::Segments(segments) => segments,
            SampleOutcome::Cancelled => {
                // Cancellation is not an error; leave the file re-runnable
                files
                    .update_extraction(file.id, ExtractionStatus::Pending, 0)
                    .await?;
                files
                    .update_processing_step(file.id, ProcessingStep::Pending)
                    .await?;
                return Ok(IdentifyOutcome::Cancelled);
            }
        };

        files
            .update_extraction(file.id, ExtractionStatus::Completed, 100)
            .await?;

        for (index, segment) in segments.iter().enumerate() {
            segments_repo
                .save(SaveAudioSegment {
                    file_id: file.id,
                    segment_number: (index + 1) as i32,
                    start_secs: segment.start_secs,
                    duration_secs: segment.duration_secs,
                    audio_data: Some(segment.payload.clone()),
                    transcript: None,
                })
                .await?;
        }

        files
            .update_processing_step(file.id, ProcessingStep::Transcribing)
            .await?;
        let payloads: Vec<Vec<u8>> = segments.into_iter().map(|s| s.payload).collect();
        let transcripts = transcribe_all(self.transcriber.as_ref(), &payloads).await?;
        for (index, transcript) in transcripts.iter().enumerate() {
            segments_repo
                .set_transcript(file.id, (index + 1) as i32, transcript)
                .await?;
        }

        files
            .update_processing_step(file.id, ProcessingStep::Matching)
            .await?;
        let result = self.matcher.find_best_match(&transcripts, episodes);
        let guess = parse_episode_numbering(&file.original_filename);

        let update = match result.episode {
            Some(episode) if result.score >= CONFIDENCE_THRESHOLD => {
                let agrees = guess.is_some_and(|g| {
                    episode.season_number == g.season as i32
                        && episode.episode_number == g.episode as i32
                });

                if agrees {
                    info!(
                        file = %file.original_filename,
                        score = result.score,
                        "Audio match confirms the filename"
                    );
                    self.finalize(
                        file.id,
                        FileOutcome {
                            episode_id: Some(episode.id),
                            status: FileStatus::Correct,
                            corrected_filename: None,
                            confidence: result.score,
                            is_verified: false,
                        },
                        ProcessingStep::Completed,
                    )
                    .await?
                } else {
                    let corrected = corrected_filename(&file.original_filename, episode);
                    info!(
                        file = %file.original_filename,
                        season = episode.season_number,
                        episode = episode.episode_number,
                        score = result.score,
                        corrected = %corrected,
                        "Audio match disagrees with the filename"
                    );
                    self.finalize(
                        file.id,
                        FileOutcome {
                            episode_id: Some(episode.id),
                            status: FileStatus::Incorrect,
                            corrected_filename: Some(corrected),
                            confidence: result.score,
                            is_verified: false,
                        },
                        ProcessingStep::Completed,
                    )
                    .await?
                }
            }
            _ => {
                info!(
                    file = %file.original_filename,
                    score = result.score,
                    "No confident match for file"
                );
                self.finalize(
                    file.id,
                    FileOutcome {
                        episode_id: None,
                        status: FileStatus::Unknown,
                        corrected_filename: None,
                        confidence: result.score,
                        is_verified: false,
                    },
                    ProcessingStep::Completed,
                )
                .await?
            }
        };

        Ok(IdentifyOutcome::Update(update))
    }

    /// Persist segment-level extraction progress and forward it upstream.
    fn spawn_progress_writer(
        &self,
        file_id: Uuid,
        mut segment_rx: mpsc::Receiver<f32>,
        aggregate_tx: mpsc::Sender<f32>,
    ) -> tokio::task::JoinHandle<()> {
        let files = MediaFileRepository::new(self.db.pool().clone());
        tokio::spawn(async move {
            while let Some(fraction) = segment_rx.recv().await {
                let pct = (fraction * 100.0).round() as i32;
                if let Err(err) = files
                    .update_extraction(file_id, ExtractionStatus::InProgress, pct)
                    .await
                {
                    warn!(
                        file_id = %file_id,
                        "Failed to persist extraction progress: {}",
                        err
                    );
                }
                let _ = aggregate_tx.send(fraction).await;
            }
        })
    }

    async fn finalize(
        &self,
        file_id: Uuid,
        outcome: FileOutcome,
        step: ProcessingStep,
    ) -> Result<StatusUpdate> {
        let files = self.db.media_files();
        files.update_outcome(file_id, &outcome).await?;
        files.update_processing_step(file_id, step).await?;

        Ok(StatusUpdate {
            file_id,
            status: outcome.status,
            episode_id: outcome.episode_id,
            corrected_filename: outcome.corrected_filename,
            confidence: outcome.confidence,
        })
    }

    /// Rename a file on disk to match a user-chosen episode and mark it
    /// fixed. Returns the renamed path.
    pub async fn fix_file(&self, file_id: Uuid, episode_id: Uuid) -> Result<PathBuf> {
        let file = self
            .db
            .media_files()
            .get_by_id(file_id)
            .await?
            .with_context(|| format!("File not found: {file_id}"))?;
        let episode = self
            .db
            .episodes()
            .get_by_id(episode_id)
            .await?
            .with_context(|| format!("Episode not found: {episode_id}"))?;

        if episode.series_id != file.series_id {
            bail!("Episode belongs to a different series than the file");
        }

        let new_name = corrected_filename(&file.original_filename, &episode);
        let new_path = if new_name == file.original_filename {
            PathBuf::from(&file.original_path)
        } else {
            self.fs
                .rename(Path::new(&file.original_path), &new_name)
                .await?
        };

        self.db
            .media_files()
            .update_outcome(
                file_id,
                &FileOutcome {
                    episode_id: Some(episode_id),
                    status: FileStatus::Fixed,
                    corrected_filename: Some(new_name.clone()),
                    confidence: 1.0,
                    is_verified: true,
                },
            )
            .await?;
        self.db
            .media_files()
            .update_processing_step(file_id, ProcessingStep::Completed)
            .await?;

        info!(
            file = %file.original_filename,
            renamed_to = %new_name,
            season = episode.season_number,
            episode = episode.episode_number,
            "File fixed"
        );
        Ok(new_path)
    }

    /// Clear a file's outcome and sub-states so the pipeline can run again.
    pub async fn reset_file(&self, file_id: Uuid) -> Result<()> {
        let file = self
            .db
            .media_files()
            .get_by_id(file_id)
            .await?
            .with_context(|| format!("File not found: {file_id}"))?;

        self.db.media_files().reset_for_reprocessing(file_id).await?;
        self.db.audio_segments().delete_by_file(file_id).await?;

        info!(file = %file.original_filename, "File reset for re-processing");
        Ok(())
    }

    /// Remove a series; episodes, files, and segments go with it.
    pub async fn remove_series(&self, series_id: Uuid) -> Result<bool> {
        let removed = self.db.series().remove(series_id).await?;
        if removed {
            info!(series_id = %series_id, "Series removed");
        }
        Ok(removed)
    }
}

fn find_episode(episodes: &[EpisodeRecord], numbering: EpisodeNumbering) -> Option<&EpisodeRecord> {
    episodes.iter().find(|ep| {
        ep.season_number == numbering.season as i32 && ep.episode_number == numbering.episode as i32
    })
}

/// Canonical filename for an episode, keeping the file's extension.
fn corrected_filename(original_filename: &str, episode: &EpisodeRecord) -> String {
    let title = episode
        .title
        .clone()
        .unwrap_or_else(|| format!("Episode {}", episode.episode_number));
    generate_filename(
        original_filename,
        episode.season_number as u32,
        episode.episode_number as u32,
        &title,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateMediaFile;
    use crate::services::audio_sampler::AudioExtractor;
    use crate::services::filesystem::OsFileSystem;
    use crate::services::metadata::{
        EpisodeInfo, MetadataProvider, SeriesInfo, SeriesSearchResult,
    };
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct StubExtractor {
        duration: f64,
        fail: bool,
        calls: AtomicU32,
    }

    impl StubExtractor {
        fn ok() -> Self {
            Self {
                duration: 600.0,
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                duration: 600.0,
                fail: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AudioExtractor for StubExtractor {
        async fn media_duration(&self, _path: &Path) -> Result<f64> {
            Ok(self.duration)
        }

        async fn extract(
            &self,
            _path: &Path,
            _start_secs: f64,
            _duration_secs: f64,
            output_path: &Path,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("stub extractor failure");
            }
            std::fs::write(output_path, b"clip")?;
            Ok(())
        }
    }

    struct StubTranscriber {
        text: String,
        fail: bool,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String> {
            if self.fail {
                anyhow::bail!("transcription backend unavailable");
            }
            Ok(self.text.clone())
        }
    }

    struct StubProvider {
        episodes: Vec<EpisodeInfo>,
    }

    #[async_trait]
    impl MetadataProvider for StubProvider {
        async fn get_series_info(&self, provider_id: i64) -> Result<SeriesInfo> {
            Ok(SeriesInfo {
                provider_id,
                imdb_id: Some(format!("tt{provider_id}")),
                title: "Stub Show".into(),
                year: Some("2020".into()),
                total_seasons: 1,
                plot: None,
                poster_url: None,
            })
        }

        async fn get_season_info(
            &self,
            _provider_id: i64,
            _season_number: i32,
        ) -> Result<Vec<EpisodeInfo>> {
            Ok(self.episodes.clone())
        }

        async fn search_by_title(&self, _title: &str) -> Result<Vec<SeriesSearchResult>> {
            Ok(vec![])
        }
    }

    async fn test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database::new(pool);
        db.init_schema().await.unwrap();
        db
    }

    struct Fixture {
        db: Database,
        pipeline: IdentificationPipeline,
        extractor: Arc<StubExtractor>,
        _temp: TempDir,
    }

    async fn fixture(extractor: StubExtractor, transcriber: StubTranscriber) -> Fixture {
        fixture_with_provider(extractor, transcriber, StubProvider { episodes: vec![] }).await
    }

    async fn fixture_with_provider(
        extractor: StubExtractor,
        transcriber: StubTranscriber,
        provider: StubProvider,
    ) -> Fixture {
        let db = test_db().await;
        let temp = TempDir::new().unwrap();
        let extractor = Arc::new(extractor);
        let metadata = Arc::new(MetadataService::new(
            Arc::new(provider),
            db.clone(),
            Duration::from_secs(30 * 86400),
        ));
        let sampler = AudioSampler::new(
            extractor.clone(),
            Arc::new(OsFileSystem),
            temp.path().join("clips"),
        )
        .with_retry_pause(Duration::from_millis(1));
        let pipeline = IdentificationPipeline::new(
            db.clone(),
            metadata,
            sampler,
            Arc::new(transcriber),
            TranscriptMatcher::new(),
            Arc::new(OsFileSystem),
        );
        Fixture {
            db,
            pipeline,
            extractor,
            _temp: temp,
        }
    }

    async fn seed_series(db: &Database) -> Uuid {
        db.series()
            .create(CreateSeries {
                provider_id: 77,
                imdb_id: Some("tt77".into()),
                title: "Stub Show".into(),
                directory: "/tmp/stub-show".into(),
            })
            .await
            .unwrap()
            .id
    }

    async fn seed_episode(
        db: &Database,
        series_id: Uuid,
        season: i32,
        episode: i32,
        title: &str,
        synopsis: &str,
    ) -> EpisodeRecord {
        db.episodes()
            .create(CreateEpisode {
                series_id,
                season_number: season,
                episode_number: episode,
                title: Some(title.into()),
                synopsis: Some(synopsis.into()),
                external_id: None,
                air_date: None,
            })
            .await
            .unwrap()
    }

    async fn seed_file(db: &Database, series_id: Uuid, filename: &str) -> MediaFileRecord {
        let (record, _) = db
            .media_files()
            .find_or_create(CreateMediaFile {
                series_id,
                original_path: format!("/media/stub-show/{filename}"),
                original_filename: filename.into(),
            })
            .await
            .unwrap();
        record
    }

    fn run_args() -> (mpsc::Sender<f32>, mpsc::Receiver<f32>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        (tx, rx, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_filename_match_skips_audio_entirely() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        seed_episode(&fx.db, series_id, 1, 3, "Third Episode", "words here").await;
        let episodes = fx.db.episodes().list_by_series(series_id).await.unwrap();
        let file = seed_file(&fx.db, series_id, "Show.S01E03.mkv").await;

        let (tx, _rx, cancel) = run_args();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        let update = match outcome {
            IdentifyOutcome::Update(update) => update,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(update.status, FileStatus::Correct);
        assert_eq!(update.confidence, 1.0);
        assert!(update.episode_id.is_some());
        assert_eq!(fx.extractor.calls.load(Ordering::SeqCst), 0);

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Correct);
        assert!(row.is_verified);
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Completed);
        assert_eq!(row.audio_extraction_progress, 100);
        assert_eq!(row.processing_step, ProcessingStep::Completed);
    }

    #[tokio::test]
    async fn test_no_pattern_and_no_word_overlap_is_unknown() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "zzz qqq vvv".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        seed_episode(&fx.db, series_id, 1, 5, "Fifth", "alpha beta gamma").await;
        let episodes = fx.db.episodes().list_by_series(series_id).await.unwrap();
        let file = seed_file(&fx.db, series_id, "Show.Episode5.mkv").await;

        let (tx, _rx, cancel) = run_args();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        let update = match outcome {
            IdentifyOutcome::Update(update) => update,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(update.status, FileStatus::Unknown);
        assert_eq!(update.confidence, 0.0);
        assert!(update.episode_id.is_none());

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Unknown);
        assert!(row.episode_id.is_none());
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Completed);
    }

    #[tokio::test]
    async fn test_confident_match_without_guess_is_incorrect_with_corrected_name() {
        let synopsis = "the crew plans a daring vault heist downtown";
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: synopsis.into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        seed_episode(&fx.db, series_id, 1, 7, "The Heist", synopsis).await;
        seed_episode(&fx.db, series_id, 1, 8, "Aftermath", "totally unrelated content words").await;
        let episodes = fx.db.episodes().list_by_series(series_id).await.unwrap();
        let file = seed_file(&fx.db, series_id, "randomname.mkv").await;

        let (tx, _rx, cancel) = run_args();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        let update = match outcome {
            IdentifyOutcome::Update(update) => update,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(update.status, FileStatus::Incorrect);
        assert_eq!(
            update.corrected_filename.as_deref(),
            Some("S01E07 - The Heist.mkv")
        );
        assert!(update.confidence >= CONFIDENCE_THRESHOLD);

        // Corrected name is stored, never applied to disk by identification
        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.original_filename, "randomname.mkv");
        assert_eq!(
            row.corrected_filename.as_deref(),
            Some("S01E07 - The Heist.mkv")
        );

        // All segments persisted with transcripts
        let segments = fx.db.audio_segments().list_by_file(file.id).await.unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.transcript.is_some()));
    }

    #[tokio::test]
    async fn test_sampler_total_failure_is_error_status() {
        let fx = fixture(
            StubExtractor::failing(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        seed_episode(&fx.db, series_id, 1, 1, "Pilot", "some synopsis").await;
        let episodes = fx.db.episodes().list_by_series(series_id).await.unwrap();
        let file = seed_file(&fx.db, series_id, "mystery.mkv").await;

        let (tx, _rx, cancel) = run_args();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        let update = match outcome {
            IdentifyOutcome::Update(update) => update,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(update.status, FileStatus::Error);
        assert_eq!(update.confidence, 0.0);
        assert!(update.episode_id.is_none());

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Error);
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Error);
        assert_eq!(row.processing_step, ProcessingStep::Error);
    }

    #[tokio::test]
    async fn test_transcription_failure_is_error_but_extraction_stays_done() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: String::new(),
                fail: true,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        seed_episode(&fx.db, series_id, 1, 1, "Pilot", "some synopsis").await;
        let episodes = fx.db.episodes().list_by_series(series_id).await.unwrap();
        let file = seed_file(&fx.db, series_id, "mystery.mkv").await;

        let (tx, _rx, cancel) = run_args();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        match outcome {
            IdentifyOutcome::Update(update) => assert_eq!(update.status, FileStatus::Error),
            other => panic!("expected update, got {:?}", other),
        }

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Error);
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Completed);
        assert_eq!(row.audio_extraction_progress, 100);
        assert_eq!(row.processing_step, ProcessingStep::Error);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_file_re_runnable() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        let episodes = vec![];
        let file = seed_file(&fx.db, series_id, "mystery.mkv").await;

        let (tx, _rx, cancel) = run_args();
        cancel.cancel();
        let outcome = fx
            .pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, IdentifyOutcome::Cancelled));

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Pending);
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Pending);
        assert_eq!(row.audio_extraction_progress, 0);
        assert_eq!(row.processing_step, ProcessingStep::Pending);
    }

    #[tokio::test]
    async fn test_fix_file_renames_and_marks_fixed() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        let episode = seed_episode(&fx.db, series_id, 1, 7, "The Heist", "synopsis").await;

        let dir = TempDir::new().unwrap();
        let on_disk = dir.path().join("wrong-name.mkv");
        std::fs::write(&on_disk, b"video").unwrap();
        let (file, _) = fx
            .db
            .media_files()
            .find_or_create(CreateMediaFile {
                series_id,
                original_path: on_disk.to_string_lossy().to_string(),
                original_filename: "wrong-name.mkv".into(),
            })
            .await
            .unwrap();

        let new_path = fx.pipeline.fix_file(file.id, episode.id).await.unwrap();

        assert!(new_path.ends_with("S01E07 - The Heist.mkv"));
        assert!(new_path.exists());
        assert!(!on_disk.exists());

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Fixed);
        assert_eq!(row.confidence, Some(1.0));
        assert!(row.is_verified);
        assert_eq!(row.episode_id, Some(episode.id));
        assert_eq!(
            row.corrected_filename.as_deref(),
            Some("S01E07 - The Heist.mkv")
        );
    }

    #[tokio::test]
    async fn test_fix_file_skips_rename_when_name_already_matches() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        let episode = seed_episode(&fx.db, series_id, 1, 7, "The Heist", "synopsis").await;

        let dir = TempDir::new().unwrap();
        let on_disk = dir.path().join("S01E07 - The Heist.mkv");
        std::fs::write(&on_disk, b"video").unwrap();
        let (file, _) = fx
            .db
            .media_files()
            .find_or_create(CreateMediaFile {
                series_id,
                original_path: on_disk.to_string_lossy().to_string(),
                original_filename: "S01E07 - The Heist.mkv".into(),
            })
            .await
            .unwrap();

        let new_path = fx.pipeline.fix_file(file.id, episode.id).await.unwrap();

        assert_eq!(new_path, on_disk);
        assert!(on_disk.exists());
    }

    #[tokio::test]
    async fn test_fix_file_rejects_cross_series_episode() {
        let fx = fixture(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        let other_series = fx
            .db
            .series()
            .create(CreateSeries {
                provider_id: 88,
                imdb_id: None,
                title: "Other Show".into(),
                directory: "/tmp/other".into(),
            })
            .await
            .unwrap();
        let foreign_episode =
            seed_episode(&fx.db, other_series.id, 1, 1, "Pilot", "synopsis").await;
        let file = seed_file(&fx.db, series_id, "mystery.mkv").await;

        let err = fx
            .pipeline
            .fix_file(file.id, foreign_episode.id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("different series"));
    }

    #[tokio::test]
    async fn test_reset_clears_error_state() {
        let fx = fixture(
            StubExtractor::failing(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
        )
        .await;
        let series_id = seed_series(&fx.db).await;
        let episodes = vec![];
        let file = seed_file(&fx.db, series_id, "mystery.mkv").await;

        let (tx, _rx, cancel) = run_args();
        fx.pipeline
            .identify_file(&file, &episodes, tx, &cancel)
            .await
            .unwrap();

        fx.pipeline.reset_file(file.id).await.unwrap();

        let row = fx
            .db
            .media_files()
            .get_by_id(file.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Pending);
        assert_eq!(row.audio_extraction_status, ExtractionStatus::Pending);
        assert_eq!(row.processing_step, ProcessingStep::Pending);
        assert!(row.confidence.is_none());
    }

    #[tokio::test]
    async fn test_process_series_onboards_and_runs_filename_pass() {
        let provider = StubProvider {
            episodes: vec![
                EpisodeInfo {
                    external_id: Some("tt77e101".into()),
                    title: Some("Pilot".into()),
                    air_date: Some("2020-01-01".into()),
                    season_number: 1,
                    episode_number: 1,
                    rating: None,
                    plot: Some("the beginning".into()),
                },
                EpisodeInfo {
                    external_id: Some("tt77e102".into()),
                    title: Some("Second".into()),
                    air_date: Some("2020-01-08".into()),
                    season_number: 1,
                    episode_number: 2,
                    rating: None,
                    plot: Some("the continuation".into()),
                },
            ],
        };
        let fx = fixture_with_provider(
            StubExtractor::ok(),
            StubTranscriber {
                text: "unused".into(),
                fail: false,
            },
            provider,
        )
        .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Show.S01E01.mkv"), b"v").unwrap();
        std::fs::write(dir.path().join("garbage.mkv"), b"v").unwrap();

        let summary = fx
            .pipeline
            .process_series(&dir.path().to_string_lossy(), 77)
            .await
            .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.pending, 1);

        let series = fx
            .db
            .series()
            .get_by_provider_id(77)
            .await
            .unwrap()
            .unwrap();
        let episodes = fx.db.episodes().list_by_series(series.id).await.unwrap();
        assert_eq!(episodes.len(), 2);

        // The unmatched file is left for the extraction scheduler
        let for_extraction = fx
            .db
            .media_files()
            .list_for_extraction(series.id)
            .await
            .unwrap();
        assert_eq!(for_extraction.len(), 1);
        assert_eq!(for_extraction[0].original_filename, "garbage.mkv");
    }
}
