//! Series-level extraction scheduling.
//!
//! One run per series at a time: a second request while a run is in
//! flight gets [RunSeries::AlreadyRunning] instead of a new run. Candidate
//! files are processed in batches of at most the configured process
//! ceiling, and a batch drains completely before the next one starts.
//! Progress goes out as [RunProgress] broadcast events; the terminal
//! event carries `is_complete` on every exit path, failure included.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{
    Database, EpisodeRecord, ExtractionStatus, MAX_EXTRACTION_PROCESSES, MediaFileRecord,
    default_extraction_processes,
};

use super::processor::{IdentificationPipeline, IdentifyOutcome};

/// Broadcast buffer for run events; slow receivers see `Lagged`, not stalls.
const EVENT_CAPACITY: usize = 64;

/// Snapshot of a run's aggregate progress
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub series_id: Uuid,
    /// Every file of the series, not just this run's candidates
    pub total_files: usize,
    /// Files resolved during this run, successes and failures alike
    pub processed_files: usize,
    /// Mean of per-file percentages: completed counts 100, pending 0
    pub aggregate_percent: f64,
    pub is_complete: bool,
}

/// Outcome of asking the scheduler to start a run
#[derive(Debug)]
pub enum RunSeries {
    /// A run was started; the receiver yields [RunProgress] events until
    /// one arrives with `is_complete` set.
    Started(broadcast::Receiver<RunProgress>),
    /// The series already has a run in flight.
    AlreadyRunning,
}

/// Per-file extraction state inside a status report
#[derive(Debug, Clone, Serialize)]
pub struct FileExtractionState {
    pub file_id: Uuid,
    pub filename: String,
    pub status: ExtractionStatus,
    pub progress: i32,
}

/// Point-in-time view of a series' extraction work, computed from the
/// persisted rows plus the live run marker
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionStatusReport {
    pub series_id: Uuid,
    pub is_processing: bool,
    pub overall_progress: f64,
    pub pending_files: usize,
    pub in_progress_files: usize,
    pub completed_files: usize,
    pub error_files: usize,
    pub files: Vec<FileExtractionState>,
}

/// State owned by a single run: the progress table, counters, the event
/// channel, and the cancellation token. Dies with the run.
struct JobContext {
    series_id: Uuid,
    total_files: usize,
    progress: Mutex<HashMap<Uuid, f32>>,
    processed: AtomicUsize,
    events: broadcast::Sender<RunProgress>,
    cancel: CancellationToken,
}

impl JobContext {
    fn set_file_progress(&self, file_id: Uuid, percent: f32) {
        self.progress
            .lock()
            .insert(file_id, percent.clamp(0.0, 100.0));
    }

    fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn aggregate_percent(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        let sum: f64 = self.progress.lock().values().map(|p| *p as f64).sum();
        sum / self.total_files as f64
    }

    fn emit(&self, is_complete: bool) {
        let event = RunProgress {
            series_id: self.series_id,
            total_files: self.total_files,
            processed_files: self.processed.load(Ordering::SeqCst),
            aggregate_percent: self.aggregate_percent(),
            is_complete,
        };
        // No receivers is fine; the run does not depend on observers.
        let _ = self.events.send(event);
    }
}

/// Removes the series from the active-run registry when dropped, so the
/// marker clears on every exit path of a run.
struct ActiveRunGuard {
    runs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    series_id: Uuid,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.runs.lock().remove(&self.series_id);
    }
}

/// Schedules identification runs over the files of a series
pub struct ExtractionService {
    db: Database,
    pipeline: Arc<IdentificationPipeline>,
    active_runs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl ExtractionService {
    pub fn new(db: Database, pipeline: Arc<IdentificationPipeline>) -> Self {
        Self {
            db,
            pipeline,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run over every file of the series still owed extraction.
    ///
    /// Returns [RunSeries::AlreadyRunning] when the series has a run in
    /// flight. Otherwise the run is spawned in the background and the
    /// returned receiver reports its progress.
    pub async fn run_series(&self, series_id: Uuid) -> Result<RunSeries> {
        let cancel = CancellationToken::new();
        {
            let mut runs = self.active_runs.lock();
            if runs.contains_key(&series_id) {
                debug!(%series_id, "Extraction run already in flight");
                return Ok(RunSeries::AlreadyRunning);
            }
            runs.insert(series_id, cancel.clone());
        }
        let guard = ActiveRunGuard {
            runs: self.active_runs.clone(),
            series_id,
        };

        let series = self
            .db
            .series()
            .get_by_id(series_id)
            .await?
            .with_context(|| format!("Series {series_id} not found"))?;

        let max_processes = self.max_processes().await;
        let candidates = self.db.media_files().list_for_extraction(series_id).await?;
        let all_files = self.db.media_files().list_by_series(series_id).await?;
        let episodes: Arc<Vec<EpisodeRecord>> =
            Arc::new(self.db.episodes().list_by_series(series_id).await?);

        let mut table = HashMap::new();
        for file in &all_files {
            table.insert(file.id, stored_percent(file));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let ctx = Arc::new(JobContext {
            series_id,
            total_files: all_files.len(),
            progress: Mutex::new(table),
            processed: AtomicUsize::new(0),
            events,
            cancel,
        });

        info!(
            %series_id,
            title = %series.title,
            candidates = candidates.len(),
            max_processes,
            "Starting extraction run"
        );

        // Subscribe before spawning so the caller cannot miss early events.
        let receiver = ctx.events.subscribe();
        let db = self.db.clone();
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let _guard = guard;
            execute_run(db, pipeline, ctx.clone(), candidates, episodes, max_processes).await;
            ctx.emit(true);
            info!(%series_id, "Extraction run finished");
        });

        Ok(RunSeries::Started(receiver))
    }

    /// Request cancellation of an in-flight run. Returns false when the
    /// series has no active run.
    pub fn cancel_run(&self, series_id: Uuid) -> bool {
        match self.active_runs.lock().get(&series_id) {
            Some(token) => {
                token.cancel();
                info!(%series_id, "Extraction run cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, series_id: Uuid) -> bool {
        self.active_runs.lock().contains_key(&series_id)
    }

    /// Aggregate extraction state across every file of a series.
    pub async fn extraction_status(&self, series_id: Uuid) -> Result<ExtractionStatusReport> {
        let records = self.db.media_files().list_by_series(series_id).await?;

        let mut pending = 0usize;
        let mut in_progress = 0usize;
        let mut completed = 0usize;
        let mut errors = 0usize;
        let mut sum = 0.0f64;
        let mut files = Vec::with_capacity(records.len());

        for record in &records {
            match record.audio_extraction_status {
                ExtractionStatus::Pending => pending += 1,
                ExtractionStatus::InProgress => in_progress += 1,
                ExtractionStatus::Completed => completed += 1,
                ExtractionStatus::Error => errors += 1,
            }
            sum += stored_percent(record) as f64;
            files.push(FileExtractionState {
                file_id: record.id,
                filename: record.original_filename.clone(),
                status: record.audio_extraction_status,
                progress: record.audio_extraction_progress,
            });
        }

        let overall_progress = if records.is_empty() {
            0.0
        } else {
            sum / records.len() as f64
        };

        Ok(ExtractionStatusReport {
            series_id,
            is_processing: self.is_running(series_id),
            overall_progress,
            pending_files: pending,
            in_progress_files: in_progress,
            completed_files: completed,
            error_files: errors,
            files,
        })
    }

    /// Effective concurrency ceiling: the stored setting, else a
    /// hardware-derived default. Never below one.
    async fn max_processes(&self) -> usize {
        let fallback = default_extraction_processes();
        match self
            .db
            .settings()
            .get_or_default(MAX_EXTRACTION_PROCESSES, fallback)
            .await
        {
            Ok(value) => value.max(1),
            Err(err) => {
                warn!("Failed to read extraction concurrency setting: {:#}", err);
                fallback.max(1)
            }
        }
    }
}

/// Percentage a file contributes to the aggregate. The persisted row is
/// authoritative; completed rows count 100 regardless of stored progress.
fn stored_percent(file: &MediaFileRecord) -> f32 {
    match file.audio_extraction_status {
        ExtractionStatus::Completed => 100.0,
        _ => file.audio_extraction_progress as f32,
    }
}

/// Drives the batches of one run. Cancellation is only observed between
/// batches here; mid-file cancellation is the pipeline's job.
async fn execute_run(
    db: Database,
    pipeline: Arc<IdentificationPipeline>,
    ctx: Arc<JobContext>,
    candidates: Vec<MediaFileRecord>,
    episodes: Arc<Vec<EpisodeRecord>>,
    max_processes: usize,
) {
    for batch in candidates.chunks(max_processes) {
        if ctx.cancel.is_cancelled() {
            info!(series_id = %ctx.series_id, "Extraction run cancelled between batches");
            break;
        }

        let mut workers = JoinSet::new();
        for file in batch {
            workers.spawn(identify_one(
                db.clone(),
                pipeline.clone(),
                ctx.clone(),
                file.clone(),
                episodes.clone(),
            ));
        }

        // The batch drains completely before the next one starts.
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(series_id = %ctx.series_id, "Extraction worker panicked: {}", err);
            }
        }
    }
}

/// Runs one file through identification, mirroring its segment progress
/// into the run's table. A failed file is recorded and never stops the
/// batch.
async fn identify_one(
    db: Database,
    pipeline: Arc<IdentificationPipeline>,
    ctx: Arc<JobContext>,
    file: MediaFileRecord,
    episodes: Arc<Vec<EpisodeRecord>>,
) {
    let (segment_tx, mut segment_rx) = mpsc::channel::<f32>(16);

    let file_id = file.id;
    let watcher_ctx = ctx.clone();
    let watcher = tokio::spawn(async move {
        while let Some(fraction) = segment_rx.recv().await {
            watcher_ctx.set_file_progress(file_id, fraction * 100.0);
            watcher_ctx.emit(false);
        }
    });

    let result = pipeline
        .identify_file(&file, episodes.as_slice(), segment_tx, &ctx.cancel)
        .await;
    let _ = watcher.await;

    match result {
        Ok(IdentifyOutcome::Update(update)) => {
            debug!(
                file = %file.original_filename,
                status = %update.status,
                "File resolved"
            );
            ctx.mark_processed();
            sync_from_row(&db, &ctx, file_id).await;
        }
        Ok(IdentifyOutcome::Cancelled) => {
            ctx.set_file_progress(file_id, 0.0);
        }
        Err(err) => {
            error!(
                file = %file.original_filename,
                "Failed to persist identification state: {:#}",
                err
            );
            ctx.mark_processed();
            sync_from_row(&db, &ctx, file_id).await;
        }
    }
    ctx.emit(false);
}

/// Re-read the persisted percentage once a file resolves. The stored row
/// wins over the last channel value: a failed extraction keeps zero even
/// though its final reported fraction was 1.0.
async fn sync_from_row(db: &Database, ctx: &JobContext, file_id: Uuid) {
    match db.media_files().get_by_id(file_id).await {
        Ok(Some(row)) => ctx.set_file_progress(file_id, stored_percent(&row)),
        Ok(None) => ctx.set_file_progress(file_id, 100.0),
        Err(err) => {
            warn!(%file_id, "Failed to read back extraction progress: {:#}", err);
        }
    }
}
