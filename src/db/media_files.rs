//! Media file database operations
//!
//! A media file row is the single source of truth for identification state.
//! Every mutation here is one atomic UPDATE over a fixed field set so that
//! concurrent pipeline stages never read-modify-write across each other.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    bool_to_int, int_to_bool, str_to_datetime, str_to_datetime_opt, str_to_uuid, str_to_uuid_opt,
    uuid_to_str,
};

/// Identification outcome of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Not yet identified
    Pending,
    /// Identified and the filename already encodes the right episode
    Correct,
    /// Identified but the filename disagrees; a corrected name is stored
    Incorrect,
    /// Analysis ran but evidence was insufficient to link an episode
    Unknown,
    /// A pipeline stage failed terminally for this file
    Error,
    /// User applied the corrected name on disk
    Fixed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::Unknown => "unknown",
            Self::Error => "error",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "correct" => Ok(Self::Correct),
            "incorrect" => Ok(Self::Incorrect),
            "unknown" => Ok(Self::Unknown),
            "error" => Ok(Self::Error),
            "fixed" => Ok(Self::Fixed),
            other => Err(anyhow::anyhow!("Unknown file status '{}'", other)),
        }
    }
}

/// Audio extraction sub-state, orthogonal to the identification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("Unknown extraction status '{}'", other)),
        }
    }
}

/// Fine-grained pipeline position, kept for observability only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Pending,
    Extracting,
    Transcribing,
    Matching,
    Completed,
    Error,
}

impl ProcessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Transcribing => "transcribing",
            Self::Matching => "matching",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "extracting" => Ok(Self::Extracting),
            "transcribing" => Ok(Self::Transcribing),
            "matching" => Ok(Self::Matching),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("Unknown processing step '{}'", other)),
        }
    }
}

/// One on-disk video artifact belonging to a series
#[derive(Debug, Clone)]
pub struct MediaFileRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    pub episode_id: Option<Uuid>,
    pub original_path: String,
    pub original_filename: String,
    pub corrected_filename: Option<String>,
    pub status: FileStatus,
    pub confidence: Option<f64>,
    pub is_verified: bool,
    pub audio_extraction_status: ExtractionStatus,
    pub audio_extraction_progress: i32,
    pub processing_step: ProcessingStep,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MediaFileRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let series_str: String = row.try_get("series_id")?;
        let episode_str: Option<String> = row.try_get("episode_id")?;
        let status_str: String = row.try_get("status")?;
        let extraction_str: String = row.try_get("audio_extraction_status")?;
        let step_str: String = row.try_get("processing_step")?;
        let processed_str: Option<String> = row.try_get("processed_at")?;
        let created_str: String = row.try_get("created_at")?;
        let verified: i32 = row.try_get("is_verified")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            series_id: str_to_uuid(&series_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            episode_id: str_to_uuid_opt(episode_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            original_path: row.try_get("original_path")?,
            original_filename: row.try_get("original_filename")?,
            corrected_filename: row.try_get("corrected_filename")?,
            status: status_str
                .parse()
                .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?,
            confidence: row.try_get("confidence")?,
            is_verified: int_to_bool(verified),
            audio_extraction_status: extraction_str
                .parse()
                .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?,
            audio_extraction_progress: row.try_get("audio_extraction_progress")?,
            processing_step: step_str
                .parse()
                .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?,
            processed_at: str_to_datetime_opt(processed_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Data for registering a discovered file
#[derive(Debug, Clone)]
pub struct CreateMediaFile {
    pub series_id: Uuid,
    pub original_path: String,
    pub original_filename: String,
}

/// Terminal (or filename-pass) identification outcome written in one UPDATE
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub episode_id: Option<Uuid>,
    pub status: FileStatus,
    pub corrected_filename: Option<String>,
    pub confidence: f64,
    pub is_verified: bool,
}

/// Per-series status counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingSummary {
    pub total: i64,
    pub pending: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub unknown: i64,
    pub error: i64,
    pub fixed: i64,
}

/// Media file repository for database operations
pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a file by path or register it, returning whether it was created
    pub async fn find_or_create(&self, file: CreateMediaFile) -> Result<(MediaFileRecord, bool)> {
        if let Some(existing) = self.get_by_path(&file.original_path).await? {
            return Ok((existing, false));
        }

        let id = uuid_to_str(Uuid::new_v4());
        sqlx::query(
            r#"
            INSERT INTO media_files
                (id, series_id, original_path, original_filename, created_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT (original_path) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(uuid_to_str(file.series_id))
        .bind(&file.original_path)
        .bind(&file.original_filename)
        .execute(&self.pool)
        .await?;

        let record = self
            .get_by_path(&file.original_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve media file after insert"))?;

        Ok((record, true))
    }

    /// Get a file by its id
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<MediaFileRecord>> {
        let record =
            sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE id = ?1")
                .bind(uuid_to_str(id))
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// Get a file by its on-disk path
    pub async fn get_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE original_path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all files for a series ordered by filename
    pub async fn list_by_series(&self, series_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE series_id = ?1 ORDER BY original_filename",
        )
        .bind(uuid_to_str(series_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Files still owed content analysis: extraction pending, or in_progress
    /// left behind by an interrupted run.
    pub async fn list_for_extraction(&self, series_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files \
             WHERE series_id = ?1 AND audio_extraction_status IN ('pending', 'in_progress') \
             ORDER BY created_at, id",
        )
        .bind(uuid_to_str(series_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Write an identification outcome: episode link, status, corrected name,
    /// confidence, verified flag, and the processed timestamp, in one UPDATE.
    pub async fn update_outcome(&self, id: Uuid, outcome: &FileOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_files SET
                episode_id = ?2,
                status = ?3,
                corrected_filename = ?4,
                confidence = ?5,
                is_verified = ?6,
                processed_at = datetime('now')
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(outcome.episode_id.map(uuid_to_str))
        .bind(outcome.status.as_str())
        .bind(&outcome.corrected_filename)
        .bind(outcome.confidence)
        .bind(bool_to_int(outcome.is_verified))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update the extraction sub-state and its 0-100 progress
    pub async fn update_extraction(
        &self,
        id: Uuid,
        status: ExtractionStatus,
        progress: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE media_files SET audio_extraction_status = ?2, \
             audio_extraction_progress = ?3 WHERE id = ?1",
        )
        .bind(uuid_to_str(id))
        .bind(status.as_str())
        .bind(progress.clamp(0, 100))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update the observability step
    pub async fn update_processing_step(&self, id: Uuid, step: ProcessingStep) -> Result<()> {
        sqlx::query("UPDATE media_files SET processing_step = ?2 WHERE id = ?1")
            .bind(uuid_to_str(id))
            .bind(step.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reset a file for re-processing: outcome cleared, sub-states back to pending
    pub async fn reset_for_reprocessing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_files SET
                episode_id = NULL,
                status = 'pending',
                corrected_filename = NULL,
                confidence = NULL,
                is_verified = 0,
                audio_extraction_status = 'pending',
                audio_extraction_progress = 0,
                processing_step = 'pending',
                processed_at = NULL
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Per-status counts for one series
    pub async fn summary(&self, series_id: Uuid) -> Result<ProcessingSummary> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'correct' THEN 1 ELSE 0 END) AS correct,
                SUM(CASE WHEN status = 'incorrect' THEN 1 ELSE 0 END) AS incorrect,
                SUM(CASE WHEN status = 'unknown' THEN 1 ELSE 0 END) AS unknown,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error,
                SUM(CASE WHEN status = 'fixed' THEN 1 ELSE 0 END) AS fixed
            FROM media_files
            WHERE series_id = ?1
            "#,
        )
        .bind(uuid_to_str(series_id))
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingSummary {
            total: row.try_get("total")?,
            pending: row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0),
            correct: row.try_get::<Option<i64>, _>("correct")?.unwrap_or(0),
            incorrect: row.try_get::<Option<i64>, _>("incorrect")?.unwrap_or(0),
            unknown: row.try_get::<Option<i64>, _>("unknown")?.unwrap_or(0),
            error: row.try_get::<Option<i64>, _>("error")?.unwrap_or(0),
            fixed: row.try_get::<Option<i64>, _>("fixed")?.unwrap_or(0),
        })
    }
}
