//! Audio segment database operations
//!
//! Segments captured during content analysis are kept per (file, segment
//! number) so a re-run can inspect what was sampled and what it transcribed
//! to. Matching itself never re-reads them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{str_to_datetime, str_to_uuid, uuid_to_str};

/// A sampled audio segment belonging to a file
#[derive(Debug, Clone)]
pub struct AudioSegmentRecord {
    pub id: Uuid,
    pub file_id: Uuid,
    pub segment_number: i32,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub audio_data: Option<Vec<u8>>,
    pub transcript: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for AudioSegmentRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let file_str: String = row.try_get("file_id")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            file_id: str_to_uuid(&file_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            segment_number: row.try_get("segment_number")?,
            start_secs: row.try_get("start_secs")?,
            duration_secs: row.try_get("duration_secs")?,
            audio_data: row.try_get("audio_data")?,
            transcript: row.try_get("transcript")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Data for saving one segment
#[derive(Debug, Clone)]
pub struct SaveAudioSegment {
    pub file_id: Uuid,
    pub segment_number: i32,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub audio_data: Option<Vec<u8>>,
    pub transcript: Option<String>,
}

/// Audio segment repository for database operations
pub struct AudioSegmentRepository {
    pool: SqlitePool,
}

impl AudioSegmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a segment on its (file, segment_number) key
    pub async fn save(&self, segment: SaveAudioSegment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audio_segments
                (id, file_id, segment_number, start_secs, duration_secs,
                 audio_data, transcript, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT (file_id, segment_number) DO UPDATE SET
                start_secs = ?4,
                duration_secs = ?5,
                audio_data = ?6,
                transcript = COALESCE(?7, audio_segments.transcript)
            "#,
        )
        .bind(uuid_to_str(Uuid::new_v4()))
        .bind(uuid_to_str(segment.file_id))
        .bind(segment.segment_number)
        .bind(segment.start_secs)
        .bind(segment.duration_secs)
        .bind(&segment.audio_data)
        .bind(&segment.transcript)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Attach a transcript to an already-saved segment
    pub async fn set_transcript(
        &self,
        file_id: Uuid,
        segment_number: i32,
        transcript: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE audio_segments SET transcript = ?3 \
             WHERE file_id = ?1 AND segment_number = ?2",
        )
        .bind(uuid_to_str(file_id))
        .bind(segment_number)
        .bind(transcript)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List a file's segments in segment order
    pub async fn list_by_file(&self, file_id: Uuid) -> Result<Vec<AudioSegmentRecord>> {
        let records = sqlx::query_as::<_, AudioSegmentRecord>(
            "SELECT * FROM audio_segments WHERE file_id = ?1 ORDER BY segment_number",
        )
        .bind(uuid_to_str(file_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Delete all segments for a file, returning the number removed
    pub async fn delete_by_file(&self, file_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audio_segments WHERE file_id = ?1")
            .bind(uuid_to_str(file_id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
