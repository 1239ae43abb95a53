//! Series database operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{str_to_datetime, str_to_uuid, uuid_to_str};

/// A tracked TV series with a root media directory
#[derive(Debug, Clone)]
pub struct SeriesRecord {
    pub id: Uuid,
    /// Metadata provider identifier (TMDB TV id)
    pub provider_id: i64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub directory: String,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SeriesRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            provider_id: row.try_get("provider_id")?,
            imdb_id: row.try_get("imdb_id")?,
            title: row.try_get("title")?,
            directory: row.try_get("directory")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Data for creating a series
#[derive(Debug, Clone)]
pub struct CreateSeries {
    pub provider_id: i64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub directory: String,
}

/// Series repository for database operations
pub struct SeriesRepository {
    pool: SqlitePool,
}

impl SeriesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a series, updating title/directory if the provider id is already known
    pub async fn create(&self, series: CreateSeries) -> Result<SeriesRecord> {
        let id = uuid_to_str(Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO series (id, provider_id, imdb_id, title, directory, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
            ON CONFLICT (provider_id) DO UPDATE SET
                imdb_id = COALESCE(?3, series.imdb_id),
                title = ?4,
                directory = ?5
            "#,
        )
        .bind(&id)
        .bind(series.provider_id)
        .bind(&series.imdb_id)
        .bind(&series.title)
        .bind(&series.directory)
        .execute(&self.pool)
        .await?;

        self.get_by_provider_id(series.provider_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve series after insert"))
    }

    /// Get a series by its id
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<SeriesRecord>> {
        let record = sqlx::query_as::<_, SeriesRecord>("SELECT * FROM series WHERE id = ?1")
            .bind(uuid_to_str(id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Get a series by its metadata provider id
    pub async fn get_by_provider_id(&self, provider_id: i64) -> Result<Option<SeriesRecord>> {
        let record =
            sqlx::query_as::<_, SeriesRecord>("SELECT * FROM series WHERE provider_id = ?1")
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// List all series ordered by title
    pub async fn list_all(&self) -> Result<Vec<SeriesRecord>> {
        let records = sqlx::query_as::<_, SeriesRecord>("SELECT * FROM series ORDER BY title")
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    /// Remove a series and everything belonging to it in one transaction
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let id_str = uuid_to_str(id);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM audio_segments WHERE file_id IN \
             (SELECT id FROM media_files WHERE series_id = ?1)",
        )
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM media_files WHERE series_id = ?1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM episodes WHERE series_id = ?1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM series WHERE id = ?1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}
