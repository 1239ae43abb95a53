//! Episode database operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{str_to_datetime, str_to_uuid, uuid_to_str};

/// One canonical (season, episode) unit of a series.
///
/// Episodes are provider-supplied facts used as matching targets; the
/// identification pipeline never mutates them.
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub id: Uuid,
    pub series_id: Uuid,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub synopsis: Option<String>,
    pub external_id: Option<String>,
    pub air_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for EpisodeRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let series_str: String = row.try_get("series_id")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            series_id: str_to_uuid(&series_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            season_number: row.try_get("season_number")?,
            episode_number: row.try_get("episode_number")?,
            title: row.try_get("title")?,
            synopsis: row.try_get("synopsis")?,
            external_id: row.try_get("external_id")?,
            air_date: row.try_get("air_date")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Data for creating an episode
#[derive(Debug, Clone)]
pub struct CreateEpisode {
    pub series_id: Uuid,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub synopsis: Option<String>,
    pub external_id: Option<String>,
    pub air_date: Option<String>,
}

/// Episode repository for database operations
pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert an episode on its (series, season, episode) key
    pub async fn create(&self, episode: CreateEpisode) -> Result<EpisodeRecord> {
        let id = uuid_to_str(Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO episodes
                (id, series_id, season_number, episode_number, title, synopsis,
                 external_id, air_date, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
            ON CONFLICT (series_id, season_number, episode_number) DO UPDATE SET
                title = COALESCE(?5, episodes.title),
                synopsis = COALESCE(?6, episodes.synopsis),
                external_id = COALESCE(?7, episodes.external_id),
                air_date = COALESCE(?8, episodes.air_date)
            "#,
        )
        .bind(&id)
        .bind(uuid_to_str(episode.series_id))
        .bind(episode.season_number)
        .bind(episode.episode_number)
        .bind(&episode.title)
        .bind(&episode.synopsis)
        .bind(&episode.external_id)
        .bind(&episode.air_date)
        .execute(&self.pool)
        .await?;

        self.get_by_number(
            episode.series_id,
            episode.season_number,
            episode.episode_number,
        )
        .await?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve episode after insert"))
    }

    /// Get an episode by its id
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<EpisodeRecord>> {
        let record = sqlx::query_as::<_, EpisodeRecord>("SELECT * FROM episodes WHERE id = ?1")
            .bind(uuid_to_str(id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Get an episode by its (series, season, episode) key
    pub async fn get_by_number(
        &self,
        series_id: Uuid,
        season: i32,
        episode: i32,
    ) -> Result<Option<EpisodeRecord>> {
        let record = sqlx::query_as::<_, EpisodeRecord>(
            "SELECT * FROM episodes \
             WHERE series_id = ?1 AND season_number = ?2 AND episode_number = ?3",
        )
        .bind(uuid_to_str(series_id))
        .bind(season)
        .bind(episode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all episodes for a series in (season, episode) order
    pub async fn list_by_series(&self, series_id: Uuid) -> Result<Vec<EpisodeRecord>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(
            "SELECT * FROM episodes WHERE series_id = ?1 \
             ORDER BY season_number, episode_number",
        )
        .bind(uuid_to_str(series_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
