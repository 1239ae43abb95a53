//! Database connection, schema, and repositories

pub mod audio_segments;
pub mod episodes;
pub mod media_files;
pub mod provider_cache;
pub mod series;
pub mod settings;
pub mod sqlite_helpers;

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use audio_segments::{AudioSegmentRecord, AudioSegmentRepository, SaveAudioSegment};
pub use episodes::{CreateEpisode, EpisodeRecord, EpisodeRepository};
pub use media_files::{
    CreateMediaFile, ExtractionStatus, FileOutcome, FileStatus, MediaFileRecord,
    MediaFileRepository, ProcessingStep, ProcessingSummary,
};
pub use provider_cache::{CacheKey, CacheKind, CachedEntry, ProviderCacheRepository};
pub use series::{CreateSeries, SeriesRecord, SeriesRepository};
pub use settings::{MAX_EXTRACTION_PROCESSES, SettingRecord, SettingsRepository};

/// Default concurrency for audio extraction: half the logical cores, floor 1.
pub fn default_extraction_processes() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(1)
}

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if missing) the SQLite database at `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables if they do not exist and seed defaults
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                provider_id INTEGER NOT NULL UNIQUE,
                imdb_id TEXT,
                title TEXT NOT NULL,
                directory TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                series_id TEXT NOT NULL REFERENCES series(id) ON DELETE CASCADE,
                season_number INTEGER NOT NULL,
                episode_number INTEGER NOT NULL,
                title TEXT,
                synopsis TEXT,
                external_id TEXT,
                air_date TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (series_id, season_number, episode_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS media_files (
                id TEXT PRIMARY KEY,
                series_id TEXT NOT NULL REFERENCES series(id) ON DELETE CASCADE,
                episode_id TEXT REFERENCES episodes(id),
                original_path TEXT NOT NULL UNIQUE,
                original_filename TEXT NOT NULL,
                corrected_filename TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                confidence REAL,
                is_verified INTEGER NOT NULL DEFAULT 0,
                audio_extraction_status TEXT NOT NULL DEFAULT 'pending',
                audio_extraction_progress INTEGER NOT NULL DEFAULT 0,
                processing_step TEXT NOT NULL DEFAULT 'pending',
                processed_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audio_segments (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES media_files(id) ON DELETE CASCADE,
                segment_number INTEGER NOT NULL,
                start_secs REAL NOT NULL,
                duration_secs REAL NOT NULL,
                audio_data BLOB,
                transcript TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (file_id, segment_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS series_cache (
                provider_id INTEGER PRIMARY KEY,
                payload TEXT NOT NULL,
                last_updated TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS season_cache (
                provider_id INTEGER NOT NULL,
                season_number INTEGER NOT NULL,
                payload TEXT NOT NULL,
                last_updated TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (provider_id, season_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS episode_cache (
                provider_id INTEGER NOT NULL,
                season_number INTEGER NOT NULL,
                episode_number INTEGER NOT NULL,
                payload TEXT NOT NULL,
                last_updated TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (provider_id, season_number, episode_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_media_files_series
                ON media_files (series_id, audio_extraction_status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_episodes_series
                ON episodes (series_id, season_number, episode_number)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }

        self.seed_defaults().await
    }

    /// Seed default settings without overwriting user edits
    async fn seed_defaults(&self) -> Result<()> {
        let default = default_extraction_processes();
        sqlx::query(
            r#"
            INSERT INTO settings (id, key, value, description)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(sqlite_helpers::uuid_to_str(uuid::Uuid::new_v4()))
        .bind(settings::MAX_EXTRACTION_PROCESSES)
        .bind(sqlite_helpers::to_json(&default))
        .bind("Maximum files extracted concurrently per series run")
        .execute(&self.pool)
        .await
        .context("Failed to seed default settings")?;

        Ok(())
    }

    pub fn series(&self) -> SeriesRepository {
        SeriesRepository::new(self.pool.clone())
    }

    pub fn episodes(&self) -> EpisodeRepository {
        EpisodeRepository::new(self.pool.clone())
    }

    pub fn media_files(&self) -> MediaFileRepository {
        MediaFileRepository::new(self.pool.clone())
    }

    pub fn audio_segments(&self) -> AudioSegmentRepository {
        AudioSegmentRepository::new(self.pool.clone())
    }

    pub fn provider_cache(&self) -> ProviderCacheRepository {
        ProviderCacheRepository::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }
}
