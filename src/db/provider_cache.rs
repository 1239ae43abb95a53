//! Metadata provider response cache
//!
//! Three partitions by granularity (whole series, one season, one episode),
//! each with its own natural key. Entries carry a last-updated timestamp and
//! a hit is only valid while younger than the caller's max age; stale rows
//! are reported as misses and swept by [`ProviderCacheRepository::evict_expired`].

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{from_json, str_to_datetime, to_json};

/// Cache partition granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Series,
    Season,
    Episode,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Series => "series",
            Self::Season => "season",
            Self::Episode => "episode",
        };
        f.write_str(s)
    }
}

/// Natural key addressing one cached provider response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    Series { provider_id: i64 },
    Season { provider_id: i64, season: i32 },
    Episode { provider_id: i64, season: i32, episode: i32 },
}

impl CacheKey {
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::Series { .. } => CacheKind::Series,
            Self::Season { .. } => CacheKind::Season,
            Self::Episode { .. } => CacheKind::Episode,
        }
    }
}

/// A cached payload with its freshness timestamp
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub payload: JsonValue,
    pub last_updated: DateTime<Utc>,
}

/// Provider cache repository for database operations
pub struct ProviderCacheRepository {
    pool: SqlitePool,
}

impl ProviderCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch an entry, treating anything older than `max_age` as a miss
    pub async fn get(&self, key: &CacheKey, max_age: Duration) -> Result<Option<CachedEntry>> {
        use sqlx::Row;

        let row = match *key {
            CacheKey::Series { provider_id } => {
                sqlx::query(
                    "SELECT payload, last_updated FROM series_cache WHERE provider_id = ?1",
                )
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?
            }
            CacheKey::Season {
                provider_id,
                season,
            } => {
                sqlx::query(
                    "SELECT payload, last_updated FROM season_cache \
                     WHERE provider_id = ?1 AND season_number = ?2",
                )
                .bind(provider_id)
                .bind(season)
                .fetch_optional(&self.pool)
                .await?
            }
            CacheKey::Episode {
                provider_id,
                season,
                episode,
            } => {
                sqlx::query(
                    "SELECT payload, last_updated FROM episode_cache \
                     WHERE provider_id = ?1 AND season_number = ?2 AND episode_number = ?3",
                )
                .bind(provider_id)
                .bind(season)
                .bind(episode)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_str: String = row.try_get("payload")?;
        let updated_str: String = row.try_get("last_updated")?;
        let last_updated = str_to_datetime(&updated_str)?;

        let age = Utc::now().signed_duration_since(last_updated);
        if age >= chrono::Duration::from_std(max_age)? {
            return Ok(None);
        }

        Ok(Some(CachedEntry {
            payload: from_json(&payload_str)?,
            last_updated,
        }))
    }

    /// Store (or refresh) an entry, stamping it with the current time
    pub async fn put(&self, key: &CacheKey, payload: &JsonValue) -> Result<()> {
        let payload_str = to_json(payload);

        match *key {
            CacheKey::Series { provider_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO series_cache (provider_id, payload, last_updated)
                    VALUES (?1, ?2, datetime('now'))
                    ON CONFLICT (provider_id) DO UPDATE SET
                        payload = ?2,
                        last_updated = datetime('now')
                    "#,
                )
                .bind(provider_id)
                .bind(&payload_str)
                .execute(&self.pool)
                .await?;
            }
            CacheKey::Season {
                provider_id,
                season,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO season_cache (provider_id, season_number, payload, last_updated)
                    VALUES (?1, ?2, ?3, datetime('now'))
                    ON CONFLICT (provider_id, season_number) DO UPDATE SET
                        payload = ?3,
                        last_updated = datetime('now')
                    "#,
                )
                .bind(provider_id)
                .bind(season)
                .bind(&payload_str)
                .execute(&self.pool)
                .await?;
            }
            CacheKey::Episode {
                provider_id,
                season,
                episode,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO episode_cache
                        (provider_id, season_number, episode_number, payload, last_updated)
                    VALUES (?1, ?2, ?3, ?4, datetime('now'))
                    ON CONFLICT (provider_id, season_number, episode_number) DO UPDATE SET
                        payload = ?4,
                        last_updated = datetime('now')
                    "#,
                )
                .bind(provider_id)
                .bind(season)
                .bind(episode)
                .bind(&payload_str)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Delete entries older than `max_age` from all three partitions,
    /// returning how many rows were removed.
    pub async fn evict_expired(&self, max_age: Duration) -> Result<u64> {
        let secs = max_age.as_secs() as i64;
        let mut removed = 0;

        for table in ["series_cache", "season_cache", "episode_cache"] {
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE datetime(last_updated) < datetime('now', '-' || ?1 || ' seconds')",
                table
            ))
            .bind(secs)
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_db() -> Database {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database::new(pool);
        db.init_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_put_then_get_fresh() {
        let db = test_db().await;
        let cache = db.provider_cache();
        let key = CacheKey::Series { provider_id: 42 };
        let payload = serde_json::json!({"title": "Show"});

        cache.put(&key, &payload).await.unwrap();
        let entry = cache
            .get(&key, Duration::from_secs(3600))
            .await
            .unwrap()
            .expect("fresh entry should hit");
        assert_eq!(entry.payload, payload);
    }

    #[tokio::test]
    async fn test_stale_entry_is_a_miss() {
        let db = test_db().await;
        let cache = db.provider_cache();
        let key = CacheKey::Series { provider_id: 7 };
        cache.put(&key, &serde_json::json!({"x": 1})).await.unwrap();

        // Age the row past any plausible max age
        sqlx::query("UPDATE series_cache SET last_updated = '2001-01-01 00:00:00'")
            .execute(db.pool())
            .await
            .unwrap();

        let entry = cache.get(&key, Duration::from_secs(60)).await.unwrap();
        assert!(entry.is_none(), "stale entry must read as a miss");
    }

    #[tokio::test]
    async fn test_evict_expired_removes_only_old_rows() {
        let db = test_db().await;
        let cache = db.provider_cache();
        let old = CacheKey::Season {
            provider_id: 1,
            season: 1,
        };
        let fresh = CacheKey::Season {
            provider_id: 1,
            season: 2,
        };
        cache.put(&old, &serde_json::json!([])).await.unwrap();
        cache.put(&fresh, &serde_json::json!([])).await.unwrap();

        sqlx::query(
            "UPDATE season_cache SET last_updated = '2001-01-01 00:00:00' WHERE season_number = 1",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let removed = cache
            .evict_expired(Duration::from_secs(86400))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(
            cache
                .get(&fresh, Duration::from_secs(86400))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_key_kind() {
        assert_eq!(CacheKey::Series { provider_id: 1 }.kind(), CacheKind::Series);
        assert_eq!(
            CacheKey::Episode {
                provider_id: 1,
                season: 2,
                episode: 3
            }
            .kind(),
            CacheKind::Episode
        );
    }
}
