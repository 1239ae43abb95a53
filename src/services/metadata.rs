//! Series metadata service with provider caching
//!
//! Normalizes provider responses into series and episode shapes, and caches
//! them in the database so repeat runs avoid refetching. Cached entries are
//! only served while younger than the configured max age.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tmdb::TmdbClient;
use crate::db::{CacheKey, Database};

/// Normalized series details from a metadata provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub provider_id: i64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub year: Option<String>,
    pub total_seasons: i32,
    pub plot: Option<String>,
    pub poster_url: Option<String>,
}

/// Normalized episode details from a metadata provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub season_number: i32,
    pub episode_number: i32,
    pub rating: Option<f64>,
    pub plot: Option<String>,
}

/// Normalized series search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSearchResult {
    pub provider_id: i64,
    pub title: String,
    pub year: Option<String>,
    pub poster_url: Option<String>,
}

/// Interface to an external series metadata provider
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch series details by provider ID
    async fn get_series_info(&self, provider_id: i64) -> Result<SeriesInfo>;

    /// Fetch one season's episode list
    async fn get_season_info(&self, provider_id: i64, season_number: i32)
    -> Result<Vec<EpisodeInfo>>;

    /// Fetch every episode of the series, season by season
    async fn get_all_episodes(&self, provider_id: i64) -> Result<Vec<EpisodeInfo>> {
        let info = self.get_series_info(provider_id).await?;
        let mut episodes = Vec::new();
        for season in 1..=info.total_seasons {
            episodes.extend(self.get_season_info(provider_id, season).await?);
        }
        Ok(episodes)
    }

    /// Search for series by title
    async fn search_by_title(&self, title: &str) -> Result<Vec<SeriesSearchResult>>;
}

/// First four characters of an air date, i.e. the year
fn year_from_air_date(date: Option<&str>) -> Option<String> {
    date.and_then(|d| d.get(..4)).map(str::to_string)
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn get_series_info(&self, provider_id: i64) -> Result<SeriesInfo> {
        let show = self.get_tv_show(provider_id).await?;
        Ok(SeriesInfo {
            provider_id: show.id,
            imdb_id: Some(format!("tt{}", show.id)),
            title: show.name,
            year: year_from_air_date(show.first_air_date.as_deref()),
            total_seasons: show.number_of_seasons,
            plot: show.overview,
            poster_url: self.poster_url(show.poster_path.as_deref()),
        })
    }

    async fn get_season_info(
        &self,
        provider_id: i64,
        season_number: i32,
    ) -> Result<Vec<EpisodeInfo>> {
        let season = self.get_tv_season(provider_id, season_number).await?;
        Ok(season
            .episodes
            .into_iter()
            .map(|ep| EpisodeInfo {
                external_id: Some(format!(
                    "tt{}e{}{:02}",
                    provider_id, season_number, ep.episode_number
                )),
                title: ep.name,
                air_date: ep.air_date,
                season_number,
                episode_number: ep.episode_number,
                rating: ep.vote_average,
                plot: ep.overview,
            })
            .collect())
    }

    async fn search_by_title(&self, title: &str) -> Result<Vec<SeriesSearchResult>> {
        let hits = self.search_tv(title).await?;
        Ok(hits
            .into_iter()
            .map(|hit| SeriesSearchResult {
                provider_id: hit.id,
                title: hit.name,
                year: year_from_air_date(hit.first_air_date.as_deref()),
                poster_url: self.poster_url(hit.poster_path.as_deref()),
            })
            .collect())
    }
}

/// Metadata service wrapping a provider with a database-backed cache
pub struct MetadataService {
    provider: Arc<dyn MetadataProvider>,
    db: Database,
    cache_max_age: Duration,
}

impl MetadataService {
    pub fn new(provider: Arc<dyn MetadataProvider>, db: Database, cache_max_age: Duration) -> Self {
        Self {
            provider,
            db,
            cache_max_age,
        }
    }

    /// Series details, served from cache when fresh
    pub async fn series_info(&self, provider_id: i64) -> Result<SeriesInfo> {
        let cache = self.db.provider_cache();
        let key = CacheKey::Series { provider_id };

        if let Some(entry) = cache.get(&key, self.cache_max_age).await? {
            if let Ok(info) = serde_json::from_value::<SeriesInfo>(entry.payload) {
                debug!(provider_id, "Series metadata served from cache");
                return Ok(info);
            }
        }

        let info = self.provider.get_series_info(provider_id).await?;
        cache.put(&key, &serde_json::to_value(&info)?).await?;
        Ok(info)
    }

    /// One season's episodes, served from cache when fresh
    ///
    /// A provider fetch also writes each episode into the episode partition
    /// so later single-episode lookups hit.
    pub async fn season_info(
        &self,
        provider_id: i64,
        season_number: i32,
    ) -> Result<Vec<EpisodeInfo>> {
        let cache = self.db.provider_cache();
        let key = CacheKey::Season {
            provider_id,
            season: season_number,
        };

        if let Some(entry) = cache.get(&key, self.cache_max_age).await? {
            if let Ok(episodes) = serde_json::from_value::<Vec<EpisodeInfo>>(entry.payload) {
                debug!(provider_id, season_number, "Season metadata served from cache");
                return Ok(episodes);
            }
        }

        let episodes = self.provider.get_season_info(provider_id, season_number).await?;
        cache.put(&key, &serde_json::to_value(&episodes)?).await?;
        for ep in &episodes {
            let ep_key = CacheKey::Episode {
                provider_id,
                season: season_number,
                episode: ep.episode_number,
            };
            cache.put(&ep_key, &serde_json::to_value(ep)?).await?;
        }
        Ok(episodes)
    }

    /// One episode's details, falling back to a season fetch on a cache miss
    pub async fn episode_info(
        &self,
        provider_id: i64,
        season_number: i32,
        episode_number: i32,
    ) -> Result<Option<EpisodeInfo>> {
        let cache = self.db.provider_cache();
        let key = CacheKey::Episode {
            provider_id,
            season: season_number,
            episode: episode_number,
        };

        if let Some(entry) = cache.get(&key, self.cache_max_age).await? {
            if let Ok(info) = serde_json::from_value::<EpisodeInfo>(entry.payload) {
                return Ok(Some(info));
            }
        }

        let episodes = self.season_info(provider_id, season_number).await?;
        Ok(episodes
            .into_iter()
            .find(|e| e.episode_number == episode_number))
    }

    /// Every episode of the series, assembled from per-season lookups
    pub async fn all_episodes(&self, provider_id: i64) -> Result<Vec<EpisodeInfo>> {
        let info = self.series_info(provider_id).await?;
        let mut episodes = Vec::new();
        for season in 1..=info.total_seasons {
            episodes.extend(self.season_info(provider_id, season).await?);
        }
        Ok(episodes)
    }

    /// Search for series by title (not cached)
    pub async fn search(&self, title: &str) -> Result<Vec<SeriesSearchResult>> {
        self.provider.search_by_title(title).await
    }

    /// Remove cache entries older than the configured max age
    pub async fn evict_expired_cache(&self) -> Result<u64> {
        self.db.provider_cache().evict_expired(self.cache_max_age).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        series_calls: AtomicU32,
        season_calls: AtomicU32,
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        async fn get_series_info(&self, provider_id: i64) -> Result<SeriesInfo> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SeriesInfo {
                provider_id,
                imdb_id: None,
                title: "Fake Show".to_string(),
                year: Some("2020".to_string()),
                total_seasons: 2,
                plot: None,
                poster_url: None,
            })
        }

        async fn get_season_info(
            &self,
            _provider_id: i64,
            season_number: i32,
        ) -> Result<Vec<EpisodeInfo>> {
            self.season_calls.fetch_add(1, Ordering::SeqCst);
            Ok((1..=2)
                .map(|n| EpisodeInfo {
                    external_id: None,
                    title: Some(format!("Episode {}-{}", season_number, n)),
                    air_date: None,
                    season_number,
                    episode_number: n,
                    rating: None,
                    plot: None,
                })
                .collect())
        }

        async fn search_by_title(&self, _title: &str) -> Result<Vec<SeriesSearchResult>> {
            Ok(vec![])
        }
    }

    async fn test_service(provider: Arc<FakeProvider>) -> MetadataService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database::new(pool);
        db.init_schema().await.unwrap();
        MetadataService::new(provider, db, Duration::from_secs(3600))
    }

    #[test]
    fn test_year_from_air_date() {
        assert_eq!(year_from_air_date(Some("2011-04-17")), Some("2011".to_string()));
        assert_eq!(year_from_air_date(Some("")), None);
        assert_eq!(year_from_air_date(None), None);
    }

    #[tokio::test]
    async fn test_series_info_served_from_cache_on_second_call() {
        let provider = Arc::new(FakeProvider::default());
        let service = test_service(provider.clone()).await;

        let first = service.series_info(99).await.unwrap();
        let second = service.series_info(99).await.unwrap();

        assert_eq!(first.title, second.title);
        assert_eq!(provider.series_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_episodes_spans_every_season() {
        let provider = Arc::new(FakeProvider::default());
        let service = test_service(provider.clone()).await;

        let episodes = service.all_episodes(5).await.unwrap();
        assert_eq!(episodes.len(), 4);
        assert_eq!(provider.season_calls.load(Ordering::SeqCst), 2);

        // A second pass is fully cache served
        let again = service.all_episodes(5).await.unwrap();
        assert_eq!(again.len(), 4);
        assert_eq!(provider.season_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_episode_info_falls_back_to_season_fetch() {
        let provider = Arc::new(FakeProvider::default());
        let service = test_service(provider.clone()).await;

        let info = service.episode_info(5, 2, 1).await.unwrap().unwrap();
        assert_eq!(info.title.as_deref(), Some("Episode 2-1"));
        assert_eq!(provider.season_calls.load(Ordering::SeqCst), 1);

        // Now served from the episode partition without another fetch
        let cached = service.episode_info(5, 2, 1).await.unwrap().unwrap();
        assert_eq!(cached.title.as_deref(), Some("Episode 2-1"));
        assert_eq!(provider.season_calls.load(Ordering::SeqCst), 1);

        let missing = service.episode_info(5, 2, 42).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_default_get_all_episodes_composes_seasons() {
        let provider = FakeProvider::default();
        let episodes = provider.get_all_episodes(7).await.unwrap();
        assert_eq!(episodes.len(), 4);
        assert_eq!(episodes[0].season_number, 1);
        assert_eq!(episodes[3].season_number, 2);
    }
}
