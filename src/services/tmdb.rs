//! TMDB (The Movie Database) API client for TV series metadata
//!
//! TMDB is a popular movie/TV database with a free API.
//! Base URL: https://api.themoviedb.org/3
//!
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.
//! This client uses rate limiting and retry logic to handle this gracefully.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

/// TV series details from TMDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbTvShow {
    pub id: i64,
    pub name: String,
    pub first_air_date: Option<String>,
    pub number_of_seasons: i32,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub vote_average: Option<f64>,
}

/// One season of a TV series, with its episode list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSeason {
    pub season_number: i32,
    pub episodes: Vec<TmdbEpisode>,
}

/// Episode entry from a TMDB season response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbEpisode {
    pub id: i64,
    pub name: Option<String>,
    pub air_date: Option<String>,
    pub episode_number: i32,
    pub season_number: i32,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
}

/// TV search result page from TMDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbTvSearchResults {
    pub page: i32,
    pub results: Vec<TmdbTvSearchHit>,
    pub total_pages: i32,
    pub total_results: i32,
}

/// One hit from a TV search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbTvSearchHit {
    pub id: i64,
    pub name: String,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
}

impl TmdbClient {
    /// Create a new TMDB client with the given API key
    pub fn new(api_key: String) -> Self {
        Self {
            client: Arc::new(RateLimitedClient::for_tmdb()),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        }
    }

    /// Check if the client has a valid API key configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Get the image base URL for poster images
    pub fn image_url(&self, path: &str, size: &str) -> String {
        format!("https://image.tmdb.org/t/p/{}{}", size, path)
    }

    /// Get full poster URL (w500 size - good for display)
    pub fn poster_url(&self, path: Option<&str>) -> Option<String> {
        path.map(|p| self.image_url(p, "w500"))
    }

    /// Get TV series details by TMDB ID
    pub async fn get_tv_show(&self, tmdb_id: i64) -> Result<TmdbTvShow> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        debug!("Fetching TV series details from TMDB (ID: {})", tmdb_id);

        let url = format!("{}/tv/{}", self.base_url, tmdb_id);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let retry_config = self.retry_config.clone();

        retry_async(
            || {
                let url = url.clone();
                let client = client.clone();
                let key = api_key.clone();
                async move {
                    let response = client.get_with_query(&url, &[("api_key", &key)]).await?;

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }

                    if response.status().as_u16() == 401 {
                        anyhow::bail!("TMDB API key is invalid");
                    }

                    if response.status().as_u16() == 404 {
                        anyhow::bail!("Series not found on TMDB");
                    }

                    if !response.status().is_success() {
                        anyhow::bail!("TMDB get series failed with status: {}", response.status());
                    }

                    let show: TmdbTvShow = response
                        .json()
                        .await
                        .context("Failed to parse TMDB series")?;

                    Ok(show)
                }
            },
            &retry_config,
            "tmdb_get_tv_show",
        )
        .await
    }

    /// Get one season of a TV series, including its episode list
    pub async fn get_tv_season(&self, tmdb_id: i64, season_number: i32) -> Result<TmdbSeason> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        debug!(
            "Fetching season {} of TMDB series {}",
            season_number, tmdb_id
        );

        let url = format!("{}/tv/{}/season/{}", self.base_url, tmdb_id, season_number);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let retry_config = self.retry_config.clone();

        retry_async(
            || {
                let url = url.clone();
                let client = client.clone();
                let key = api_key.clone();
                async move {
                    let response = client.get_with_query(&url, &[("api_key", &key)]).await?;

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }

                    if response.status().as_u16() == 404 {
                        anyhow::bail!("Season {} not found on TMDB", season_number);
                    }

                    if !response.status().is_success() {
                        anyhow::bail!("TMDB get season failed with status: {}", response.status());
                    }

                    let season: TmdbSeason = response
                        .json()
                        .await
                        .context("Failed to parse TMDB season")?;

                    Ok(season)
                }
            },
            &retry_config,
            "tmdb_get_tv_season",
        )
        .await
    }

    /// Search for TV series by title
    pub async fn search_tv(&self, query: &str) -> Result<Vec<TmdbTvSearchHit>> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        info!("Searching TMDB for series '{}'", query);

        let url = format!("{}/search/tv", self.base_url);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let query_owned = query.to_string();
        let retry_config = self.retry_config.clone();

        let result = retry_async(
            || {
                let url = url.clone();
                let client = client.clone();
                let q = query_owned.clone();
                let key = api_key.clone();
                async move {
                    let query_params: Vec<(&str, String)> = vec![
                        ("api_key", key),
                        ("query", q),
                        ("include_adult", "false".to_string()),
                    ];

                    let response = client.get_with_query(&url, &query_params).await?;

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                        anyhow::bail!("Rate limited (429)");
                    }

                    if response.status().as_u16() == 401 {
                        anyhow::bail!("TMDB API key is invalid");
                    }

                    if !response.status().is_success() {
                        anyhow::bail!("TMDB search failed with status: {}", response.status());
                    }

                    let results: TmdbTvSearchResults = response
                        .json()
                        .await
                        .context("Failed to parse TMDB search results")?;

                    Ok(results.results)
                }
            },
            &retry_config,
            "tmdb_search_tv",
        )
        .await?;

        debug!(count = result.len(), "TMDB search returned results");
        Ok(result)
    }
}
