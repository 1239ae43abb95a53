//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub database_path: PathBuf,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// ffmpeg executable (name on PATH or absolute path)
    pub ffmpeg_path: String,

    /// ffprobe executable (name on PATH or absolute path)
    pub ffprobe_path: String,

    /// Directory for temporary audio segment files
    pub audio_temp_dir: PathBuf,

    /// Maximum age of cached provider responses, in days
    pub cache_max_age_days: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_path = env::var("DATABASE_PATH").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("./data"))
                .join("medialign")
                .join("medialign.db")
        });

        let audio_temp_dir = env::var("AUDIO_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("medialign-audio"));

        Ok(Self {
            database_path,

            tmdb_api_key: env::var("TMDB_API_KEY").ok(),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            audio_temp_dir,

            cache_max_age_days: env::var("CACHE_MAX_AGE_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid CACHE_MAX_AGE_DAYS")?,
        })
    }

    /// Cache freshness window as a `Duration`
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_days * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_max_age_converts_days() {
        let config = Config {
            database_path: PathBuf::from("/tmp/test.db"),
            tmdb_api_key: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_temp_dir: PathBuf::from("/tmp"),
            cache_max_age_days: 30,
        };
        assert_eq!(config.cache_max_age(), Duration::from_secs(30 * 86400));
    }
}
