//! medialign - matches misnamed TV episode files to their episodes
//!
//! Identification tries the filename first, then falls back to sampled
//! audio, transcription, and synopsis matching. Commands are dispatched
//! from `cli`.

mod cli;
mod config;
mod db;
mod jobs;
mod services;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::AppContext;
use crate::config::Config;
use crate::db::Database;
use crate::services::{
    AudioSampler, ExtractionService, FfmpegService, IdentificationPipeline, MetadataService,
    OsFileSystem, PlaceholderTranscriber, TmdbClient, TranscriptMatcher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Logs go to stderr so command output stays clean on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medialign=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let db = Database::connect(&config.database_path).await?;
    db.init_schema().await?;
    tracing::info!(path = %config.database_path.display(), "Database ready");

    let metadata = Arc::new(MetadataService::new(
        Arc::new(TmdbClient::new(
            config.tmdb_api_key.clone().unwrap_or_default(),
        )),
        db.clone(),
        config.cache_max_age(),
    ));

    let ffmpeg = FfmpegService::with_paths(config.ffmpeg_path.clone(), config.ffprobe_path.clone());
    if !ffmpeg.is_available().await {
        tracing::warn!("ffmpeg or ffprobe not found - audio analysis will fail");
    }
    let sampler = AudioSampler::new(
        Arc::new(ffmpeg),
        Arc::new(OsFileSystem),
        config.audio_temp_dir.clone(),
    );

    let pipeline = Arc::new(IdentificationPipeline::new(
        db.clone(),
        metadata.clone(),
        sampler,
        Arc::new(PlaceholderTranscriber),
        TranscriptMatcher::new(),
        Arc::new(OsFileSystem),
    ));
    let extraction = ExtractionService::new(db.clone(), pipeline.clone());

    let _scheduler = jobs::start_scheduler(metadata.clone()).await?;

    let ctx = AppContext {
        db,
        metadata,
        pipeline,
        extraction,
    };
    cli::run(&ctx, std::env::args().skip(1)).await
}
