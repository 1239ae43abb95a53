//! Command-line interface: argument parsing and command dispatch

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::db::{Database, EpisodeRecord, FileStatus};
use crate::services::{
    ExtractionService, IdentificationPipeline, MetadataService, RunProgress, RunSeries,
};

const USAGE: &str = "\
medialign - episode identification for misnamed media files

Usage:
  medialign process <directory> <tmdb-id>   Register a series and scan its files
  medialign run <series-id>                 Identify files that still need audio analysis
  medialign status [series-id]              Processing summaries, or one series in detail
  medialign fix <file-id> <episode-id>      Rename a file to its corrected episode name
  medialign reset <file-id>                 Clear a file's results for reprocessing
  medialign search <title>                  Search the metadata provider by title
  medialign remove <series-id>              Delete a series and all its records
  medialign cache-gc                        Evict expired provider cache entries";

/// Services the commands dispatch into
pub struct AppContext {
    pub db: Database,
    pub metadata: Arc<MetadataService>,
    pub pipeline: Arc<IdentificationPipeline>,
    pub extraction: ExtractionService,
}

/// Parse the command line and run the requested command.
pub async fn run(ctx: &AppContext, mut args: impl Iterator<Item = String>) -> Result<()> {
    let command = args.next().unwrap_or_else(|| "help".to_string());
    match command.as_str() {
        "process" => {
            let directory = next_arg(&mut args, "directory")?;
            let provider_id: i64 = next_arg(&mut args, "tmdb-id")?
                .parse()
                .context("<tmdb-id> must be a number")?;
            process(ctx, &directory, provider_id).await
        }
        "run" => {
            let series_id = parse_uuid(&next_arg(&mut args, "series-id")?, "series id")?;
            run_extraction(ctx, series_id).await
        }
        "status" => match args.next() {
            Some(value) => status_series(ctx, parse_uuid(&value, "series id")?).await,
            None => status_all(ctx).await,
        },
        "fix" => {
            let file_id = parse_uuid(&next_arg(&mut args, "file-id")?, "file id")?;
            let episode_id = parse_uuid(&next_arg(&mut args, "episode-id")?, "episode id")?;
            fix(ctx, file_id, episode_id).await
        }
        "reset" => {
            let file_id = parse_uuid(&next_arg(&mut args, "file-id")?, "file id")?;
            ctx.pipeline.reset_file(file_id).await?;
            println!("File {file_id} reset to pending");
            Ok(())
        }
        "search" => {
            let title = args.collect::<Vec<_>>().join(" ");
            if title.is_empty() {
                bail!("Missing argument <title>");
            }
            search(ctx, &title).await
        }
        "remove" => {
            let series_id = parse_uuid(&next_arg(&mut args, "series-id")?, "series id")?;
            if !ctx.pipeline.remove_series(series_id).await? {
                bail!("Series {series_id} not found");
            }
            println!("Series {series_id} removed");
            Ok(())
        }
        "cache-gc" => {
            let evicted = ctx.metadata.evict_expired_cache().await?;
            println!("Evicted {evicted} expired cache entries");
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("{USAGE}");
            bail!("Unknown command '{other}'");
        }
    }
}

fn next_arg(args: &mut impl Iterator<Item = String>, name: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("Missing argument <{name}>"))
}

fn parse_uuid(value: &str, name: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {name} '{value}'"))
}

async fn process(ctx: &AppContext, directory: &str, provider_id: i64) -> Result<()> {
    let summary = ctx.pipeline.process_series(directory, provider_id).await?;
    println!(
        "Processed {} files: {} correct, {} incorrect, {} unknown, {} error, {} pending",
        summary.total,
        summary.correct,
        summary.incorrect,
        summary.unknown,
        summary.error,
        summary.pending
    );

    if let Some(series) = ctx.db.series().get_by_provider_id(provider_id).await? {
        println!("Series '{}' registered as {}", series.title, series.id);
        if summary.pending > 0 {
            println!(
                "{} files await audio analysis: medialign run {}",
                summary.pending, series.id
            );
        }
    }
    Ok(())
}

/// Start a run and follow its progress events. Ctrl-C requests
/// cancellation; the run still drains its current batch before stopping.
async fn run_extraction(ctx: &AppContext, series_id: Uuid) -> Result<()> {
    let mut receiver = match ctx.extraction.run_series(series_id).await? {
        RunSeries::Started(receiver) => receiver,
        RunSeries::AlreadyRunning => {
            println!("A run for series {series_id} is already in flight");
            return Ok(());
        }
    };

    println!("Extraction started; press Ctrl-C to cancel");
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(progress) => {
                    print_progress(&progress);
                    if progress.is_complete {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling after the current batch...");
                ctx.extraction.cancel_run(series_id);
            }
        }
    }

    let report = ctx.extraction.extraction_status(series_id).await?;
    println!(
        "Done: {:.1}% overall ({} completed, {} pending, {} error)",
        report.overall_progress, report.completed_files, report.pending_files, report.error_files
    );
    Ok(())
}

fn print_progress(progress: &RunProgress) {
    println!(
        "[{}/{}] {:.1}%",
        progress.processed_files, progress.total_files, progress.aggregate_percent
    );
}

async fn status_all(ctx: &AppContext) -> Result<()> {
    let series = ctx.db.series().list_all().await?;
    if series.is_empty() {
        println!("No series registered");
        return Ok(());
    }
    for record in series {
        let summary = ctx.db.media_files().summary(record.id).await?;
        println!(
            "{}  {} - {} files ({} pending, {} correct, {} incorrect, {} fixed, {} unknown, {} error)",
            record.id,
            record.title,
            summary.total,
            summary.pending,
            summary.correct,
            summary.incorrect,
            summary.fixed,
            summary.unknown,
            summary.error
        );
    }
    Ok(())
}

async fn status_series(ctx: &AppContext, series_id: Uuid) -> Result<()> {
    let series = ctx
        .db
        .series()
        .get_by_id(series_id)
        .await?
        .with_context(|| format!("Series {series_id} not found"))?;
    let report = ctx.extraction.extraction_status(series_id).await?;
    let files = ctx.db.media_files().list_by_series(series_id).await?;
    let episodes = ctx.db.episodes().list_by_series(series_id).await?;
    let by_id: HashMap<Uuid, &EpisodeRecord> = episodes.iter().map(|e| (e.id, e)).collect();

    println!("{} ({} files)", series.title, files.len());
    println!(
        "Extraction: {:.1}%{} ({} completed, {} in progress, {} pending, {} error)",
        report.overall_progress,
        if report.is_processing { ", running" } else { "" },
        report.completed_files,
        report.in_progress_files,
        report.pending_files,
        report.error_files
    );

    for file in &files {
        let episode_label = file
            .episode_id
            .and_then(|id| by_id.get(&id))
            .map(|ep| format!("S{:02}E{:02}", ep.season_number, ep.episode_number))
            .unwrap_or_else(|| "-".into());
        let suffix = match (file.status, &file.corrected_filename) {
            (FileStatus::Incorrect, Some(corrected)) => format!("  -> {corrected}"),
            _ => String::new(),
        };
        println!(
            "  {}  {:<9} {:<7} {}{}",
            file.id,
            file.status.as_str(),
            episode_label,
            file.original_filename,
            suffix
        );
    }
    Ok(())
}

async fn fix(ctx: &AppContext, file_id: Uuid, episode_id: Uuid) -> Result<()> {
    let new_path = ctx.pipeline.fix_file(file_id, episode_id).await?;
    match ctx.db.episodes().get_by_id(episode_id).await? {
        Some(episode) => {
            let title = episode
                .title
                .map(|t| format!(" - {t}"))
                .unwrap_or_default();
            println!(
                "Renamed to {} (S{:02}E{:02}{})",
                new_path.display(),
                episode.season_number,
                episode.episode_number,
                title
            );
        }
        None => println!("Renamed to {}", new_path.display()),
    }
    Ok(())
}

async fn search(ctx: &AppContext, title: &str) -> Result<()> {
    let hits = ctx.metadata.search(title).await?;
    if hits.is_empty() {
        println!("No matches for '{title}'");
        return Ok(());
    }
    for hit in hits {
        let year = hit.year.map(|y| format!(" ({y})")).unwrap_or_default();
        println!("{:>9}  {}{}", hit.provider_id, hit.title, year);
    }
    Ok(())
}
