//! Directory scanner for series media files.
//!
//! Walks a series root directory, collects video files by extension, and
//! registers them as pending media file rows.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::db::{CreateMediaFile, Database};

use super::file_utils::is_video_file;

/// Counts from one directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub total_found: usize,
    pub new_files: usize,
}

/// Scanner service for discovering media files
pub struct ScannerService {
    db: Database,
}

impl ScannerService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Scan a series directory and register every video file under it.
    /// Files already known by path are left untouched.
    pub async fn scan_directory(&self, series_id: Uuid, directory: &str) -> Result<ScanOutcome> {
        let root = Path::new(directory);
        if !root.exists() {
            bail!("Directory does not exist: {}", directory);
        }

        let video_files = collect_video_files(root);
        let total_found = video_files.len();
        info!(directory, total = total_found, "Found video files to register");

        let files = self.db.media_files();
        let mut new_files = 0;

        for path in video_files {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let (record, created) = files
                .find_or_create(CreateMediaFile {
                    series_id,
                    original_path: path.to_string_lossy().to_string(),
                    original_filename: filename,
                })
                .await?;

            if created {
                debug!(path = %record.original_path, "Registered new media file");
                new_files += 1;
            }
        }

        info!(
            directory,
            total = total_found,
            new = new_files,
            "Directory scan completed"
        );

        Ok(ScanOutcome {
            total_found,
            new_files,
        })
    }
}

/// Collect all video files under `root`, sorted for deterministic ordering.
pub fn collect_video_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            is_video_file(&name)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}
