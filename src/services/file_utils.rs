//! Shared file utility functions
//!
//! Common utilities for working with media files across the codebase.
//! Centralizes file extension checks and filename sanitization.

use sanitize_filename;

/// Video file extensions (lowercase)
// TODO: Consider using `ffprobe` to determine file type more reliably
// instead of relying solely on extensions
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".3gp",
    ".ts",
];

/// Check if a file is a video file based on extension
///
/// # Arguments
/// * `path` - File path or filename to check
///
/// # Returns
/// `true` if the file has a video extension
pub fn is_video_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Get the container format from a file's extension
///
/// # Arguments
/// * `path` - File path to extract extension from
///
/// # Returns
/// The lowercase extension without the dot, or None if no extension
pub fn get_container(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

/// Sanitize a string for use as a filename
///
/// Uses the `sanitize_filename` crate which handles:
/// - Invalid characters for the current OS
/// - Reserved filenames (CON, PRN, etc. on Windows)
/// - Leading/trailing spaces and dots
///
/// # Arguments
/// * `name` - The string to sanitize
///
/// # Returns
/// A sanitized string safe to use as a filename
pub fn sanitize_for_filename(name: &str) -> String {
    sanitize_filename::sanitize(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("episode.mkv"));
        assert!(is_video_file("EPISODE.MKV"));
        assert!(is_video_file("/path/to/video.mp4"));
        assert!(is_video_file("show.S01E01.1080p.ts"));
        assert!(!is_video_file("music.mp3"));
        assert!(!is_video_file("notes.txt"));
        assert!(!is_video_file("no_extension"));
    }

    #[test]
    fn test_get_container() {
        assert_eq!(get_container("video.mkv"), Some("mkv".to_string()));
        assert_eq!(get_container("VIDEO.MKV"), Some("mkv".to_string()));
        assert_eq!(get_container("no_extension"), None);
    }

    #[test]
    fn test_sanitize_for_filename() {
        // Basic sanitization
        let result = sanitize_for_filename("Pilot: Part One");
        assert!(!result.contains(':'));

        // Should handle slashes
        let result = sanitize_for_filename("path/to/file");
        assert!(!result.contains('/'));
    }
}
