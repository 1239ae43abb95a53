//! Metadata, media analysis, and scheduling services

pub mod audio_sampler;
pub mod extraction;
pub mod ffmpeg;
pub mod file_utils;
pub mod filename_parser;
pub mod filesystem;
pub mod metadata;
pub mod processor;
pub mod rate_limiter;
pub mod scanner;
pub mod tmdb;
pub mod transcriber;
pub mod transcript_matcher;

pub use audio_sampler::{AudioExtractor, AudioSampler, SampleOutcome};
pub use extraction::{
    ExtractionService, ExtractionStatusReport, FileExtractionState, RunProgress, RunSeries,
};
pub use ffmpeg::FfmpegService;
pub use filesystem::{FileSystem, OsFileSystem};
pub use metadata::{EpisodeInfo, MetadataProvider, MetadataService, SeriesInfo, SeriesSearchResult};
pub use processor::{IdentificationPipeline, IdentifyOutcome, StatusUpdate};
pub use scanner::{ScanOutcome, ScannerService};
pub use tmdb::TmdbClient;
pub use transcriber::{PlaceholderTranscriber, Transcriber};
pub use transcript_matcher::TranscriptMatcher;
