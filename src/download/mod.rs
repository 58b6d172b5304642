//! Download admission and processing

pub mod admission;
pub mod progress;
pub mod ytdlp;

// Re-exports for convenience
pub use admission::{run_admitted_download, DownloadRequest};
pub use progress::{create_progress_bar, DownloadProgress, ProgressSnapshot};
pub use ytdlp::{DownloadOptions, DownloadedMedia, MediaDownloader, Quality, YtdlpDownloader};
