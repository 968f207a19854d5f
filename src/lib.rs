pub mod config;
pub mod downloader;
pub mod logging;

pub use config::{DownloaderConfig, FetchMode};
pub use downloader::{
    Catalog, DownloadError, FormatSelector, MediaResource, Operation, ResourceKind, Selection,
    SessionCoordinator, SessionEvent,
};
