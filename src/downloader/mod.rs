// Downloader module - discovery, download and remux of picta.cu videos

pub mod backends;
pub mod classifier;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod observer;
pub mod orchestrator;
pub mod remux;
pub mod session;
pub mod tools;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use format_selector::{FormatSelector, QualityOption};
pub use models::{
    Catalog, CatalogBuilder, DownloadRequest, DownloadState, MediaResource, ProgressEvent,
    ResourceKind, Selection, SessionEvent,
};
pub use observer::TrafficObserver;
pub use orchestrator::{DownloadOrchestrator, DownloadSession};
pub use remux::{build_remux_command, RemuxCommand, RemuxInputs, RemuxPolicy};
pub use session::{Operation, SessionCoordinator};
pub use traits::{
    CapturedResponse, MediaFetcher, MuxOutput, MuxRunner, PageRenderer, ProgressEmitter,
    RenderSession,
};
