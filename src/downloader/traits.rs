// Capability traits injected into the core, plus the event emitter

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::errors::DownloadError;
use super::models::{ProgressEvent, ResourceKind, SessionEvent};
use super::remux::RemuxCommand;

/// A response observed by the browser's network log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub url: String,
}

/// Headless browser that can render a page and record its traffic
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Name of the renderer (for logging)
    fn name(&self) -> &'static str;

    /// Start an isolated browser session with network capture enabled
    async fn open(&self) -> Result<Box<dyn RenderSession>, DownloadError>;
}

/// One live browser session. `close` must be called on every path.
#[async_trait]
pub trait RenderSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DownloadError>;

    /// Wait for an element matching `selector`; `Ok(false)` on timeout
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, DownloadError>;

    /// Text of the first element matching `selector`, if any
    async fn element_text(&mut self, selector: &str) -> Result<Option<String>, DownloadError>;

    /// Call `play()` on the first media element matching `selector`
    async fn play_media(&mut self, selector: &str) -> Result<(), DownloadError>;

    /// Take every response recorded since the session started
    async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, DownloadError>;

    async fn close(self: Box<Self>) -> Result<(), DownloadError>;
}

/// Streams a URL to a file
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download `url` into `destination`, calling `on_progress(done, total)`
    /// after every chunk. `total` is 0 when unknown.
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<(), DownloadError>;
}

/// Result of an external mux process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxOutput {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl MuxOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a built remux command
#[async_trait]
pub trait MuxRunner: Send + Sync {
    async fn run(&self, command: &RemuxCommand) -> Result<MuxOutput, DownloadError>;
}

/// Progress emitter helper.
///
/// Cloned into every worker; a disabled emitter drops events.
#[derive(Debug, Clone, Default)]
pub struct ProgressEmitter {
    tx: Option<UnboundedSender<SessionEvent>>,
}

impl ProgressEmitter {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(SessionEvent::Status(message.into()));
    }

    pub fn progress(&self, role: ResourceKind, bytes_downloaded: u64, bytes_total: u64) {
        self.emit(SessionEvent::Progress(ProgressEvent {
            role,
            bytes_downloaded,
            bytes_total,
        }));
    }
}
