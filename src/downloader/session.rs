// SessionCoordinator - the entry point a front end talks to
//
// Discovery and download each run as one tokio task. A caller gets an
// `Operation` back immediately and reads its events; at most one operation
// of each kind is in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::backends::{ChromeRenderer, FfmpegRunner, HttpFetcher};
use super::errors::DownloadError;
use super::models::{Catalog, DownloadRequest, Selection, SessionEvent};
use super::observer::TrafficObserver;
use super::orchestrator::DownloadOrchestrator;
use super::tools::{ToolManager, ToolType};
use super::traits::{MediaFetcher, MuxRunner, PageRenderer, ProgressEmitter};
use super::utils::{to_embed_url, validate_page_url};
use crate::config::{DownloaderConfig, SiteConfig};

/// Handle to a running discovery or download. Dropping it cancels the work.
pub struct Operation<T> {
    events: UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<T, DownloadError>>,
    _cancel_on_drop: DropGuard,
}

impl<T> Operation<T> {
    fn spawn<F>(events: UnboundedReceiver<SessionEvent>, cancel: CancellationToken, work: F) -> Self
    where
        F: std::future::Future<Output = Result<T, DownloadError>> + Send + 'static,
        T: Send + 'static,
    {
        Self {
            events,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            handle: tokio::spawn(work),
        }
    }

    /// Next event; `None` once the operation has finished and every event
    /// has been read
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the result. Unread events are dropped.
    pub async fn join(self) -> Result<T, DownloadError> {
        self.handle
            .await
            .map_err(|e| DownloadError::Io(std::io::Error::other(format!("worker task failed: {}", e))))?
    }
}

/// Marks an operation kind as running until dropped
struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    fn acquire(flag: &Arc<AtomicBool>, what: &'static str) -> Result<Self, DownloadError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DownloadError::Busy(what))?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionCoordinator {
    observer: Arc<TrafficObserver>,
    orchestrator: Arc<DownloadOrchestrator>,
    site: SiteConfig,
    discovering: Arc<AtomicBool>,
    downloading: Arc<AtomicBool>,
}

impl SessionCoordinator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        fetcher: Arc<dyn MediaFetcher>,
        muxer: Arc<dyn MuxRunner>,
        config: &DownloaderConfig,
        ffmpeg: impl Into<String>,
    ) -> Self {
        Self {
            observer: Arc::new(TrafficObserver::new(renderer, config.discovery.clone())),
            orchestrator: Arc::new(DownloadOrchestrator::new(
                fetcher,
                muxer,
                config.download.clone(),
                ffmpeg,
            )),
            site: config.site.clone(),
            discovering: Arc::new(AtomicBool::new(false)),
            downloading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire up headless Chrome, the HTTP fetcher and ffmpeg. Fails when a
    /// required tool cannot be found.
    pub fn from_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        let tools = ToolManager::new();
        let chromedriver = tools.resolve(ToolType::ChromeDriver, config.browser.chromedriver.as_deref())?;
        let ffmpeg = tools.resolve(ToolType::Ffmpeg, config.download.ffmpeg.as_deref())?;
        tracing::info!("[session] chromedriver: {}, ffmpeg: {}", chromedriver, ffmpeg);

        let renderer = ChromeRenderer::new(chromedriver, config.browser.clone())?;
        let fetcher = HttpFetcher::new(&config.network)?;
        let muxer = FfmpegRunner::new(config.download.mux_timeout_secs);

        Ok(Self::new(
            Arc::new(renderer),
            Arc::new(fetcher),
            Arc::new(muxer),
            config,
            ffmpeg,
        ))
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::Acquire)
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::Acquire)
    }

    /// Validate `url` and start discovering its streams. Ends with exactly
    /// one `CatalogReady` or `DiscoveryFailed` event.
    pub fn start_discovery(&self, url: &str) -> Result<Operation<Catalog>, DownloadError> {
        let page = validate_page_url(url, &self.site)?;
        let guard = ActiveFlag::acquire(&self.discovering, "discovery")?;

        let (tx, events) = mpsc::unbounded_channel();
        let emitter = ProgressEmitter::new(tx);
        let (embed_url, rewritten) = to_embed_url(&page, &self.site);
        if rewritten {
            tracing::info!("[session] using embed URL {}", embed_url);
            emitter.status(format!("Using embed URL: {}", embed_url));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let observer = self.observer.clone();

        Ok(Operation::spawn(events, cancel, async move {
            let result = observer.discover(&embed_url, &emitter, &token).await;
            drop(guard);
            match &result {
                Ok(catalog) => emitter.emit(SessionEvent::CatalogReady(catalog.clone())),
                Err(e) => emitter.emit(SessionEvent::DiscoveryFailed(e.summary())),
            }
            result
        }))
    }

    /// Download `selection` from `catalog` into `output_dir`. Ends with
    /// exactly one `Done` event.
    pub fn start_download(
        &self,
        catalog: &Catalog,
        selection: Selection,
        output_dir: impl Into<PathBuf>,
        custom_name: Option<String>,
    ) -> Result<Operation<PathBuf>, DownloadError> {
        if !selection.is_within(catalog) {
            return Err(DownloadError::InvalidSelection(
                "selection was not made from this catalog".to_string(),
            ));
        }
        let guard = ActiveFlag::acquire(&self.downloading, "download")?;

        let request = DownloadRequest {
            source_url: catalog.source_url.clone(),
            title: catalog.title.clone(),
            selection,
            output_dir: output_dir.into(),
            custom_name,
        };

        let (tx, events) = mpsc::unbounded_channel();
        let emitter = ProgressEmitter::new(tx);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let orchestrator = self.orchestrator.clone();

        Ok(Operation::spawn(events, cancel, async move {
            let result = orchestrator.run(request, &emitter, &token).await;
            drop(guard);
            let (success, detail) = match &result {
                Ok(path) => (true, path.display().to_string()),
                Err(e) => (false, e.summary()),
            };
            emitter.emit(SessionEvent::Done { success, detail });
            result
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::observer::tests::FakeRenderer;
    use crate::downloader::orchestrator::tests::{FakeFetcher, FakeMuxer, AUDIO, VIDEO};

    const MEDIA_PAGE: &str = "https://www.picta.cu/medias/movie-night";

    struct Setup {
        renderer: Arc<FakeRenderer>,
        fetcher: Arc<FakeFetcher>,
        coordinator: SessionCoordinator,
        temp_root: tempfile::TempDir,
        output_dir: tempfile::TempDir,
    }

    fn setup(renderer: FakeRenderer, fetcher: FakeFetcher) -> Setup {
        let renderer = Arc::new(renderer);
        let fetcher = Arc::new(fetcher);
        let temp_root = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let config = DownloaderConfig::default()
            .with_discovery_windows(0.0, 0.0, 0.0)
            .with_temp_root(Some(temp_root.path().to_path_buf()));
        let coordinator = SessionCoordinator::new(
            renderer.clone(),
            fetcher.clone(),
            Arc::new(FakeMuxer::exiting(0)),
            &config,
            "ffmpeg",
        );
        Setup {
            renderer,
            fetcher,
            coordinator,
            temp_root,
            output_dir,
        }
    }

    /// Wait until the renderer has handed out a browser session
    async fn wait_until_opened(renderer: &FakeRenderer) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while renderer.opened.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("browser session was never opened");
    }

    async fn collect<T>(op: &mut Operation<T>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = op.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_browser() {
        let s = setup(FakeRenderer::with_responses(&[VIDEO]), FakeFetcher::default());
        let err = s
            .coordinator
            .start_discovery("https://www.youtube.com/watch?v=x")
            .err()
            .unwrap();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert_eq!(s.renderer.opened.load(Ordering::SeqCst), 0);
        assert!(!s.coordinator.is_discovering());
    }

    #[tokio::test]
    async fn test_discovery_rewrites_to_embed() {
        let s = setup(FakeRenderer::with_responses(&[VIDEO, AUDIO]), FakeFetcher::default());
        let mut op = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        let events = collect(&mut op).await;
        let catalog = op.join().await.unwrap();

        assert_eq!(catalog.source_url, "https://www.picta.cu/embed/movie-night");
        assert_eq!(
            events.first(),
            Some(&SessionEvent::Status(
                "Using embed URL: https://www.picta.cu/embed/movie-night".to_string()
            ))
        );
        assert_eq!(events.last(), Some(&SessionEvent::CatalogReady(catalog)));
        let terminal = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::CatalogReady(_) | SessionEvent::DiscoveryFailed(_)))
            .count();
        assert_eq!(terminal, 1);
        assert!(!s.coordinator.is_discovering());
    }

    #[tokio::test]
    async fn test_discovery_failure_event() {
        let s = setup(FakeRenderer::with_responses(&[AUDIO]), FakeFetcher::default());
        let mut op = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        let events = collect(&mut op).await;
        assert!(matches!(events.last(), Some(SessionEvent::DiscoveryFailed(msg)) if msg.contains("No video")));
        assert!(matches!(op.join().await, Err(DownloadError::NoMediaFound(_))));
    }

    #[tokio::test]
    async fn test_second_discovery_is_busy_until_first_ends() {
        let mut renderer = FakeRenderer::with_responses(&[VIDEO]);
        renderer.hang_on_drain = true;
        let s = setup(renderer, FakeFetcher::default());

        let mut first = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        assert!(s.coordinator.is_discovering());
        assert!(matches!(
            s.coordinator.start_discovery(MEDIA_PAGE).err(),
            Some(DownloadError::Busy("discovery"))
        ));

        wait_until_opened(&s.renderer).await;
        first.cancel();
        let events = collect(&mut first).await;
        assert!(matches!(events.last(), Some(SessionEvent::DiscoveryFailed(_))));
        assert!(matches!(first.join().await, Err(DownloadError::Cancelled)));
        assert_eq!(s.renderer.closed.load(Ordering::SeqCst), 1);

        assert!(!s.coordinator.is_discovering());
        let again = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        again.cancel();
        let _ = again.join().await;
    }

    #[tokio::test]
    async fn test_dropped_operation_frees_the_slot() {
        let mut renderer = FakeRenderer::with_responses(&[VIDEO]);
        renderer.hang_on_drain = true;
        let s = setup(renderer, FakeFetcher::default());

        let op = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        wait_until_opened(&s.renderer).await;
        drop(op);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while s.coordinator.is_discovering() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("discovery kept running after its handle was dropped");
        assert_eq!(s.renderer.closed.load(Ordering::SeqCst), 1);

        let again = s.coordinator.start_discovery(MEDIA_PAGE).unwrap();
        again.cancel();
        let _ = again.join().await;
    }

    #[tokio::test]
    async fn test_download_emits_single_done() {
        let s = setup(FakeRenderer::with_responses(&[VIDEO, AUDIO]), FakeFetcher::default());
        let catalog = s.coordinator.start_discovery(MEDIA_PAGE).unwrap().join().await.unwrap();
        let selection = catalog.select(0, Some(0), None).unwrap();

        let mut op = s
            .coordinator
            .start_download(&catalog, selection, s.output_dir.path(), Some("night".to_string()))
            .unwrap();
        assert!(s.coordinator.is_downloading());
        let events = collect(&mut op).await;
        let path = op.join().await.unwrap();

        assert_eq!(path, s.output_dir.path().join("night.mp4"));
        let done: Vec<&SessionEvent> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Done { .. }))
            .collect();
        assert_eq!(
            done,
            vec![&SessionEvent::Done {
                success: true,
                detail: path.display().to_string()
            }]
        );
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Progress(_))));
        assert_eq!(s.fetcher.calls.lock().unwrap().len(), 2);
        assert!(!s.coordinator.is_downloading());
    }

    #[tokio::test]
    async fn test_foreign_selection_rejected() {
        let s = setup(FakeRenderer::with_responses(&[VIDEO]), FakeFetcher::default());
        let catalog = s.coordinator.start_discovery(MEDIA_PAGE).unwrap().join().await.unwrap();
        let other = crate::downloader::orchestrator::tests::catalog();
        let foreign = other.select(0, Some(0), None).unwrap();

        let err = s
            .coordinator
            .start_download(&catalog, foreign, s.output_dir.path(), None)
            .err()
            .unwrap();
        assert!(matches!(err, DownloadError::InvalidSelection(_)));
        assert!(!s.coordinator.is_downloading());
    }

    #[tokio::test]
    async fn test_cancelled_download_reports_failure() {
        let fetcher = FakeFetcher {
            hang: true,
            ..Default::default()
        };
        let s = setup(FakeRenderer::with_responses(&[VIDEO]), fetcher);
        let catalog = s.coordinator.start_discovery(MEDIA_PAGE).unwrap().join().await.unwrap();
        let selection = catalog.select(0, None, None).unwrap();

        let mut op = s
            .coordinator
            .start_download(&catalog, selection.clone(), s.output_dir.path(), None)
            .unwrap();
        assert!(matches!(
            s.coordinator
                .start_download(&catalog, selection, s.output_dir.path(), None)
                .err(),
            Some(DownloadError::Busy("download"))
        ));

        op.cancel();
        let events = collect(&mut op).await;
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Done {
                success: false,
                detail: "Operation cancelled".to_string()
            })
        );
        assert!(std::fs::read_dir(s.temp_root.path()).unwrap().next().is_none());
    }
}
