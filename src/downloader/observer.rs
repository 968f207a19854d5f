// TrafficObserver - finds media streams in a page's live network traffic
//
// The player only requests its streams once it is attached and playing, so
// discovery is: load the page, wait for the <video> element, let the initial
// requests settle, call play(), wait again, then classify everything the
// browser saw. Every step before classification is tolerant; only "no video
// at all" is a hard failure.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::classifier;
use super::errors::DownloadError;
use super::models::{Catalog, CatalogBuilder};
use super::traits::{PageRenderer, ProgressEmitter, RenderSession};
use crate::config::DiscoveryConfig;

pub struct TrafficObserver {
    renderer: Arc<dyn PageRenderer>,
    config: DiscoveryConfig,
}

impl TrafficObserver {
    pub fn new(renderer: Arc<dyn PageRenderer>, config: DiscoveryConfig) -> Self {
        Self { renderer, config }
    }

    /// Render `page_url` and build its catalog. The browser session is closed
    /// on every path, including cancellation.
    pub async fn discover(
        &self,
        page_url: &str,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<Catalog, DownloadError> {
        emitter.status("Setting up browser...");
        tracing::info!("[observer] opening {} session", self.renderer.name());

        let mut session = tokio::select! {
            opened = self.renderer.open() => opened?,
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        let result = tokio::select! {
            r = self.observe(session.as_mut(), page_url, emitter) => r,
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        };

        if let Err(e) = session.close().await {
            tracing::warn!("[observer] failed to close browser session: {}", e);
        }

        match &result {
            Ok(catalog) => tracing::info!(
                "[observer] '{}': {} video, {} audio, {} subtitle",
                catalog.title,
                catalog.videos.len(),
                catalog.audios.len(),
                catalog.subtitles.len()
            ),
            Err(e) => tracing::warn!("[observer] discovery of {} failed: {}", page_url, e),
        }
        result
    }

    async fn observe(
        &self,
        session: &mut dyn RenderSession,
        page_url: &str,
        emitter: &ProgressEmitter,
    ) -> Result<Catalog, DownloadError> {
        emitter.status("Loading video page...");
        session
            .navigate(page_url)
            .await
            .map_err(|e| match e {
                DownloadError::Navigation { .. } | DownloadError::Cancelled => e,
                other => DownloadError::Navigation {
                    url: page_url.to_string(),
                    cause: other.to_string(),
                },
            })?;

        let selector = self.config.media_selector.as_str();
        match session
            .wait_for_element(selector, self.config.element_timeout())
            .await
        {
            Ok(true) => tracing::debug!("[observer] media element present"),
            Ok(false) => {
                tracing::warn!(
                    "[observer] no '{}' element after {:?}, continuing",
                    selector,
                    self.config.element_timeout()
                );
                emitter.status("Video player did not appear in time, continuing anyway");
            }
            Err(e) => {
                tracing::warn!("[observer] waiting for '{}' failed: {}", selector, e);
                emitter.status(format!("Error waiting for the video player: {}", e));
            }
        }

        emitter.status("Waiting for video resources to load...");
        tokio::time::sleep(self.config.settle_window()).await;

        match session.play_media(selector).await {
            Ok(()) => {
                tracing::debug!("[observer] playback started");
                tokio::time::sleep(self.config.playback_window()).await;
            }
            Err(e) => {
                tracing::warn!("[observer] could not start playback: {}", e);
                emitter.status(format!("Could not start playback: {}", e));
            }
        }

        let title = self.page_title(session).await;

        emitter.status("Analyzing network requests...");
        let responses = match session.drain_responses().await {
            Ok(responses) => responses,
            Err(e) => {
                tracing::warn!("[observer] could not read network log: {}", e);
                emitter.status(format!("Could not read network requests: {}", e));
                Vec::new()
            }
        };
        tracing::debug!("[observer] {} responses captured", responses.len());

        let mut builder = CatalogBuilder::new(page_url, title);
        for response in &responses {
            if let Some(resource) = classifier::classify(&response.url) {
                if builder.insert(resource) {
                    tracing::debug!("[observer] found {}", response.url);
                }
            }
        }
        let catalog = builder.build();

        if catalog.videos.is_empty() {
            return Err(DownloadError::NoMediaFound(page_url.to_string()));
        }
        Ok(catalog)
    }

    async fn page_title(&self, session: &mut dyn RenderSession) -> String {
        for selector in &self.config.title_selectors {
            match session.element_text(selector).await {
                Ok(Some(text)) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => {}
                Err(e) => tracing::debug!("[observer] title via '{}' failed: {}", selector, e),
            }
        }
        self.config.fallback_title.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::downloader::models::SessionEvent;
    use crate::downloader::traits::CapturedResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted browser; counts opened and closed sessions
    #[derive(Default)]
    pub(crate) struct FakeRenderer {
        pub responses: Vec<String>,
        pub texts: HashMap<String, String>,
        pub has_video_element: bool,
        pub fail_navigation: bool,
        pub fail_play: bool,
        pub fail_drain: bool,
        pub hang_on_drain: bool,
        pub opened: AtomicUsize,
        pub closed: Arc<AtomicUsize>,
        pub played: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRenderer {
        pub(crate) fn with_responses(urls: &[&str]) -> Self {
            Self {
                responses: urls.iter().map(|u| u.to_string()).collect(),
                has_video_element: true,
                ..Default::default()
            }
        }
    }

    struct FakeSession {
        responses: Vec<String>,
        texts: HashMap<String, String>,
        has_video_element: bool,
        fail_navigation: bool,
        fail_play: bool,
        fail_drain: bool,
        hang_on_drain: bool,
        closed: Arc<AtomicUsize>,
        played: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn open(&self) -> Result<Box<dyn RenderSession>, DownloadError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                responses: self.responses.clone(),
                texts: self.texts.clone(),
                has_video_element: self.has_video_element,
                fail_navigation: self.fail_navigation,
                fail_play: self.fail_play,
                fail_drain: self.fail_drain,
                hang_on_drain: self.hang_on_drain,
                closed: self.closed.clone(),
                played: self.played.clone(),
            }))
        }
    }

    #[async_trait]
    impl RenderSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<(), DownloadError> {
            if self.fail_navigation {
                return Err(DownloadError::Renderer(format!("net::ERR_NAME_NOT_RESOLVED {url}")));
            }
            Ok(())
        }

        async fn wait_for_element(
            &mut self,
            _selector: &str,
            _timeout: Duration,
        ) -> Result<bool, DownloadError> {
            Ok(self.has_video_element)
        }

        async fn element_text(&mut self, selector: &str) -> Result<Option<String>, DownloadError> {
            Ok(self.texts.get(selector).cloned())
        }

        async fn play_media(&mut self, selector: &str) -> Result<(), DownloadError> {
            if self.fail_play || !self.has_video_element {
                return Err(DownloadError::Renderer("no such element".to_string()));
            }
            self.played.lock().unwrap().push(selector.to_string());
            Ok(())
        }

        async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, DownloadError> {
            if self.hang_on_drain {
                std::future::pending::<()>().await;
            }
            if self.fail_drain {
                return Err(DownloadError::Renderer("invalid session id".to_string()));
            }
            Ok(self
                .responses
                .iter()
                .map(|url| CapturedResponse { url: url.clone() })
                .collect())
        }

        async fn close(self: Box<Self>) -> Result<(), DownloadError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn instant_config() -> DiscoveryConfig {
        DiscoveryConfig {
            element_timeout_secs: 0.0,
            settle_window_secs: 0.0,
            playback_window_secs: 0.0,
            ..DiscoveryConfig::default()
        }
    }

    const V480: &str = "https://s.picta.cu/o/video%2Fmovie_480p.mp4";
    const V720: &str = "https://s.picta.cu/o/video%2Fmovie_720p.mp4";
    const A_ENG: &str = "https://s.picta.cu/o/audio%2Fmovie_eng_128k.mp4";
    const SUB: &str = "https://s.picta.cu/subs/movie_spa.vtt";

    async fn run(renderer: Arc<FakeRenderer>) -> Result<Catalog, DownloadError> {
        let observer = TrafficObserver::new(renderer, instant_config());
        observer
            .discover(
                "https://www.picta.cu/embed/movie",
                &ProgressEmitter::disabled(),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_catalog_from_traffic() {
        let mut renderer = FakeRenderer::with_responses(&[
            "https://www.picta.cu/embed/movie",
            V480,
            A_ENG,
            "https://www.picta.cu/static/app.js",
            V720,
            SUB,
        ]);
        renderer
            .texts
            .insert("h1.title".to_string(), "  Movie Night  ".to_string());
        let renderer = Arc::new(renderer);

        let catalog = run(renderer.clone()).await.unwrap();
        assert_eq!(catalog.title, "Movie Night");
        assert_eq!(catalog.source_url, "https://www.picta.cu/embed/movie");
        let qualities: Vec<&str> = catalog.videos.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(qualities, vec!["480p", "720p"]);
        assert_eq!(catalog.audios.len(), 1);
        assert_eq!(catalog.subtitles.len(), 1);
        assert_eq!(renderer.played.lock().unwrap().as_slice(), ["video"]);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_urls_deduplicated() {
        let renderer = Arc::new(FakeRenderer::with_responses(&[V720, V720, A_ENG, A_ENG]));
        let catalog = run(renderer).await.unwrap();
        assert_eq!(catalog.videos.len(), 1);
        assert_eq!(catalog.audios.len(), 1);
    }

    #[tokio::test]
    async fn test_title_fallbacks() {
        let mut renderer = FakeRenderer::with_responses(&[V720]);
        renderer.texts.insert("h1".to_string(), "Plain heading".to_string());
        assert_eq!(run(Arc::new(renderer)).await.unwrap().title, "Plain heading");

        let mut renderer = FakeRenderer::with_responses(&[V720]);
        renderer.texts.insert("h1.title".to_string(), "   ".to_string());
        assert_eq!(run(Arc::new(renderer)).await.unwrap().title, "Picta Video");
    }

    #[tokio::test]
    async fn test_missing_player_is_not_fatal() {
        let mut renderer = FakeRenderer::with_responses(&[V480]);
        renderer.has_video_element = false;
        let renderer = Arc::new(renderer);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = TrafficObserver::new(renderer.clone(), instant_config());
        let catalog = observer
            .discover(
                "https://www.picta.cu/embed/movie",
                &ProgressEmitter::new(tx),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(catalog.videos.len(), 1);

        let mut statuses = Vec::new();
        while let Ok(SessionEvent::Status(s)) = rx.try_recv() {
            statuses.push(s);
        }
        assert!(statuses.iter().any(|s| s.contains("did not appear")));
        assert!(statuses.iter().any(|s| s.contains("Could not start playback")));
    }

    #[tokio::test]
    async fn test_no_video_is_error_and_session_closed() {
        let renderer = Arc::new(FakeRenderer::with_responses(&[A_ENG, SUB]));
        let err = run(renderer.clone()).await.unwrap_err();
        assert!(matches!(err, DownloadError::NoMediaFound(_)));
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreadable_network_log_means_no_media() {
        let mut renderer = FakeRenderer::with_responses(&[V720]);
        renderer.fail_drain = true;
        let renderer = Arc::new(renderer);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = TrafficObserver::new(renderer.clone(), instant_config());
        let err = observer
            .discover(
                "https://www.picta.cu/embed/movie",
                &ProgressEmitter::new(tx),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoMediaFound(_)));
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);

        let mut statuses = Vec::new();
        while let Ok(SessionEvent::Status(s)) = rx.try_recv() {
            statuses.push(s);
        }
        assert!(statuses.iter().any(|s| s.contains("Could not read network requests")));
    }

    #[tokio::test]
    async fn test_navigation_failure() {
        let mut renderer = FakeRenderer::with_responses(&[V720]);
        renderer.fail_navigation = true;
        let renderer = Arc::new(renderer);
        let err = run(renderer.clone()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Navigation { .. }));
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_still_closes_session() {
        let mut renderer = FakeRenderer::with_responses(&[V720]);
        renderer.hang_on_drain = true;
        let renderer = Arc::new(renderer);
        let observer = TrafficObserver::new(renderer.clone(), instant_config());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = observer
            .discover("https://www.picta.cu/embed/movie", &ProgressEmitter::disabled(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(renderer.opened.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }
}
