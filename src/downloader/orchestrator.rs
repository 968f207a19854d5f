// DownloadOrchestrator - fetches the selected streams and remuxes them
//
// Each run owns a private temp directory. Whatever happens (success, fetch
// or mux failure, cancellation) every temp file is removed before `run`
// returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::OptionFuture;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{DownloadRequest, DownloadState, MediaResource, ResourceKind, Selection};
use super::remux::{build_remux_command, RemuxInputs, RemuxPolicy};
use super::traits::{MediaFetcher, MuxRunner, ProgressEmitter};
use super::utils::output_file_name;
use crate::config::{DownloadConfig, FetchMode};

/// A temp file and the stream it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFile {
    pub role: ResourceKind,
    pub path: PathBuf,
}

/// State of one download run
#[derive(Debug)]
pub struct DownloadSession {
    pub source_url: String,
    pub output_dir: PathBuf,
    pub output_file_name: String,
    pub selection: Selection,
    state: DownloadState,
    temp_dir: Option<TempDir>,
    temp_files: Vec<TempFile>,
}

impl DownloadSession {
    pub fn new(request: &DownloadRequest, config: &DownloadConfig) -> Result<Self, DownloadError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("picta-");
        let temp_dir = match &config.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        Ok(Self {
            source_url: request.source_url.clone(),
            output_dir: request.output_dir.clone(),
            output_file_name: output_file_name(
                &request.title,
                request.custom_name.as_deref(),
                &config.output_extension,
            ),
            selection: request.selection.clone(),
            state: DownloadState::Idle,
            temp_dir: Some(temp_dir),
            temp_files: Vec::new(),
        })
    }

    /// Reserve a temp path for `role`. Nothing is created on disk.
    pub fn allocate(&mut self, role: ResourceKind, extension: &str) -> Result<PathBuf, DownloadError> {
        let dir = self
            .temp_dir
            .as_ref()
            .ok_or_else(|| DownloadError::Io(std::io::Error::other("download session already cleaned up")))?;
        let path = dir.path().join(format!("{}.{}", role, extension));
        self.temp_files.push(TempFile {
            role,
            path: path.clone(),
        });
        Ok(path)
    }

    pub fn temp_files(&self) -> &[TempFile] {
        &self.temp_files
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_name)
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Move to `next` and report it. Once done or failed the state is final.
    pub fn advance(&mut self, next: DownloadState, emitter: &ProgressEmitter) {
        if self.state.is_terminal() {
            tracing::warn!("[download] ignoring {:?} after {:?}", next, self.state);
            return;
        }
        tracing::debug!("[download] state {:?} -> {:?}", self.state, next);
        self.state = next;
        emitter.status(next.to_string());
    }

    /// Remove every temp file and the private directory. Safe to call twice.
    pub fn cleanup(&mut self) {
        for file in &self.temp_files {
            match std::fs::remove_file(&file.path) {
                Ok(()) => tracing::debug!("[cleanup] removed {}", file.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("[cleanup] could not remove {}: {}", file.path.display(), e),
            }
        }
        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("[cleanup] could not remove {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub struct DownloadOrchestrator {
    fetcher: Arc<dyn MediaFetcher>,
    muxer: Arc<dyn MuxRunner>,
    config: DownloadConfig,
    ffmpeg: String,
}

impl DownloadOrchestrator {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        muxer: Arc<dyn MuxRunner>,
        config: DownloadConfig,
        ffmpeg: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            muxer,
            config,
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Run one download to completion and return the output file path
    pub async fn run(
        &self,
        request: DownloadRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let mut session = DownloadSession::new(&request, &self.config)?;
        tracing::info!(
            "[download] {} -> {}",
            session.source_url,
            session.output_path().display()
        );

        let result = tokio::select! {
            r = self.execute(&mut session, emitter) => r,
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        };

        session.cleanup();

        match &result {
            Ok(path) => {
                tracing::info!("[download] finished {}", path.display());
                session.advance(DownloadState::Done, emitter);
            }
            Err(e) => {
                tracing::error!("[download] failed: {}", e);
                session.advance(DownloadState::Failed, emitter);
            }
        }
        result
    }

    async fn execute(
        &self,
        session: &mut DownloadSession,
        emitter: &ProgressEmitter,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(&session.output_dir).await?;

        let selection = session.selection.clone();
        let video = selection.video();
        let video_path = session.allocate(video.kind, video.temp_extension())?;
        let audio = selection
            .audio()
            .map(|a| session.allocate(a.kind, a.temp_extension()).map(|p| (a, p)))
            .transpose()?;
        let subtitle = selection
            .subtitle()
            .map(|s| session.allocate(s.kind, s.temp_extension()).map(|p| (s, p)))
            .transpose()?;

        let (audio_ok, subtitle_ok) = match self.config.fetch_mode {
            FetchMode::Sequential => {
                session.advance(DownloadState::fetching(video.kind), emitter);
                self.fetch_video(video, &video_path, emitter).await?;

                let audio_ok = match &audio {
                    Some((res, path)) => {
                        session.advance(DownloadState::fetching(res.kind), emitter);
                        self.fetch_optional(res, path, emitter).await
                    }
                    None => false,
                };
                let subtitle_ok = match &subtitle {
                    Some((res, path)) => {
                        session.advance(DownloadState::fetching(res.kind), emitter);
                        self.fetch_optional(res, path, emitter).await
                    }
                    None => false,
                };
                (audio_ok, subtitle_ok)
            }
            FetchMode::Concurrent => {
                session.advance(DownloadState::FetchingVideo, emitter);
                if audio.is_some() {
                    session.advance(DownloadState::FetchingAudio, emitter);
                }
                if subtitle.is_some() {
                    session.advance(DownloadState::FetchingSubtitle, emitter);
                }

                let audio_fut: OptionFuture<_> = audio
                    .as_ref()
                    .map(|(res, path)| self.fetch_optional(res, path, emitter))
                    .into();
                let subtitle_fut: OptionFuture<_> = subtitle
                    .as_ref()
                    .map(|(res, path)| self.fetch_optional(res, path, emitter))
                    .into();

                let (video_res, audio_ok, subtitle_ok) = futures::join!(
                    self.fetch_video(video, &video_path, emitter),
                    audio_fut,
                    subtitle_fut
                );
                video_res?;
                (audio_ok.unwrap_or(false), subtitle_ok.unwrap_or(false))
            }
        };

        let inputs = RemuxInputs {
            video: video_path,
            audio: audio.filter(|_| audio_ok).map(|(_, p)| p),
            subtitle: subtitle.filter(|_| subtitle_ok).map(|(_, p)| p),
        };

        session.advance(DownloadState::Remuxing, emitter);
        let output = session.output_path();
        let command = build_remux_command(&self.ffmpeg, &inputs, &output, &RemuxPolicy::from(&self.config));
        tracing::debug!("[remux] {}", command);

        let result = self.muxer.run(&command).await?;
        if !result.success() {
            return Err(DownloadError::Mux {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(output)
    }

    async fn fetch(
        &self,
        resource: &MediaResource,
        path: &Path,
        emitter: &ProgressEmitter,
    ) -> Result<(), DownloadError> {
        let role = resource.kind;
        let progress = emitter.clone();
        let mut on_progress = move |done: u64, total: u64| progress.progress(role, done, total);

        tracing::debug!("[fetch] {} {} -> {}", role, resource.url, path.display());
        self.fetcher.fetch(&resource.url, path, &mut on_progress).await
    }

    async fn fetch_video(
        &self,
        resource: &MediaResource,
        path: &Path,
        emitter: &ProgressEmitter,
    ) -> Result<(), DownloadError> {
        self.fetch(resource, path, emitter)
            .await
            .map_err(|e| DownloadError::VideoFetch {
                url: resource.url.clone(),
                cause: e.to_string(),
            })
    }

    /// Audio and subtitle failures only drop that input
    async fn fetch_optional(&self, resource: &MediaResource, path: &Path, emitter: &ProgressEmitter) -> bool {
        match self.fetch(resource, path, emitter).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[fetch] {} download failed, continuing without it: {}", resource.kind, e);
                emitter.status(format!(
                    "Could not download {} ({}), continuing without it",
                    resource.kind, e
                ));
                false
            }
        }
    }
}
