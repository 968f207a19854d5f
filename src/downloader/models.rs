// Common data models for discovery and download

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;

/// Kind of a discovered stream; doubles as the role of a temp file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Audio,
    Subtitle,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A media stream seen in the page's network traffic.
///
/// Two resources are the same resource when all four fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaResource {
    pub url: String,
    pub kind: ResourceKind,
    /// Quality for video ("720p"), "Language (bitrate)" for audio,
    /// language for subtitles
    pub label: String,
    /// Only set for video
    pub mime_type: Option<String>,
}

impl MediaResource {
    /// Extension to give the temp file holding this resource
    pub fn temp_extension(&self) -> &'static str {
        match self.kind {
            ResourceKind::Video => "mp4",
            ResourceKind::Audio => "m4a",
            ResourceKind::Subtitle => {
                if self.url.ends_with(".srt") {
                    "srt"
                } else {
                    "vtt"
                }
            }
        }
    }
}

/// Deduplicated result of one discovery call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub source_url: String,
    pub title: String,
    pub videos: Vec<MediaResource>,
    pub audios: Vec<MediaResource>,
    pub subtitles: Vec<MediaResource>,
}

impl Catalog {
    pub fn resources(&self, kind: ResourceKind) -> &[MediaResource] {
        match kind {
            ResourceKind::Video => &self.videos,
            ResourceKind::Audio => &self.audios,
            ResourceKind::Subtitle => &self.subtitles,
        }
    }

    pub fn contains(&self, resource: &MediaResource) -> bool {
        self.resources(resource.kind).contains(resource)
    }

    /// Build a selection from zero-based indices into the catalog lists
    pub fn select(
        &self,
        video: usize,
        audio: Option<usize>,
        subtitle: Option<usize>,
    ) -> Result<Selection, DownloadError> {
        let pick = |kind: ResourceKind, index: usize| {
            self.resources(kind).get(index).ok_or_else(|| {
                DownloadError::InvalidSelection(format!(
                    "{} option {} does not exist ({} available)",
                    kind,
                    index + 1,
                    self.resources(kind).len()
                ))
            })
        };

        let video = pick(ResourceKind::Video, video)?;
        let audio = audio.map(|i| pick(ResourceKind::Audio, i)).transpose()?;
        let subtitle = subtitle
            .map(|i| pick(ResourceKind::Subtitle, i))
            .transpose()?;

        Selection::new(self, video, audio, subtitle)
    }
}

/// Accumulates classified resources, dropping duplicates while keeping
/// first-seen order
#[derive(Debug)]
pub struct CatalogBuilder {
    source_url: String,
    title: String,
    seen: HashSet<MediaResource>,
    videos: Vec<MediaResource>,
    audios: Vec<MediaResource>,
    subtitles: Vec<MediaResource>,
}

impl CatalogBuilder {
    pub fn new(source_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
            seen: HashSet::new(),
            videos: Vec::new(),
            audios: Vec::new(),
            subtitles: Vec::new(),
        }
    }

    /// Returns false when the resource was already present
    pub fn insert(&mut self, resource: MediaResource) -> bool {
        if !self.seen.insert(resource.clone()) {
            return false;
        }
        match resource.kind {
            ResourceKind::Video => self.videos.push(resource),
            ResourceKind::Audio => self.audios.push(resource),
            ResourceKind::Subtitle => self.subtitles.push(resource),
        }
        true
    }

    pub fn build(self) -> Catalog {
        Catalog {
            source_url: self.source_url,
            title: self.title,
            videos: self.videos,
            audios: self.audios,
            subtitles: self.subtitles,
        }
    }
}

/// User's choice of streams, validated against a catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    video: MediaResource,
    audio: Option<MediaResource>,
    subtitle: Option<MediaResource>,
}

impl Selection {
    pub fn new(
        catalog: &Catalog,
        video: &MediaResource,
        audio: Option<&MediaResource>,
        subtitle: Option<&MediaResource>,
    ) -> Result<Self, DownloadError> {
        let check = |expected: ResourceKind, resource: &MediaResource| {
            if resource.kind != expected {
                return Err(DownloadError::InvalidSelection(format!(
                    "expected a {} stream, got {}",
                    expected, resource.kind
                )));
            }
            if !catalog.contains(resource) {
                return Err(DownloadError::InvalidSelection(format!(
                    "{} stream {} is not part of the catalog",
                    resource.kind, resource.url
                )));
            }
            Ok(())
        };

        check(ResourceKind::Video, video)?;
        if let Some(a) = audio {
            check(ResourceKind::Audio, a)?;
        }
        if let Some(s) = subtitle {
            check(ResourceKind::Subtitle, s)?;
        }

        Ok(Self {
            video: video.clone(),
            audio: audio.cloned(),
            subtitle: subtitle.cloned(),
        })
    }

    pub fn video(&self) -> &MediaResource {
        &self.video
    }

    pub fn audio(&self) -> Option<&MediaResource> {
        self.audio.as_ref()
    }

    pub fn subtitle(&self) -> Option<&MediaResource> {
        self.subtitle.as_ref()
    }

    /// Every selected resource, video first
    pub fn resources(&self) -> impl Iterator<Item = &MediaResource> {
        std::iter::once(&self.video)
            .chain(self.audio.as_ref())
            .chain(self.subtitle.as_ref())
    }

    pub fn is_within(&self, catalog: &Catalog) -> bool {
        self.resources().all(|r| catalog.contains(r))
    }
}

/// Download progress for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub role: ResourceKind,
    pub bytes_downloaded: u64,
    /// 0 when the server sent no Content-Length
    pub bytes_total: u64,
}

impl ProgressEvent {
    pub fn fraction(&self) -> Option<f32> {
        if self.bytes_total == 0 {
            return None;
        }
        Some((self.bytes_downloaded as f64 / self.bytes_total as f64).min(1.0) as f32)
    }
}

/// States of one download run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Idle,
    FetchingVideo,
    FetchingAudio,
    FetchingSubtitle,
    Remuxing,
    Done,
    Failed,
}

impl DownloadState {
    pub fn fetching(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Video => Self::FetchingVideo,
            ResourceKind::Audio => Self::FetchingAudio,
            ResourceKind::Subtitle => Self::FetchingSubtitle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::FetchingVideo => "Downloading video...",
            Self::FetchingAudio => "Downloading audio...",
            Self::FetchingSubtitle => "Downloading subtitles...",
            Self::Remuxing => "Combining files...",
            Self::Done => "Download complete!",
            Self::Failed => "Download failed",
        };
        f.write_str(s)
    }
}

/// Everything the UI/CLI receives from a running operation
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(String),
    Progress(ProgressEvent),
    CatalogReady(Catalog),
    DiscoveryFailed(String),
    /// Terminal event of a download: output path on success, reason otherwise
    Done { success: bool, detail: String },
}

/// Input of one orchestrator run
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: String,
    pub title: String,
    pub selection: Selection,
    pub output_dir: PathBuf,
    pub custom_name: Option<String>,
}
