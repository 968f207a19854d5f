// FormatSelector - turns a catalog into numbered options for the user
//
// Options are numbered from 1 in catalog order, so "option 2" always means
// the second stream seen in the page traffic. The recommended video is the
// highest known quality; with no known quality the first one wins.

use serde::{Deserialize, Serialize};

use super::models::{Catalog, MediaResource, ResourceKind};

/// Quality option for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityOption {
    /// 1-based number shown to the user
    pub number: usize,

    /// Display label (e.g., "720p", "Spanish (128k)")
    pub label: String,

    pub kind: ResourceKind,

    pub url: String,

    /// Height in pixels, video only
    pub height: Option<u32>,

    pub is_recommended: bool,
}

pub struct FormatSelector;

impl FormatSelector {
    pub fn video_options(catalog: &Catalog) -> Vec<QualityOption> {
        let recommended = Self::recommended_video(catalog);
        Self::numbered(&catalog.videos, |i| Some(i) == recommended)
    }

    pub fn audio_options(catalog: &Catalog) -> Vec<QualityOption> {
        Self::numbered(&catalog.audios, |_| false)
    }

    pub fn subtitle_options(catalog: &Catalog) -> Vec<QualityOption> {
        Self::numbered(&catalog.subtitles, |_| false)
    }

    /// Zero-based index of the highest-quality video
    pub fn recommended_video(catalog: &Catalog) -> Option<usize> {
        if catalog.videos.is_empty() {
            return None;
        }
        let best = catalog
            .videos
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Self::height(&v.label).map(|h| (i, h)))
            // max_by_key keeps the last maximum; reverse so the first wins
            .rev()
            .max_by_key(|&(_, h)| h)
            .map(|(i, _)| i);
        Some(best.unwrap_or(0))
    }

    /// Zero-based index of the video whose quality matches `quality`
    /// ("720p", "720", or "best")
    pub fn find_by_quality(catalog: &Catalog, quality: &str) -> Option<usize> {
        let wanted = quality.trim().to_lowercase();
        if wanted == "best" {
            return Self::recommended_video(catalog);
        }
        let wanted = wanted.trim_end_matches('p');
        catalog
            .videos
            .iter()
            .position(|v| v.label.to_lowercase().trim_end_matches('p') == wanted)
    }

    /// Parse "1080p" into 1080
    fn height(label: &str) -> Option<u32> {
        label.strip_suffix('p')?.parse().ok()
    }

    fn numbered(resources: &[MediaResource], recommended: impl Fn(usize) -> bool) -> Vec<QualityOption> {
        resources
            .iter()
            .enumerate()
            .map(|(i, r)| QualityOption {
                number: i + 1,
                label: r.label.clone(),
                kind: r.kind,
                url: r.url.clone(),
                height: match r.kind {
                    ResourceKind::Video => Self::height(&r.label),
                    _ => None,
                },
                is_recommended: recommended(i),
            })
            .collect()
    }
}
