// ResourceClassifier - maps a captured response URL to a media resource
//
// Works on the raw URL string. Every lookup below is a table scanned in
// order, first match wins, so the result never depends on hash ordering.
// Kind priority when several patterns match: video, audio, subtitle.

use super::models::{MediaResource, ResourceKind};

/// Path markers for video streams (percent-encoded storage paths and their
/// decoded form)
pub const VIDEO_PATH_MARKERS: &[&str] = &["video%2F", "video/"];

/// Path markers for audio streams
pub const AUDIO_PATH_MARKERS: &[&str] = &["audio%2F", "audio/"];

/// Container extension shared by video and audio streams
pub const MEDIA_EXTENSION: &str = ".mp4";

pub const SUBTITLE_EXTENSIONS: &[&str] = &[".vtt", ".srt"];

pub const VIDEO_MIME_TYPE: &str = "video/mp4";

pub const UNKNOWN: &str = "Unknown";

/// Quality tokens, highest first
pub const QUALITY_TOKENS: &[(&str, &str)] = &[
    ("1080p", "1080p"),
    ("720p", "720p"),
    ("480p", "480p"),
];

/// Language tokens; the short "es" comes after the longer ones
pub const LANGUAGE_TOKENS: &[(&str, &str)] = &[
    ("eng", "English"),
    ("spa", "Spanish"),
    ("es", "Spanish"),
];

pub const BITRATE_TOKENS: &[(&str, &str)] = &[("192k", "192k"), ("128k", "128k")];

/// First label whose token occurs in `url`
fn lookup(url: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    table
        .iter()
        .find(|(token, _)| url.contains(token))
        .map(|(_, label)| *label)
}

fn has_marker(url: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| url.contains(m))
}

pub fn video_quality(url: &str) -> &'static str {
    lookup(url, QUALITY_TOKENS).unwrap_or(UNKNOWN)
}

pub fn language(url: &str) -> &'static str {
    lookup(url, LANGUAGE_TOKENS).unwrap_or(UNKNOWN)
}

pub fn bitrate(url: &str) -> &'static str {
    lookup(url, BITRATE_TOKENS).unwrap_or(UNKNOWN)
}

/// Classify one response URL. Returns `None` for anything that is not a
/// video, audio or subtitle stream.
pub fn classify(url: &str) -> Option<MediaResource> {
    if has_marker(url, VIDEO_PATH_MARKERS) && url.ends_with(MEDIA_EXTENSION) {
        return Some(MediaResource {
            url: url.to_string(),
            kind: ResourceKind::Video,
            label: video_quality(url).to_string(),
            mime_type: Some(VIDEO_MIME_TYPE.to_string()),
        });
    }

    if has_marker(url, AUDIO_PATH_MARKERS) && url.ends_with(MEDIA_EXTENSION) {
        return Some(MediaResource {
            url: url.to_string(),
            kind: ResourceKind::Audio,
            label: format!("{} ({})", language(url), bitrate(url)),
            mime_type: None,
        });
    }

    if SUBTITLE_EXTENSIONS.iter().any(|ext| url.ends_with(ext)) {
        return Some(MediaResource {
            url: url.to_string(),
            kind: ResourceKind::Subtitle,
            label: language(url).to_string(),
            mime_type: None,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://storage.picta.cu/v0/b/picta/o/";

    #[test]
    fn test_unrelated_urls_do_not_match() {
        let urls = [
            "https://www.picta.cu/embed/some-video",
            "https://www.picta.cu/static/js/main.chunk.js",
            "https://www.picta.cu/assets/poster.jpg",
            "https://storage.picta.cu/o/video%2Fmovie.mp4?token=abc",
            "https://storage.picta.cu/o/thumbs%2Fmovie.mp4",
            "https://cdn.example.com/subs.vtt.gz",
            "",
        ];
        for url in urls {
            assert_eq!(classify(url), None, "unexpected match for {url}");
        }
    }

    #[test]
    fn test_video_quality_tokens() {
        let cases = [
            ("video%2Fclip_480p.mp4", "480p"),
            ("video%2Fclip_720p.mp4", "720p"),
            ("video%2Fclip_1080p.mp4", "1080p"),
            ("video%2Fclip_hd.mp4", "Unknown"),
        ];
        for (path, quality) in cases {
            let url = format!("{BASE}{path}");
            let res = classify(&url).expect("video should match");
            assert_eq!(res.kind, ResourceKind::Video);
            assert_eq!(res.label, quality);
            assert_eq!(res.mime_type.as_deref(), Some("video/mp4"));
        }
    }

    #[test]
    fn test_video_quality_always_from_known_set() {
        let allowed = ["480p", "720p", "1080p", "Unknown"];
        for path in ["video%2Fa.mp4", "video%2F720p-480p.mp4", "video/x_1080p.mp4"] {
            let url = format!("{BASE}{path}");
            let first = classify(&url).unwrap();
            assert!(allowed.contains(&first.label.as_str()));
            assert_eq!(classify(&url), Some(first));
        }
    }

    #[test]
    fn test_ambiguous_quality_prefers_first_table_entry() {
        let url = format!("{BASE}video%2Fsrc_480p_to_1080p.mp4");
        assert_eq!(classify(&url).unwrap().label, "1080p");
    }

    #[test]
    fn test_audio_language_and_bitrate() {
        let cases = [
            ("audio%2Ftrack_eng_128k.mp4", "English (128k)"),
            ("audio%2Ftrack_spa_192k.mp4", "Spanish (192k)"),
            ("audio%2Ftrack-es.mp4", "Spanish (Unknown)"),
            ("audio%2Ftrack_fra_64k.mp4", "Unknown (Unknown)"),
        ];
        for (path, label) in cases {
            let url = format!("{BASE}{path}");
            let res = classify(&url).expect("audio should match");
            assert_eq!(res.kind, ResourceKind::Audio);
            assert_eq!(res.label, label);
            assert_eq!(res.mime_type, None);
        }
    }

    #[test]
    fn test_subtitle_extensions() {
        let vtt = classify("https://cdn.picta.cu/subs/movie_eng.vtt").unwrap();
        assert_eq!(vtt.kind, ResourceKind::Subtitle);
        assert_eq!(vtt.label, "English");

        let srt = classify("https://cdn.picta.cu/subs/movie_spa.srt").unwrap();
        assert_eq!(srt.kind, ResourceKind::Subtitle);
        assert_eq!(srt.label, "Spanish");
    }

    #[test]
    fn test_video_marker_wins_over_audio_marker() {
        let url = format!("{BASE}video%2Faudio%2Fmixed_720p.mp4");
        assert_eq!(classify(&url).unwrap().kind, ResourceKind::Video);
    }

    #[test]
    fn test_decoded_markers_match() {
        let url = "https://storage.picta.cu/o/audio/track_eng_128k.mp4";
        assert_eq!(classify(url).unwrap().kind, ResourceKind::Audio);
    }
}
