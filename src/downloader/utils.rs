// Helper functions shared by the observer, orchestrator and backends

use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};
use url::Url;

use crate::config::SiteConfig;
use crate::downloader::errors::DownloadError;

lazy_static::lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^\w\-_\. ]").unwrap();
}

/// Run command with timeout (shared utility).
///
/// The child is killed when the returned future is dropped, so cancelling
/// the caller also stops the process.
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DownloadError::ToolNotFound(program.to_string()),
            _ => DownloadError::Io(e),
        })?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::Io(std::io::Error::other(format!(
            "Failed to capture stdout from {}",
            program
        )))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::Io(std::io::Error::other(format!(
            "Failed to capture stderr from {}",
            program
        )))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = join_pipe(stdout_task).await?;
            let stderr = join_pipe(stderr_task).await?;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout {
                what: program.to_string(),
                secs: timeout_secs,
            })
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::Io(std::io::Error::other(e)))?
        .map_err(DownloadError::Io)
}

/// Check that `raw` is a page on the configured site under one of the two
/// accepted path prefixes. No network access.
pub fn validate_page_url(raw: &str, site: &SiteConfig) -> Result<Url, DownloadError> {
    let trimmed = raw.trim();
    let invalid = || {
        DownloadError::InvalidUrl(format!(
            "{} (expected https://{}{}... or https://{}{}...)",
            trimmed, site.host, site.page_prefix, site.host, site.embed_prefix
        ))
    };

    let url = Url::parse(trimmed).map_err(|_| invalid())?;
    if url.scheme() != "https" || url.host_str() != Some(site.host.as_str()) {
        return Err(invalid());
    }

    let path = url.path();
    let has_id = [&site.page_prefix, &site.embed_prefix]
        .iter()
        .any(|prefix| path.len() > prefix.len() && path.starts_with(prefix.as_str()));
    if !has_id {
        return Err(invalid());
    }

    Ok(url)
}

/// Rewrite a media page URL to its player-embed form. Returns the new URL
/// and whether anything changed.
pub fn to_embed_url(url: &Url, site: &SiteConfig) -> (String, bool) {
    match url.path().strip_prefix(site.page_prefix.as_str()) {
        Some(rest) => {
            let mut embed = url.clone();
            embed.set_path(&format!("{}{}", site.embed_prefix, rest));
            (embed.to_string(), true)
        }
        None => (url.to_string(), false),
    }
}

/// Replace anything outside word chars, hyphen, underscore, dot and space
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(name, "_").into_owned()
}

/// Final file name for a download: the custom name when given, otherwise
/// the page title.
pub fn output_file_name(title: &str, custom_name: Option<&str>, extension: &str) -> String {
    let suffix = format!(".{}", extension);

    if let Some(custom) = custom_name.map(str::trim).filter(|c| !c.is_empty()) {
        let safe = sanitize_filename(custom);
        if safe.to_lowercase().ends_with(&suffix.to_lowercase()) {
            return safe;
        }
        return format!("{}{}", safe, suffix);
    }

    let safe_title = sanitize_filename(title.trim());
    if safe_title.trim().is_empty() {
        return format!("video{}", suffix);
    }
    format!("{}{}", safe_title, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        SiteConfig::default()
    }

    #[test]
    fn test_accepts_media_and_embed_pages() {
        assert!(validate_page_url("https://www.picta.cu/medias/some-movie-2024", &site()).is_ok());
        assert!(validate_page_url("  https://www.picta.cu/embed/abc  ", &site()).is_ok());
    }

    #[test]
    fn test_rejects_other_urls() {
        let bad = [
            "",
            "not a url",
            "http://www.picta.cu/medias/x",
            "https://picta.cu/medias/x",
            "https://www.picta.cu/medias/",
            "https://www.picta.cu/canales/x",
            "https://evil.example/www.picta.cu/medias/x",
        ];
        for url in bad {
            let err = validate_page_url(url, &site()).unwrap_err();
            assert!(matches!(err, DownloadError::InvalidUrl(_)), "{url}");
        }
    }

    #[test]
    fn test_media_page_rewritten_to_embed() {
        let url = validate_page_url("https://www.picta.cu/medias/movie-x?t=5", &site()).unwrap();
        let (embed, changed) = to_embed_url(&url, &site());
        assert!(changed);
        assert_eq!(embed, "https://www.picta.cu/embed/movie-x?t=5");
    }

    #[test]
    fn test_embed_page_unchanged() {
        let url = validate_page_url("https://www.picta.cu/embed/movie-x", &site()).unwrap();
        let (embed, changed) = to_embed_url(&url, &site());
        assert!(!changed);
        assert_eq!(embed, "https://www.picta.cu/embed/movie-x");
    }

    #[test]
    fn test_custom_name_sanitized_and_extended() {
        let name = output_file_name("ignored", Some("Título: Épico / 2024?"), "mp4");
        assert_eq!(name, "Título_ Épico _ 2024_.mp4");

        let stem = name.strip_suffix(".mp4").unwrap();
        assert!(stem
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')));
    }

    #[test]
    fn test_custom_name_keeps_existing_extension() {
        assert_eq!(output_file_name("t", Some("clip.MP4"), "mp4"), "clip.MP4");
        assert_eq!(output_file_name("t", Some("  clip  "), "mp4"), "clip.mp4");
    }

    #[test]
    fn test_title_used_when_custom_blank() {
        assert_eq!(output_file_name("Mi video: parte 1", Some("   "), "mp4"), "Mi video_ parte 1.mp4");
        assert_eq!(output_file_name("Mi video", None, "mp4"), "Mi video.mp4");
        assert_eq!(output_file_name("   ", None, "mp4"), "video.mp4");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let err = run_output_with_timeout("definitely-not-a-real-binary-x9", &[], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
