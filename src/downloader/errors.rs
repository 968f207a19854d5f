// Error types for discovery, download and remux

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Page URL is not a picta.cu media/embed page
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Browser could not load the page
    #[error("Navigation to {url} failed: {cause}")]
    Navigation { url: String, cause: String },

    /// Page loaded but no video stream showed up in its traffic
    #[error("No video sources found on {0}")]
    NoMediaFound(String),

    /// Transport error or non-success status while streaming a file
    #[error("Download of {url} failed: {cause}")]
    Fetch { url: String, cause: String },

    /// The mandatory video stream could not be downloaded
    #[error("Video download failed ({url}): {cause}")]
    VideoFetch { url: String, cause: String },

    /// ffmpeg ran but exited unsuccessfully
    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr}")]
    Mux {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// ffmpeg or chromedriver not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// WebDriver session or protocol failure
    #[error("Browser error: {0}")]
    Renderer(String),

    /// Selection does not match the catalog it was built from
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Another operation of the same kind is still running
    #[error("A {0} is already in progress")]
    Busy(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Short message for the terminal `Done` event
    pub fn summary(&self) -> String {
        match self {
            Self::Mux { exit_code, stderr } => {
                let tail = stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("")
                    .trim();
                format!("ffmpeg failed (exit code {:?}): {}", exit_code, tail)
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_summary_keeps_last_stderr_line() {
        let err = DownloadError::Mux {
            exit_code: Some(1),
            stderr: "ffmpeg version 6\nInput #0...\nvideo.mp4: Invalid data found\n\n".to_string(),
        };
        assert_eq!(
            err.summary(),
            "ffmpeg failed (exit code Some(1)): video.mp4: Invalid data found"
        );
    }
}
