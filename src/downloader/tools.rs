use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

use super::errors::DownloadError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    Ffmpeg,
    ChromeDriver,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::ChromeDriver => "chromedriver",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "-version", // ffmpeg has no --version
            ToolType::ChromeDriver => "--version",
        }
    }

    fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

#[derive(Debug, Default)]
pub struct ToolManager;

impl ToolManager {
    pub fn new() -> Self {
        Self
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let (path, version) = self.detect_tool(tool_type);

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::Ffmpeg),
            self.get_tool_info(ToolType::ChromeDriver),
        ]
    }

    /// Path to run for `tool_type`: the configured override when set,
    /// otherwise whatever detection finds.
    pub fn resolve(&self, tool_type: ToolType, configured: Option<&str>) -> Result<String, DownloadError> {
        if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
            // a bare name is left to PATH lookup at spawn time
            let looks_like_path = path.contains('/') || path.contains('\\');
            if looks_like_path && !Path::new(path).exists() {
                return Err(DownloadError::ToolNotFound(format!(
                    "{} (configured path {} does not exist)",
                    tool_type.as_str(),
                    path
                )));
            }
            return Ok(path.to_string());
        }

        match self.detect_tool(tool_type) {
            (Some(path), version) => {
                tracing::debug!(
                    "[tools] {} at {} ({})",
                    tool_type.as_str(),
                    path,
                    version.as_deref().unwrap_or("unknown version")
                );
                Ok(path)
            }
            (None, _) => Err(DownloadError::ToolNotFound(tool_type.as_str().to_string())),
        }
    }

    fn detect_tool(&self, tool_type: ToolType) -> (Option<String>, Option<String>) {
        let binary_name = tool_type.binary_name();

        // 1. Try common paths first
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
            format!("/usr/lib/chromium/{}", binary_name),
            format!("/snap/bin/{}", binary_name),
        ];

        for path in common_paths {
            if Path::new(&path).exists() {
                let version = self.get_version(&path, tool_type);
                return (Some(path), version);
            }
        }

        // 2. Try PATH
        if let Ok(output) = Command::new("which").arg(&binary_name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    let version = self.get_version(&path, tool_type);
                    return (Some(path), version);
                }
            }
        }

        (None, None)
    }

    fn get_version(&self, path: &str, tool_type: ToolType) -> Option<String> {
        match Command::new(path).arg(tool_type.version_arg()).output() {
            Ok(output) if output.status.success() => {
                first_line(&String::from_utf8_lossy(&output.stdout))
            }
            _ => None,
        }
    }
}

/// Both tools print a banner; only its first line is the version
fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
