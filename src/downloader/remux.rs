// Remuxer - builds the ffmpeg argument list from the inputs that made it
//
// Video is always stream-copied. A separate audio track is transcoded and
// mapped explicitly (video from input 0, audio from input 1), because the
// video file may carry no audio of its own. Without a separate track the
// video's own audio is copied. Subtitles become an extra input converted to
// a codec the container accepts.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::DownloadConfig;

/// Temp files available for muxing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxInputs {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
    pub subtitle: Option<PathBuf>,
}

/// Codec choices for the non-copied streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxPolicy {
    pub audio_codec: String,
    pub subtitle_codec: String,
}

impl Default for RemuxPolicy {
    fn default() -> Self {
        Self {
            audio_codec: "aac".to_string(),
            subtitle_codec: "mov_text".to_string(),
        }
    }
}

impl From<&DownloadConfig> for RemuxPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            audio_codec: config.audio_codec.clone(),
            subtitle_codec: config.subtitle_codec.clone(),
        }
    }
}

/// A fully built external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for RemuxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

pub fn build_remux_command(
    program: &str,
    inputs: &RemuxInputs,
    output: &Path,
    policy: &RemuxPolicy,
) -> RemuxCommand {
    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-nostdin"]);

    push(&mut args, &["-i", &path_arg(&inputs.video)]);
    if let Some(audio) = &inputs.audio {
        push(&mut args, &["-i", &path_arg(audio)]);
    }
    if let Some(subtitle) = &inputs.subtitle {
        push(&mut args, &["-i", &path_arg(subtitle)]);
    }

    push(&mut args, &["-c:v", "copy"]);

    if inputs.audio.is_some() {
        push(
            &mut args,
            &["-c:a", &policy.audio_codec, "-map", "0:v", "-map", "1:a"],
        );
    } else {
        push(&mut args, &["-c:a", "copy"]);
        if inputs.subtitle.is_some() {
            // explicit subtitle mapping disables automatic stream selection
            push(&mut args, &["-map", "0:v", "-map", "0:a?"]);
        }
    }

    if inputs.subtitle.is_some() {
        let index = if inputs.audio.is_some() { 2 } else { 1 };
        push(
            &mut args,
            &["-c:s", &policy.subtitle_codec, "-map", &format!("{}:s", index)],
        );
    }

    push(&mut args, &["-y", &path_arg(output)]);

    RemuxCommand {
        program: program.to_string(),
        args,
    }
}
