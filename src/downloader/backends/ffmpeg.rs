// ffmpeg mux runner

use async_trait::async_trait;

use crate::downloader::errors::DownloadError;
use crate::downloader::remux::RemuxCommand;
use crate::downloader::traits::{MuxOutput, MuxRunner};
use crate::downloader::utils::run_output_with_timeout;

pub struct FfmpegRunner {
    timeout_secs: u64,
}

impl FfmpegRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl MuxRunner for FfmpegRunner {
    async fn run(&self, command: &RemuxCommand) -> Result<MuxOutput, DownloadError> {
        tracing::info!("[ffmpeg] {}", command);
        let output = run_output_with_timeout(&command.program, &command.args, self.timeout_secs).await?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();
        if !output.status.success() {
            tracing::warn!("[ffmpeg] exited with {:?}", exit_code);
            tracing::debug!("[ffmpeg] stderr:\n{}", stderr);
        }

        Ok(MuxOutput { exit_code, stderr })
    }
}
