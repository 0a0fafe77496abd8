use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// External tool that muxes one video and one audio input into `output`
/// without re-encoding.
pub trait MergeTool: Send + Sync {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// `ffmpeg -loglevel error -y -i <video> -i <audio> -c copy <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegMerge {
    bin: PathBuf,
}

impl FfmpegMerge {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-i".to_string(),
            audio.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ]
    }
}

impl MergeTool for FfmpegMerge {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let out = Command::new(&self.bin)
            .args(Self::args(video, audio, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("spawn merge tool {}", self.bin.display()))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "merge tool exited with {}: {}",
                out.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}
