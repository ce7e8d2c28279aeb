use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SubpipeError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-acodec").arg(codec)
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Execute the command and return its stdout.
    ///
    /// A binary that cannot be spawned and a non-zero exit are both reported
    /// as extraction errors; stderr is passed through verbatim.
    pub async fn execute(&self) -> Result<String> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    SubpipeError::Extraction(format!(
                        "'{}' not found; install ffmpeg and make sure it is on PATH",
                        self.binary_path
                    ))
                } else {
                    SubpipeError::Extraction(format!("Failed to execute {}: {}", self.binary_path, e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubpipeError::Extraction(format!(
                "{} failed ({}):\n{}",
                self.description, output.status, stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Target audio layout for speech recognition input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build audio extraction command.
    ///
    /// A `.wav` destination gets 16-bit little-endian PCM; other containers
    /// keep ffmpeg's default codec for that extension.
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P, spec: AudioSpec) -> MediaCommand {
        let lossless = audio_path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let mut cmd = MediaCommand::new(&self.binary_path, "Audio extraction")
            .input(&video_path)
            .no_video();
        if lossless {
            cmd = cmd.audio_codec("pcm_s16le");
        }
        cmd.audio_sample_rate(spec.sample_rate)
            .audio_channels(spec.channels)
            .overwrite()
            .output(audio_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_audio_arguments_for_wav() {
        let cmd = MediaCommandBuilder::new("ffmpeg").extract_audio("in.mp4", "out.wav", AudioSpec::default());
        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec!["-i", "in.mp4", "-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y", "out.wav"]
        );
    }

    #[test]
    fn test_extract_audio_arguments_for_lossy_container() {
        let cmd = MediaCommandBuilder::new("ffmpeg").extract_audio("in.mkv", "out.mp3", AudioSpec::default());
        assert!(!cmd.args.contains(&"pcm_s16le".to_string()));
        assert!(cmd.args.contains(&"-vn".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_extraction_error() {
        let cmd = MediaCommand::new("subpipe-no-such-binary", "Probe").arg("-version");
        let err = cmd.execute().await.unwrap_err();
        assert!(matches!(err, SubpipeError::Extraction(ref msg) if msg.contains("not found")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_surfaces_stderr() {
        let cmd = MediaCommand::new("sh", "Audio extraction")
            .arg("-c")
            .arg("echo 'moov atom not found' >&2; exit 1");
        let err = cmd.execute().await.unwrap_err();
        assert!(err.to_string().contains("moov atom not found"));
    }
}
