use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Result, SubpipeError};
use super::{AudioSpec, MediaCommandBuilder, MediaProcessorTrait};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }

    fn audio_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    /// Extract audio from video
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        if !video_path.exists() {
            return Err(SubpipeError::InputNotFound(video_path.to_path_buf()));
        }

        let command = self.command_builder.extract_audio(video_path, audio_path, self.audio_spec());
        command.execute().await?;

        if !audio_path.is_file() {
            return Err(SubpipeError::Extraction(format!(
                "{} exited successfully but produced no file at {}",
                self.config.binary_path,
                audio_path.display()
            )));
        }

        info!("Audio extraction completed");
        Ok(())
    }

    /// Check if media processor is available
    async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await?;
        info!("Media processor is available");
        Ok(())
    }

    /// Get media processor version information
    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let stdout = self.command_builder.version_check().execute().await?;
        // The first line typically contains the version
        let first_line = stdout.lines().next().unwrap_or("Unknown version");
        Ok(first_line.to_string())
    }
}
