use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SubpipeError};
use crate::subtitle::SubtitleFormat;

/// Name of the configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "subpipe.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media: MediaConfig,
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Container extension for the extracted audio (wav gets 16-bit PCM)
    pub audio_format: String,
    pub sample_rate: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub backend: TranscriberBackend,
    /// Path to the transcriber binary (`whisper` or `whisper-cli`)
    pub binary_path: String,
    pub model: WhisperModel,
    /// Spoken language of the input media
    pub language: String,
    /// Directory holding ggml model files for whisper.cpp
    pub models_dir: PathBuf,
    pub temperature: f32,
    pub beam_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriberBackend {
    /// OpenAI Whisper Python command-line tool
    OpenaiWhisper,
    /// whisper.cpp command-line tool
    WhisperCpp,
}

/// Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WhisperModel {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    LargeV2,
    LargeV3,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::LargeV2 => "large-v2",
            Self::LargeV3 => "large-v3",
        }
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    pub source_language: String,
    pub target_language: String,
    /// Segments per translation request
    pub batch_size: usize,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Pass source text through instead of failing when translation fails
    pub fallback_to_original: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory for logs and per-run temporary workspaces
    pub state_dir: PathBuf,
    pub format: SubtitleFormat,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            audio_format: "wav".to_string(),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            backend: TranscriberBackend::OpenaiWhisper,
            binary_path: "whisper".to_string(),
            model: WhisperModel::LargeV3,
            language: "ja".to_string(),
            models_dir: PathBuf::from(".subpipe/models"),
            temperature: 0.0,
            beam_size: 5,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            source_language: "ja".to_string(),
            target_language: "ko".to_string(),
            batch_size: 16,
            max_retries: 3,
            timeout_secs: 300,
            fallback_to_original: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".subpipe"),
            format: SubtitleFormat::Srt,
        }
    }
}

impl PipelineConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.state_dir.join("tmp")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("log")
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubpipeError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubpipeError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubpipeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubpipeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load `path` if given, else `subpipe.toml` from the working directory, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }
}

/// Settings for one pipeline invocation. Built once from CLI + config, then read-only.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: SubtitleFormat,
    pub transcription_model: WhisperModel,
    pub translation_model: String,
    pub source_language: String,
    pub target_language: String,
    pub batch_size: usize,
    pub fallback_to_original: bool,
    pub keep_audio: bool,
}

impl RunSettings {
    /// Default output path: the input's stem with the subtitle extension, next to the input.
    pub fn default_output(input: &Path, format: SubtitleFormat) -> PathBuf {
        input.with_extension(format.extension())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input.exists() {
            return Err(SubpipeError::InputNotFound(self.input.clone()));
        }
        if self.batch_size == 0 {
            return Err(SubpipeError::Config("batch size must be at least 1".to_string()));
        }
        if self.translation_model.trim().is_empty() {
            return Err(SubpipeError::Config("translation model must not be empty".to_string()));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(SubpipeError::Config("language codes must not be empty".to_string()));
        }
        if self.output == self.input {
            return Err(SubpipeError::Config(format!(
                "output path {} would overwrite the input",
                self.output.display()
            )));
        }
        Ok(())
    }
}
