// OpenAI Whisper Python command-line backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{TranscriberConfig, WhisperModel};
use crate::error::{Result, SubpipeError};
use crate::segment::Segment;
use super::TranscriberTrait;
use super::common::{
    AbstractTranscription, TranscriptionMapper, probe_binary, read_json_output, run_transcriber_command,
};

/// OpenAI Whisper specific JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperOutput {
    pub text: String,
    pub segments: Vec<OpenAIWhisperSegment>,
    pub language: Option<String>,
}

/// OpenAI Whisper specific segment format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperSegment {
    pub id: Option<u64>,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub avg_logprob: Option<f64>,
    pub no_speech_prob: Option<f64>,
}

/// Mapper for OpenAI Whisper format to abstract format
pub struct OpenAIWhisperMapper;

impl TranscriptionMapper<OpenAIWhisperOutput> for OpenAIWhisperMapper {
    fn to_abstract_transcription(whisper_output: OpenAIWhisperOutput) -> Result<AbstractTranscription> {
        let segments = whisper_output
            .segments
            .into_iter()
            .map(|seg| Segment::normalized(seg.start, seg.end, &seg.text))
            .collect();

        Ok(AbstractTranscription {
            segments,
            language: whisper_output.language,
        })
    }
}

/// OpenAI Whisper implementation
pub struct OpenAITranscriber {
    config: TranscriberConfig,
    model: WhisperModel,
}

impl OpenAITranscriber {
    pub fn new(config: TranscriberConfig, model: WhisperModel) -> Self {
        Self { config, model }
    }

    fn build_command(&self, audio_path: &Path, output_dir: &Path, language: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model").arg(self.model.as_str())
            .arg("--language").arg(language)
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("json")
            .arg("--temperature").arg(self.config.temperature.to_string())
            .arg("--beam_size").arg(self.config.beam_size.to_string())
            .arg("--verbose").arg("False");
        cmd
    }
}

#[async_trait]
impl TranscriberTrait for OpenAITranscriber {
    async fn check_availability(&self) -> Result<()> {
        probe_binary(&self.config.binary_path).await?;
        info!("OpenAI Whisper command-line tool is available");
        Ok(())
    }

    async fn transcribe(&self, audio_path: &Path, language: &str) -> Result<AbstractTranscription> {
        debug!("Executing OpenAI Whisper transcription with model: {}", self.model);

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubpipeError::Transcription(format!("Failed to create temp directory: {}", e)))?;
        let output_dir = temp_dir.path();

        let cmd = self.build_command(audio_path, output_dir, language);
        run_transcriber_command(cmd, &self.config.binary_path).await?;

        // whisper names its output after the audio file stem
        let audio_stem = audio_path
            .file_stem()
            .ok_or_else(|| SubpipeError::Transcription("Invalid audio filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", audio_stem.to_string_lossy()));

        let output: OpenAIWhisperOutput = read_json_output(&json_file)?;
        OpenAIWhisperMapper::to_abstract_transcription(output)
    }
}
