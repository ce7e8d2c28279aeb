// whisper.cpp command-line backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{TranscriberConfig, WhisperModel};
use crate::error::{Result, SubpipeError};
use crate::segment::Segment;
use super::TranscriberTrait;
use super::common::{
    AbstractTranscription, TranscriptionMapper, probe_binary, read_json_output, run_transcriber_command,
};

// Structs for parsing whisper.cpp JSON output (`-oj`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub result: Option<WhisperCppResult>,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Millisecond offsets into the audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

/// Mapper for Whisper.cpp format to abstract format
pub struct WhisperCppMapper;

impl TranscriptionMapper<WhisperCppOutput> for WhisperCppMapper {
    fn to_abstract_transcription(whisper_output: WhisperCppOutput) -> Result<AbstractTranscription> {
        let segments = whisper_output
            .transcription
            .into_iter()
            .map(|seg| {
                let start = seg.offsets.from.max(0) as f64 / 1000.0;
                let end = seg.offsets.to.max(0) as f64 / 1000.0;
                Segment::normalized(start, end, &seg.text)
            })
            .collect();

        Ok(AbstractTranscription {
            segments,
            language: whisper_output.result.map(|r| r.language),
        })
    }
}

/// Whisper.cpp implementation
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
    model: WhisperModel,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig, model: WhisperModel) -> Self {
        Self { config, model }
    }

    /// Location of the ggml weights for the configured model size.
    pub fn model_path(&self) -> PathBuf {
        self.config
            .models_dir
            .join(format!("ggml-{}.bin", self.model.as_str()))
    }

    fn build_command(&self, audio_path: &Path, output_base: &Path, language: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-m").arg(self.model_path())
            .arg("-l").arg(language)
            .arg("-f").arg(audio_path)
            .arg("-tp").arg(self.config.temperature.to_string())
            .arg("-bs").arg(self.config.beam_size.to_string())
            .arg("-oj")
            .arg("-of").arg(output_base);
        cmd
    }
}

#[async_trait]
impl TranscriberTrait for WhisperCppTranscriber {
    async fn check_availability(&self) -> Result<()> {
        probe_binary(&self.config.binary_path).await?;

        let model_path = self.model_path();
        if !model_path.is_file() {
            return Err(SubpipeError::ModelLoad(format!(
                "whisper.cpp model not found: {}",
                model_path.display()
            )));
        }

        info!("whisper.cpp is available with model {}", model_path.display());
        Ok(())
    }

    async fn transcribe(&self, audio_path: &Path, language: &str) -> Result<AbstractTranscription> {
        debug!("Executing whisper.cpp transcription with model: {}", self.model);

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubpipeError::Transcription(format!("Failed to create temp directory: {}", e)))?;
        let output_base = temp_dir.path().join("transcript");

        let cmd = self.build_command(audio_path, &output_base, language);
        run_transcriber_command(cmd, &self.config.binary_path).await?;

        let output: WhisperCppOutput = read_json_output(&output_base.with_extension("json"))?;
        WhisperCppMapper::to_abstract_transcription(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapper_converts_offsets_to_seconds() {
        let output: WhisperCppOutput = serde_json::from_str(
            r#"{
                "result": {"language": "ja"},
                "transcription": [
                    {"timestamps": {"from": "00:00:00,000", "to": "00:00:01,200"}, "offsets": {"from": 0, "to": 1200}, "text": " あ"},
                    {"timestamps": {"from": "00:00:01,200", "to": "00:00:02,500"}, "offsets": {"from": 1200, "to": 2500}, "text": "い "}
                ]
            }"#,
        )
        .unwrap();

        let transcription = WhisperCppMapper::to_abstract_transcription(output).unwrap();
        assert_eq!(transcription.language.as_deref(), Some("ja"));
        assert_eq!(
            transcription.segments,
            vec![Segment::new(0.0, 1.2, "あ"), Segment::new(1.2, 2.5, "い")]
        );
    }

    #[test]
    fn test_model_path() {
        let config = TranscriberConfig {
            models_dir: PathBuf::from("/models"),
            ..TranscriberConfig::default()
        };
        let transcriber = WhisperCppTranscriber::new(config, WhisperModel::LargeV3);
        assert_eq!(transcriber.model_path(), PathBuf::from("/models/ggml-large-v3.bin"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_model_file_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TranscriberConfig {
            binary_path: "true".to_string(),
            models_dir: dir.path().to_path_buf(),
            ..TranscriberConfig::default()
        };
        let transcriber = WhisperCppTranscriber::new(config, WhisperModel::Tiny);

        let err = transcriber.check_availability().await.unwrap_err();
        assert!(matches!(err, SubpipeError::ModelLoad(ref msg) if msg.contains("ggml-tiny.bin")));
    }
}
