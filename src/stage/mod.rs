// Isolated inference stages
//
// - Runner: starts a stage in a child process and waits for it
// - Worker: the code that runs inside that child
//
// The controller and a worker share nothing but the interchange store and
// the worker's exit code.

pub mod runner;
pub mod worker;

use async_trait::async_trait;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use runner::SubprocessRunner;
use crate::config::{RunSettings, TranslateConfig};
use crate::error::{Result, SubpipeError};
use crate::store::{InterchangeStore, SnapshotKey};

/// Which inference stage a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Transcription,
    Translation,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Translation => "translation",
        }
    }

    /// Snapshot this stage publishes on success.
    pub fn output_key(&self) -> SnapshotKey {
        match self {
            Self::Transcription => SnapshotKey::Transcription,
            Self::Translation => SnapshotKey::Translation,
        }
    }

    /// The stage's own error variant.
    pub fn failure<S: Into<String>>(&self, message: S) -> SubpipeError {
        match self {
            Self::Transcription => SubpipeError::Transcription(message.into()),
            Self::Translation => SubpipeError::Translation(message.into()),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model and language parameters handed to a worker on its command line.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct StageParams {
    /// Model identifier (whisper size or translation model id)
    #[arg(long)]
    pub model: String,

    #[arg(long)]
    pub source_language: String,

    #[arg(long)]
    pub target_language: String,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Keep source text when translation fails
    #[arg(long = "allow-untranslated")]
    pub fallback_to_original: bool,
}

impl StageParams {
    pub fn for_stage(kind: StageKind, settings: &RunSettings) -> Self {
        let model = match kind {
            StageKind::Transcription => settings.transcription_model.as_str().to_string(),
            StageKind::Translation => settings.translation_model.clone(),
        };

        Self {
            model,
            source_language: settings.source_language.clone(),
            target_language: settings.target_language.clone(),
            batch_size: settings.batch_size,
            fallback_to_original: settings.fallback_to_original,
        }
    }

    /// Render back into the flags `StageParams` parses from.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model.clone(),
            "--source-language".to_string(),
            self.source_language.clone(),
            "--target-language".to_string(),
            self.target_language.clone(),
            "--batch-size".to_string(),
            self.batch_size.to_string(),
        ];
        if self.fallback_to_original {
            args.push("--allow-untranslated".to_string());
        }
        args
    }

    /// Translator configuration for this run, layered over the file configuration.
    pub fn translate_config(&self, base: &TranslateConfig) -> TranslateConfig {
        TranslateConfig {
            model: self.model.clone(),
            source_language: self.source_language.clone(),
            target_language: self.target_language.clone(),
            batch_size: self.batch_size,
            fallback_to_original: self.fallback_to_original,
            ..base.clone()
        }
    }
}

/// What a stage reads.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    Audio(PathBuf),
    Snapshot(SnapshotKey),
}

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub kind: StageKind,
    pub store: InterchangeStore,
    pub input: StageInput,
    pub params: StageParams,
}

impl StageRequest {
    pub fn transcription(store: InterchangeStore, audio: PathBuf, params: StageParams) -> Self {
        Self {
            kind: StageKind::Transcription,
            store,
            input: StageInput::Audio(audio),
            params,
        }
    }

    pub fn translation(store: InterchangeStore, params: StageParams) -> Self {
        Self {
            kind: StageKind::Translation,
            store,
            input: StageInput::Snapshot(SnapshotKey::Transcription),
            params,
        }
    }

    /// Rebuild a request from worker command-line arguments.
    pub fn from_parts(
        kind: StageKind,
        store: InterchangeStore,
        audio: Option<PathBuf>,
        params: StageParams,
    ) -> Result<Self> {
        match (kind, audio) {
            (StageKind::Transcription, Some(audio)) => Ok(Self::transcription(store, audio, params)),
            (StageKind::Transcription, None) => Err(SubpipeError::Config(
                "the transcription stage needs --audio".to_string(),
            )),
            (StageKind::Translation, _) => Ok(Self::translation(store, params)),
        }
    }
}

/// Exit codes of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    InvalidInput,
    ModelUnavailable,
    InferenceFailed,
    SnapshotWriteFailed,
}

impl WorkerExit {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidInput => 2,
            Self::ModelUnavailable => 3,
            Self::InferenceFailed => 4,
            Self::SnapshotWriteFailed => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            2 => Some(Self::InvalidInput),
            3 => Some(Self::ModelUnavailable),
            4 => Some(Self::InferenceFailed),
            5 => Some(Self::SnapshotWriteFailed),
            _ => None,
        }
    }

    pub fn for_error(error: &SubpipeError) -> Self {
        match error.root() {
            SubpipeError::ModelLoad(_) => Self::ModelUnavailable,
            SubpipeError::IoWrite { .. } | SubpipeError::Json(_) => Self::SnapshotWriteFailed,
            SubpipeError::InputNotFound(_)
            | SubpipeError::Snapshot { .. }
            | SubpipeError::Validation(_)
            | SubpipeError::Config(_) => Self::InvalidInput,
            _ => Self::InferenceFailed,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidInput => "invalid input",
            Self::ModelUnavailable => "model unavailable",
            Self::InferenceFailed => "inference failed",
            Self::SnapshotWriteFailed => "snapshot write failed",
        }
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    Success,
    Failed(i32),
    /// Killed by a signal (number if known)
    Signalled(Option<i32>),
}

impl StageExit {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Map a worker exit to the error the controller reports for `kind`.
    pub fn into_result(self, kind: StageKind) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failed(code) => match WorkerExit::from_code(code) {
                Some(WorkerExit::ModelUnavailable) => Err(SubpipeError::ModelLoad(format!(
                    "{} worker could not load its model (exit code {})",
                    kind, code
                ))),
                Some(exit) => Err(kind.failure(format!(
                    "{} worker failed: {} (exit code {})",
                    kind,
                    exit.describe(),
                    code
                ))),
                None => Err(kind.failure(format!("{} worker exited with code {}", kind, code))),
            },
            Self::Signalled(Some(signal)) => Err(kind.failure(format!(
                "{} worker was terminated by signal {}",
                kind, signal
            ))),
            Self::Signalled(None) => Err(kind.failure(format!("{} worker was terminated", kind))),
        }
    }
}

/// Runs one stage to completion in an isolated execution unit.
#[async_trait]
pub trait StageRunnerTrait: Send + Sync {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageExit>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhisperModel;
    use crate::subtitle::SubtitleFormat;

    fn settings() -> RunSettings {
        RunSettings {
            input: PathBuf::from("talk.mp4"),
            output: PathBuf::from("talk.srt"),
            format: SubtitleFormat::Srt,
            transcription_model: WhisperModel::Medium,
            translation_model: "qwen2.5:7b".to_string(),
            source_language: "ja".to_string(),
            target_language: "ko".to_string(),
            batch_size: 8,
            fallback_to_original: true,
            keep_audio: false,
        }
    }

    #[test]
    fn test_params_pick_model_per_stage() {
        let settings = settings();
        assert_eq!(StageParams::for_stage(StageKind::Transcription, &settings).model, "medium");
        assert_eq!(StageParams::for_stage(StageKind::Translation, &settings).model, "qwen2.5:7b");
    }

    #[test]
    fn test_params_to_args() {
        let params = StageParams::for_stage(StageKind::Translation, &settings());
        assert_eq!(
            params.to_args(),
            vec![
                "--model", "qwen2.5:7b",
                "--source-language", "ja",
                "--target-language", "ko",
                "--batch-size", "8",
                "--allow-untranslated",
            ]
        );
    }

    #[test]
    fn test_translate_config_overrides_run_values() {
        let base = TranslateConfig {
            endpoint: "http://gpu-box:11434".to_string(),
            ..TranslateConfig::default()
        };
        let config = StageParams::for_stage(StageKind::Translation, &settings()).translate_config(&base);

        assert_eq!(config.endpoint, "http://gpu-box:11434");
        assert_eq!(config.model, "qwen2.5:7b");
        assert_eq!(config.batch_size, 8);
        assert!(config.fallback_to_original);
    }

    #[test]
    fn test_worker_exit_codes() {
        for exit in [
            WorkerExit::Success,
            WorkerExit::InvalidInput,
            WorkerExit::ModelUnavailable,
            WorkerExit::InferenceFailed,
            WorkerExit::SnapshotWriteFailed,
        ] {
            assert_eq!(WorkerExit::from_code(exit.code()), Some(exit));
        }
        assert_eq!(WorkerExit::from_code(1), None);

        assert_eq!(
            WorkerExit::for_error(&SubpipeError::ModelLoad("gone".to_string())),
            WorkerExit::ModelUnavailable
        );
        assert_eq!(
            WorkerExit::for_error(&SubpipeError::Translation("oom".to_string())),
            WorkerExit::InferenceFailed
        );
        assert_eq!(
            WorkerExit::for_error(&SubpipeError::InputNotFound(PathBuf::from("a.wav"))),
            WorkerExit::InvalidInput
        );
    }

    #[test]
    fn test_stage_exit_maps_to_stage_errors() {
        assert!(StageExit::Success.into_result(StageKind::Translation).is_ok());

        let err = StageExit::Failed(3).into_result(StageKind::Transcription).unwrap_err();
        assert!(matches!(err, SubpipeError::ModelLoad(_)));

        let err = StageExit::Failed(4).into_result(StageKind::Translation).unwrap_err();
        assert!(matches!(err, SubpipeError::Translation(ref m) if m.contains("inference failed")));

        let err = StageExit::Signalled(Some(9)).into_result(StageKind::Transcription).unwrap_err();
        assert!(matches!(err, SubpipeError::Transcription(ref m) if m.contains("signal 9")));
    }

    #[test]
    fn test_transcription_request_needs_audio() {
        let dir = tempfile::tempdir().unwrap();
        let store = InterchangeStore::open(dir.path()).unwrap();
        let params = StageParams::for_stage(StageKind::Transcription, &settings());

        assert!(StageRequest::from_parts(StageKind::Transcription, store.clone(), None, params.clone()).is_err());

        let request = StageRequest::from_parts(StageKind::Translation, store, None, params).unwrap();
        assert_eq!(request.input, StageInput::Snapshot(SnapshotKey::Transcription));
    }
}
