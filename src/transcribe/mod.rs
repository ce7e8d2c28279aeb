// Speech-to-text backends
//
// Every backend is an external command whose JSON output is mapped into an
// `AbstractTranscription` through a `TranscriptionMapper`:
// - OpenAI: OpenAI Whisper Python CLI
// - WhisperCpp: whisper.cpp CLI

pub mod common;
pub mod openai;
pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;

pub use common::*;
use crate::config::{TranscriberBackend, TranscriberConfig, WhisperModel};
use crate::error::Result;

/// Main trait for transcription operations
#[async_trait]
pub trait TranscriberTrait: Send + Sync {
    /// Verify the backend and its model can be loaded
    async fn check_availability(&self) -> Result<()>;

    /// Transcribe audio file to timestamped segments
    async fn transcribe(&self, audio_path: &Path, language: &str) -> Result<AbstractTranscription>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(config: TranscriberConfig, model: WhisperModel) -> Box<dyn TranscriberTrait> {
        match config.backend {
            TranscriberBackend::OpenaiWhisper => Box::new(openai::OpenAITranscriber::new(config, model)),
            TranscriberBackend::WhisperCpp => Box::new(whisper_cpp::WhisperCppTranscriber::new(config, model)),
        }
    }
}
