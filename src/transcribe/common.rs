use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

use crate::error::{Result, SubpipeError};
use crate::segment::{Segment, TranscriptionSnapshot};

/// Backend-agnostic transcription result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractTranscription {
    pub segments: Vec<Segment>,
    /// Language reported by the model, if any
    pub language: Option<String>,
}

/// Trait for converting service-specific transcription formats to abstract format
pub trait TranscriptionMapper<T> {
    /// Convert service-specific format to abstract transcription
    fn to_abstract_transcription(service_result: T) -> Result<AbstractTranscription>;
}

impl AbstractTranscription {
    /// Build the interchange snapshot. Falls back to the requested language
    /// when the backend did not report one.
    pub fn into_snapshot(self, requested_language: &str, model: &str) -> TranscriptionSnapshot {
        let language = self
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| requested_language.to_string());
        TranscriptionSnapshot::new(self.segments, language, model.to_string())
    }
}

/// Run a transcriber binary to completion, mapping spawn failures to model
/// availability errors and non-zero exits to transcription errors.
pub async fn run_transcriber_command(mut cmd: Command, binary: &str) -> Result<Output> {
    let output = cmd.kill_on_drop(true).output().await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            SubpipeError::ModelLoad(format!("transcriber binary '{}' not found", binary))
        } else {
            SubpipeError::Transcription(format!("Failed to execute {}: {}", binary, e))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SubpipeError::Transcription(format!(
            "{} failed ({}): {}",
            binary, output.status, stderr
        )));
    }

    Ok(output)
}

/// Probe a transcriber binary by running it with `--help`.
pub async fn probe_binary(binary: &str) -> Result<()> {
    let mut cmd = Command::new(binary);
    cmd.arg("--help");
    match cmd.kill_on_drop(true).output().await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(SubpipeError::ModelLoad(format!(
            "transcriber binary '{}' not found",
            binary
        ))),
        Err(e) => Err(SubpipeError::ModelLoad(format!("cannot run '{}': {}", binary, e))),
    }
}

/// Read a JSON file written by a transcriber into `T`.
pub fn read_json_output<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(SubpipeError::Transcription(format!(
            "transcriber output not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| SubpipeError::Transcription(format!("Failed to read output: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| SubpipeError::Transcription(format!("Failed to parse transcriber JSON: {}", e)))
}
