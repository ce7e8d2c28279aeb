use std::path::PathBuf;
use thiserror::Error;

use crate::workflow::PipelineStage;

#[derive(Error, Debug)]
pub enum SubpipeError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Audio extraction error: {0}")]
    Extraction(String),

    #[error("Model unavailable: {0}")]
    ModelLoad(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Invalid segment data: {0}")]
    Validation(String),

    #[error("Unsupported subtitle format '{format}' (supported: srt, smi)")]
    UnsupportedFormat { format: String },

    #[error("No segments to serialize")]
    EmptyInput,

    #[error("Failed to write {}: {source}", .path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot '{key}' unavailable: {reason}")]
    Snapshot { key: String, reason: String },

    #[error("{stage} stage failed: {error}")]
    Stage {
        stage: PipelineStage,
        error: Box<SubpipeError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SubpipeError {
    /// Attach the failing pipeline stage. Already-annotated errors are left alone.
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                error: Box::new(other),
            },
        }
    }

    /// The underlying error, looking through a stage annotation.
    pub fn root(&self) -> &SubpipeError {
        match self {
            Self::Stage { error, .. } => error.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SubpipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_annotation_is_applied_once() {
        let err = SubpipeError::Translation("boom".to_string())
            .in_stage(PipelineStage::Translate)
            .in_stage(PipelineStage::Serialize);

        assert_eq!(err.to_string(), "translate stage failed: Translation error: boom");
        assert!(matches!(err.root(), SubpipeError::Translation(_)));
        // The cause is part of the message, not repeated as a source
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_cancelled_seen_through_annotation() {
        let err = SubpipeError::Cancelled.in_stage(PipelineStage::Transcribe);
        assert!(err.is_cancelled());
        assert!(!SubpipeError::EmptyInput.is_cancelled());
    }
}
