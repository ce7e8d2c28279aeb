use assert_fs::TempDir;
use assert_fs::prelude::*;
use async_trait::async_trait;
use std::path::Path;

use subpipe::config::{RunSettings, WhisperModel};
use subpipe::error::{Result, SubpipeError};
use subpipe::media::MediaProcessorTrait;
use subpipe::segment::Segment;
use subpipe::stage::worker::{transcription_stage, translation_stage};
use subpipe::stage::{StageExit, StageInput, StageKind, StageRequest, StageRunnerTrait, WorkerExit};
use subpipe::subtitle::SubtitleFormat;
use subpipe::transcribe::{AbstractTranscription, TranscriberTrait};
use subpipe::translate::Translator;
use subpipe::workflow::{PipelineStage, PipelineState, Workflow};

struct FakeMedia;

#[async_trait]
impl MediaProcessorTrait for FakeMedia {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        if !video_path.exists() {
            return Err(SubpipeError::InputNotFound(video_path.to_path_buf()));
        }
        std::fs::write(audio_path, b"RIFF....WAVE")?;
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        Ok("fake".to_string())
    }
}

struct FixedTranscriber(Vec<Segment>);

#[async_trait]
impl TranscriberTrait for FixedTranscriber {
    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    async fn transcribe(&self, _audio_path: &Path, _language: &str) -> Result<AbstractTranscription> {
        Ok(AbstractTranscription {
            segments: self.0.clone(),
            language: Some("ja".to_string()),
        })
    }
}

enum FakeTranslator {
    Uppercase,
    Broken,
    NotInstalled,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn check_availability(&self) -> Result<()> {
        match self {
            Self::NotInstalled => Err(SubpipeError::ModelLoad("model 'nllb' is not installed".to_string())),
            _ => Ok(()),
        }
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        match self {
            Self::Uppercase => Ok(texts.iter().map(|t| t.to_uppercase()).collect()),
            _ => Err(SubpipeError::Translation("CUDA out of memory".to_string())),
        }
    }
}

/// Runs the worker stage functions in-process and reports exits like a child would.
struct InProcessRunner {
    transcriber: FixedTranscriber,
    translator: FakeTranslator,
}

#[async_trait]
impl StageRunnerTrait for InProcessRunner {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageExit> {
        let result = match (&request.kind, &request.input) {
            (StageKind::Transcription, StageInput::Audio(audio)) => {
                transcription_stage(&self.transcriber, audio, &request.store, &request.params).await
            }
            _ => translation_stage(&self.translator, &request.store, &request.params).await,
        };

        Ok(match result {
            Ok(_) => StageExit::Success,
            Err(e) => StageExit::Failed(WorkerExit::for_error(&e).code()),
        })
    }
}

fn abc() -> Vec<Segment> {
    vec![
        Segment::new(0.0, 1.2, "a"),
        Segment::new(1.2, 2.5, "b"),
        Segment::new(2.5, 4.0, "c"),
    ]
}

fn settings(temp: &TempDir, format: SubtitleFormat) -> RunSettings {
    let input = temp.child("talk.mp4");
    input.write_binary(b"not really a video").unwrap();

    RunSettings {
        input: input.path().to_path_buf(),
        output: RunSettings::default_output(input.path(), format),
        format,
        transcription_model: WhisperModel::Base,
        translation_model: "llama3.2:3b".to_string(),
        source_language: "ja".to_string(),
        target_language: "ko".to_string(),
        batch_size: 2,
        fallback_to_original: false,
        keep_audio: false,
    }
}

fn workflow(temp: &TempDir, settings: RunSettings, segments: Vec<Segment>, translator: FakeTranslator) -> Workflow {
    let runner = InProcessRunner {
        transcriber: FixedTranscriber(segments),
        translator,
    };
    Workflow::new(
        settings,
        Box::new(FakeMedia),
        Box::new(runner),
        temp.child(".subpipe").child("tmp").path().to_path_buf(),
    )
}

#[tokio::test]
async fn three_segments_become_three_srt_cues() {
    let temp = TempDir::new().unwrap();
    let mut workflow = workflow(&temp, settings(&temp, SubtitleFormat::Srt), abc(), FakeTranslator::Uppercase);

    let report = workflow.run().await.unwrap();

    assert_eq!(report.segments, 3);
    assert_eq!(report.language, "ja");
    assert!(!report.untranslated);
    assert_eq!(workflow.state(), &PipelineState::Done);
    temp.child("talk.srt").assert(
        "1\n00:00:00,000 --> 00:00:01,200\nA\n\n\
         2\n00:00:01,200 --> 00:00:02,500\nB\n\n\
         3\n00:00:02,500 --> 00:00:04,000\nC\n\n",
    );
    assert!(!temp.child(".subpipe").child("tmp").path().exists());
}

#[tokio::test]
async fn smi_output_uses_target_language_class() {
    let temp = TempDir::new().unwrap();
    let mut workflow = workflow(&temp, settings(&temp, SubtitleFormat::Smi), abc(), FakeTranslator::Uppercase);

    let report = workflow.run().await.unwrap();

    let smi = std::fs::read_to_string(&report.output).unwrap();
    assert!(report.output.ends_with("talk.smi"));
    assert!(smi.contains(".KRCC { Name:한국어; lang:ko-KR; SAMIType:CC; }"));
    assert!(smi.contains("<SYNC Start=1200>\n<P Class=KRCC>\nB\n</P>"));
    assert!(smi.ends_with("</BODY>\n</SAMI>\n"));
}

#[tokio::test]
async fn fallback_keeps_original_text_and_reaches_done() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp, SubtitleFormat::Srt);
    settings.fallback_to_original = true;
    let mut workflow = workflow(&temp, settings, abc(), FakeTranslator::Broken);

    let report = workflow.run().await.unwrap();

    assert!(report.untranslated);
    assert_eq!(workflow.state(), &PipelineState::Done);
    temp.child("talk.srt").assert(
        "1\n00:00:00,000 --> 00:00:01,200\na\n\n\
         2\n00:00:01,200 --> 00:00:02,500\nb\n\n\
         3\n00:00:02,500 --> 00:00:04,000\nc\n\n",
    );
}

#[tokio::test]
async fn translation_failure_without_fallback_fails_the_run() {
    let temp = TempDir::new().unwrap();
    let mut workflow = workflow(&temp, settings(&temp, SubtitleFormat::Srt), abc(), FakeTranslator::Broken);

    let err = workflow.run().await.unwrap_err();

    assert!(err.to_string().starts_with("translate stage failed"));
    assert!(matches!(err.root(), SubpipeError::Translation(_)));
    assert!(matches!(
        workflow.state(),
        PipelineState::Failed { stage: PipelineStage::Translate, .. }
    ));
    assert!(!temp.child("talk.srt").path().exists());
    assert!(!temp.child(".subpipe").child("tmp").path().exists());
}

#[tokio::test]
async fn missing_translation_model_is_model_load_error_even_with_fallback() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp, SubtitleFormat::Srt);
    settings.fallback_to_original = true;
    let mut workflow = workflow(&temp, settings, abc(), FakeTranslator::NotInstalled);

    let err = workflow.run().await.unwrap_err();

    assert!(matches!(err.root(), SubpipeError::ModelLoad(_)));
    assert!(err.to_string().starts_with("translate stage failed"));
}

#[tokio::test]
async fn missing_input_fails_extraction() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp, SubtitleFormat::Srt);
    settings.input = temp.child("gone.mp4").path().to_path_buf();
    let mut workflow = workflow(&temp, settings, abc(), FakeTranslator::Uppercase);

    let err = workflow.run().await.unwrap_err();

    assert!(err.to_string().starts_with("extract stage failed"));
    assert!(matches!(err.root(), SubpipeError::InputNotFound(_)));
    assert!(!temp.child(".subpipe").child("tmp").path().exists());
}

#[tokio::test]
async fn silent_media_produces_no_subtitle() {
    let temp = TempDir::new().unwrap();
    let silence = vec![Segment::new(0.0, 3.0, "")];
    let mut workflow = workflow(&temp, settings(&temp, SubtitleFormat::Srt), silence, FakeTranslator::Uppercase);

    let err = workflow.run().await.unwrap_err();

    assert!(err.to_string().starts_with("serialize stage failed"));
    assert!(matches!(err.root(), SubpipeError::Validation(_)));
    assert!(!temp.child("talk.srt").path().exists());
}

#[tokio::test]
async fn repeated_runs_leave_no_temporary_files() {
    let temp = TempDir::new().unwrap();
    let work_dir = temp.child(".subpipe").child("tmp");

    for _ in 0..2 {
        let mut workflow = workflow(&temp, settings(&temp, SubtitleFormat::Srt), abc(), FakeTranslator::Uppercase);
        workflow.run().await.unwrap();
        assert!(!work_dir.path().exists());
    }

    let srt = std::fs::read_to_string(temp.child("talk.srt").path()).unwrap();
    assert_eq!(srt.matches(" --> ").count(), 3);
}
