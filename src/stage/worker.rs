use clap::ValueEnum;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{Config, WhisperModel};
use crate::error::{Result, SubpipeError};
use crate::segment::{TranscriptionSnapshot, TranslationSnapshot};
use crate::store::{InterchangeStore, SnapshotKey};
use crate::transcribe::{TranscriberFactory, TranscriberTrait};
use crate::translate::{BatchOptions, Translator, TranslatorFactory, translate_segments};
use super::{StageInput, StageKind, StageParams, StageRequest, WorkerExit};

/// Transcribe `audio` and publish the transcription snapshot.
pub async fn transcription_stage(
    transcriber: &dyn TranscriberTrait,
    audio: &Path,
    store: &InterchangeStore,
    params: &StageParams,
) -> Result<PathBuf> {
    if !audio.is_file() {
        return Err(SubpipeError::InputNotFound(audio.to_path_buf()));
    }

    transcriber.check_availability().await?;

    info!("Transcribing {} (model {}, language {})", audio.display(), params.model, params.source_language);
    let transcription = transcriber.transcribe(audio, &params.source_language).await?;
    let snapshot = transcription.into_snapshot(&params.source_language, &params.model);

    let blank = snapshot.segments.iter().filter(|s| s.is_blank()).count();
    info!(
        "Transcription produced {} segments ({} blank), language {}",
        snapshot.segments.len(),
        blank,
        snapshot.language
    );

    store.publish(SnapshotKey::Transcription, &snapshot)
}

/// Translate the stored transcription and publish the translation snapshot.
pub async fn translation_stage(
    translator: &dyn Translator,
    store: &InterchangeStore,
    params: &StageParams,
) -> Result<PathBuf> {
    let transcription: TranscriptionSnapshot = store.load(SnapshotKey::Transcription)?;

    if transcription.segments.is_empty() {
        warn!("Transcription snapshot has no segments, nothing to translate");
        return store.publish(SnapshotKey::Translation, &TranslationSnapshot::new());
    }

    translator.check_availability().await?;

    info!(
        "Translating {} segments {} -> {} with {}",
        transcription.segments.len(),
        params.source_language,
        params.target_language,
        params.model
    );

    let options = BatchOptions {
        batch_size: params.batch_size,
        fallback_to_original: params.fallback_to_original,
    };
    let translated = translate_segments(translator, &transcription.segments, options).await?;

    store.publish(SnapshotKey::Translation, &translated)
}

/// Entry point of the `worker` subcommand. Never panics on stage errors;
/// every outcome becomes an exit code.
pub async fn run_worker(
    config_path: Option<&Path>,
    kind: StageKind,
    store_dir: &Path,
    audio: Option<PathBuf>,
    params: StageParams,
) -> WorkerExit {
    match execute(config_path, kind, store_dir, audio, params).await {
        Ok(snapshot) => {
            info!("{} stage published {}", kind, snapshot.display());
            WorkerExit::Success
        }
        Err(e) => {
            let exit = WorkerExit::for_error(&e);
            error!("{} stage failed ({}): {}", kind, exit.describe(), e);
            exit
        }
    }
}

async fn execute(
    config_path: Option<&Path>,
    kind: StageKind,
    store_dir: &Path,
    audio: Option<PathBuf>,
    params: StageParams,
) -> Result<PathBuf> {
    let config = Config::load(config_path)?;
    let store = InterchangeStore::open(store_dir)?;
    let request = StageRequest::from_parts(kind, store, audio, params)?;
    run_request(&config, &request).await
}

/// Build the configured backend for `request` and run the stage in this process.
pub async fn run_request(config: &Config, request: &StageRequest) -> Result<PathBuf> {
    match (&request.kind, &request.input) {
        (StageKind::Transcription, StageInput::Audio(audio)) => {
            let model = WhisperModel::from_str(&request.params.model, true).map_err(|_| {
                SubpipeError::Config(format!("unknown transcription model '{}'", request.params.model))
            })?;
            let transcriber = TranscriberFactory::create_transcriber(config.transcriber.clone(), model);
            transcription_stage(transcriber.as_ref(), audio, &request.store, &request.params).await
        }
        (StageKind::Translation, StageInput::Snapshot(SnapshotKey::Transcription)) => {
            let translate_config = request.params.translate_config(&config.translate);
            let translator = TranslatorFactory::create_translator(translate_config)?;
            translation_stage(translator.as_ref(), &request.store, &request.params).await
        }
        (kind, input) => Err(SubpipeError::Config(format!(
            "{} stage cannot read {:?}",
            kind, input
        ))),
    }
}
