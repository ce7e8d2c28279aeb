// Segment translation
//
// `translate_segments` owns batching, ordering and the optional fallback;
// a `Translator` only turns a batch of source lines into target lines.

pub mod ollama;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

pub use ollama::OllamaTranslator;
use crate::config::TranslateConfig;
use crate::error::{Result, SubpipeError};
use crate::segment::{Segment, TranslatedSegment};

/// Main trait for translation operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Verify the translation model can be used
    async fn check_availability(&self) -> Result<()>;

    /// Translate a batch of lines, returning exactly one line per input in the same order
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>>;
}

/// How `translate_segments` walks the input.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// On failure, emit the source segments unchanged instead of returning the error
    pub fallback_to_original: bool,
}

impl From<&TranslateConfig> for BatchOptions {
    fn from(config: &TranslateConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            fallback_to_original: config.fallback_to_original,
        }
    }
}

/// Translate segments in fixed-size batches, preserving count, order and timing.
///
/// Blank source lines are not sent to the translator and stay blank.
pub async fn translate_segments(
    translator: &dyn Translator,
    segments: &[Segment],
    options: BatchOptions,
) -> Result<Vec<TranslatedSegment>> {
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    match translate_all(translator, segments, options.batch_size.max(1)).await {
        Ok(translated) => Ok(translated),
        Err(e) if options.fallback_to_original => {
            warn!("Translation failed, keeping original text for all {} segments: {}", segments.len(), e);
            warn!("The resulting subtitle will NOT be translated");
            Ok(segments.iter().map(TranslatedSegment::untranslated).collect())
        }
        Err(e) => Err(e),
    }
}

async fn translate_all(
    translator: &dyn Translator,
    segments: &[Segment],
    batch_size: usize,
) -> Result<Vec<TranslatedSegment>> {
    info!("Translating {} segments in batches of {}", segments.len(), batch_size);

    let progress = ProgressBar::new(segments.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} segments ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut translated = Vec::with_capacity(segments.len());

    for batch in segments.chunks(batch_size) {
        let lines = translate_chunk(translator, batch).await.inspect_err(|_| progress.abandon())?;

        for (segment, line) in batch.iter().zip(lines) {
            translated.push(TranslatedSegment {
                start: segment.start,
                end: segment.end,
                text: line,
                original: segment.text.clone(),
            });
        }
        progress.inc(batch.len() as u64);
    }

    progress.finish_and_clear();
    info!("Translation completed: {} segments", translated.len());
    Ok(translated)
}

async fn translate_chunk(translator: &dyn Translator, batch: &[Segment]) -> Result<Vec<String>> {
    let pending: Vec<usize> = (0..batch.len()).filter(|&i| !batch[i].is_blank()).collect();
    let mut lines = vec![String::new(); batch.len()];
    if pending.is_empty() {
        return Ok(lines);
    }

    let texts: Vec<String> = pending.iter().map(|&i| batch[i].text.clone()).collect();
    let results = translator.translate_batch(&texts).await?;

    if results.len() != texts.len() {
        return Err(SubpipeError::Translation(format!(
            "translator returned {} lines for a batch of {}",
            results.len(),
            texts.len()
        )));
    }

    for (index, line) in pending.into_iter().zip(results) {
        let line = line.trim();
        lines[index] = if line.is_empty() {
            warn!("Empty translation for '{}', keeping the original line", batch[index].text);
            batch[index].text.clone()
        } else {
            line.to_string()
        };
    }
    Ok(lines)
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_translator(config: TranslateConfig) -> Result<Box<dyn Translator>> {
        Ok(Box::new(OllamaTranslator::new(config)?))
    }
}
