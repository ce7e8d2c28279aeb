use serde::{Deserialize, Serialize};

use crate::error::{Result, SubpipeError};

/// A timestamped span of spoken text, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A segment after translation. Timing is copied verbatim from the source segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub original: String,
}

/// Output of the transcription stage as persisted in the interchange store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSnapshot {
    pub segments: Vec<Segment>,
    pub text: String,
    pub language: String,
    pub model: String,
}

/// Output of the translation stage as persisted in the interchange store.
pub type TranslationSnapshot = Vec<TranslatedSegment>;

impl Segment {
    pub fn new<S: Into<String>>(start: f64, end: f64, text: S) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Build a segment from raw model output: trims the text, keeps blank spans.
    pub fn normalized(start: f64, end: f64, text: &str) -> Self {
        Self::new(start, end, text.trim())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Check the timing fields of a single record. `index` is 1-based and only
    /// used for the diagnostic.
    pub fn validate(&self, index: usize) -> Result<()> {
        validate_timing(index, self.start, self.end)
    }
}

impl TranslatedSegment {
    /// Pass-through record used when translation is skipped.
    pub fn untranslated(segment: &Segment) -> Self {
        Self {
            start: segment.start,
            end: segment.end,
            text: segment.text.clone(),
            original: segment.text.clone(),
        }
    }

    pub fn is_untranslated(&self) -> bool {
        self.text == self.original
    }

    pub fn to_segment(&self) -> Segment {
        Segment::new(self.start, self.end, self.text.clone())
    }
}

impl TranscriptionSnapshot {
    pub fn new(segments: Vec<Segment>, language: String, model: String) -> Self {
        let text = full_text(&segments);
        Self {
            segments,
            text,
            language,
            model,
        }
    }
}

/// Space-joined text of all non-blank segments.
pub fn full_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_blank())
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_timing(index: usize, start: f64, end: f64) -> Result<()> {
    if !start.is_finite() || !end.is_finite() {
        return Err(SubpipeError::Validation(format!(
            "segment {}: non-finite timing ({} -> {})",
            index, start, end
        )));
    }
    if start < 0.0 {
        return Err(SubpipeError::Validation(format!(
            "segment {}: negative start {}",
            index, start
        )));
    }
    if end < start {
        return Err(SubpipeError::Validation(format!(
            "segment {}: end {} precedes start {}",
            index, end, start
        )));
    }
    Ok(())
}

/// Validate an ordered sequence of segments belonging to one media file.
///
/// Every record must have sane timing and `start` values must be
/// non-decreasing. Overlapping spans are allowed. Blank text is not an error
/// here; callers decide whether to drop it.
pub fn validate_segments(segments: &[Segment]) -> Result<()> {
    if segments.is_empty() {
        return Err(SubpipeError::Validation("segment list is empty".to_string()));
    }

    let mut previous_start = 0.0_f64;
    for (i, segment) in segments.iter().enumerate() {
        segment.validate(i + 1)?;
        if segment.start < previous_start {
            return Err(SubpipeError::Validation(format!(
                "segment {}: start {} is earlier than previous start {}",
                i + 1,
                segment.start,
                previous_start
            )));
        }
        previous_start = segment.start;
    }
    Ok(())
}

/// Translation must keep count, order and the exact timing of every record.
pub fn check_timing_preserved(source: &[Segment], translated: &[TranslatedSegment]) -> Result<()> {
    if source.len() != translated.len() {
        return Err(SubpipeError::Validation(format!(
            "translation produced {} segments for {} inputs",
            translated.len(),
            source.len()
        )));
    }

    for (i, (src, dst)) in source.iter().zip(translated).enumerate() {
        if src.start.to_bits() != dst.start.to_bits() || src.end.to_bits() != dst.end.to_bits() {
            return Err(SubpipeError::Validation(format!(
                "segment {}: timing changed during translation ({} -> {} became {} -> {})",
                i + 1,
                src.start,
                src.end,
                dst.start,
                dst.end
            )));
        }
    }
    Ok(())
}
