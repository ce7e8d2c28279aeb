use chrono::Utc;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::RunSettings;
use crate::error::{Result, SubpipeError};
use crate::media::MediaProcessorTrait;
use crate::segment::{
    Segment, TranscriptionSnapshot, TranslationSnapshot, check_timing_preserved, validate_segments,
};
use crate::stage::{StageKind, StageParams, StageRequest, StageRunnerTrait};
use crate::store::{InterchangeStore, SnapshotKey};
use crate::subtitle::{SmiStyle, write_subtitles};

const RUN_DIR_PREFIX: &str = "run-";

/// Pipeline steps, used to annotate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extract,
    Transcribe,
    Translate,
    Serialize,
    Cleanup,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extract => "extract",
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
            Self::Serialize => "serialize",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Controller state. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Init,
    Extracting,
    Transcribing,
    Translating,
    Serializing,
    Cleaning,
    Done,
    Failed { stage: PipelineStage, cause: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Step a failure in this state is attributed to.
    fn stage(&self) -> PipelineStage {
        match self {
            Self::Init | Self::Extracting => PipelineStage::Extract,
            Self::Transcribing => PipelineStage::Transcribe,
            Self::Translating => PipelineStage::Translate,
            Self::Serializing => PipelineStage::Serialize,
            Self::Cleaning | Self::Done => PipelineStage::Cleanup,
            Self::Failed { stage, .. } => *stage,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub output: PathBuf,
    /// Cues written
    pub segments: usize,
    /// Blank segments dropped before serialization
    pub skipped_blank: usize,
    /// Every cue still carries source-language text
    pub untranslated: bool,
    /// Language reported by transcription
    pub language: String,
}

/// Per-run temporary directory holding the audio track and the interchange store.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    pub id: String,
    pub dir: PathBuf,
    pub audio: PathBuf,
    pub store: InterchangeStore,
}

impl RunWorkspace {
    pub fn create(work_dir: &Path, audio_format: &str) -> Result<Self> {
        let uuid = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}{}-{}",
            RUN_DIR_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            &uuid[..8]
        );
        let dir = work_dir.join(&id);
        let store = InterchangeStore::open(&dir)?;
        let audio = dir.join(format!("audio.{}", audio_format.trim_start_matches('.')));

        debug!("Created run workspace {}", dir.display());
        Ok(Self { id, dir, audio, store })
    }

    /// Best-effort removal of everything the run created. Safe to call repeatedly.
    pub fn cleanup(&self, keep_audio: bool) -> usize {
        let mut removed = self.store.clear();

        if keep_audio {
            if self.audio.exists() {
                info!("Keeping extracted audio: {}", self.audio.display());
            }
        } else {
            match fs::remove_file(&self.audio) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", self.audio.display(), e),
            }
        }

        remove_dir_if_empty(&self.dir);
        if let Some(parent) = self.dir.parent() {
            remove_dir_if_empty(parent);
        }

        debug!("Cleanup of {} removed {} files", self.id, removed);
        removed
    }
}

fn remove_dir_if_empty(dir: &Path) {
    let is_empty = fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false);
    if !is_empty {
        return;
    }
    if let Err(e) = fs::remove_dir(dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }
    }
}

/// The pipeline controller: extract, transcribe, translate, serialize, clean up.
pub struct Workflow {
    settings: RunSettings,
    media: Box<dyn MediaProcessorTrait>,
    runner: Box<dyn StageRunnerTrait>,
    work_dir: PathBuf,
    audio_format: String,
    cancel: Option<watch::Receiver<bool>>,
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl Workflow {
    pub fn new(
        settings: RunSettings,
        media: Box<dyn MediaProcessorTrait>,
        runner: Box<dyn StageRunnerTrait>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            settings,
            media,
            runner,
            work_dir,
            audio_format: "wav".to_string(),
            cancel: None,
            state: PipelineState::Init,
            transitions: vec![PipelineState::Init],
        }
    }

    pub fn with_audio_format<S: Into<String>>(mut self, audio_format: S) -> Self {
        self.audio_format = audio_format.into();
        self
    }

    /// Stop between stages once `cancel` turns true.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Every state entered so far, in order.
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    /// Run the whole pipeline once. Temporary files are removed on every exit path.
    pub async fn run(&mut self) -> Result<RunReport> {
        if self.state != PipelineState::Init {
            return Err(SubpipeError::Config("a workflow can only be run once".to_string()));
        }

        info!(
            "Processing {} -> {} ({})",
            self.settings.input.display(),
            self.settings.output.display(),
            self.settings.format
        );

        let mut workspace = None;
        let result = self.execute(&mut workspace).await;

        match result {
            Ok(report) => {
                self.enter(PipelineState::Cleaning);
                if let Some(workspace) = &workspace {
                    workspace.cleanup(self.settings.keep_audio);
                }
                self.enter(PipelineState::Done);
                info!("Subtitle written to {}", report.output.display());
                Ok(report)
            }
            Err(e) => {
                let stage = self.state.stage();
                let e = if self.cancel_requested() && !e.is_cancelled() {
                    debug!("Stage error after cancellation: {}", e);
                    SubpipeError::Cancelled
                } else {
                    e
                };
                let e = e.in_stage(stage);

                self.enter(PipelineState::Failed {
                    stage,
                    cause: e.root().to_string(),
                });
                if let Some(workspace) = &workspace {
                    workspace.cleanup(self.settings.keep_audio);
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, workspace_slot: &mut Option<RunWorkspace>) -> Result<RunReport> {
        // Extract
        self.enter(PipelineState::Extracting);
        self.check_cancelled()?;
        let workspace = RunWorkspace::create(&self.work_dir, &self.audio_format)?;
        *workspace_slot = Some(workspace.clone());
        self.media.extract_audio(&self.settings.input, &workspace.audio).await?;

        // Transcribe
        self.enter(PipelineState::Transcribing);
        self.check_cancelled()?;
        let transcription = self.transcribe(&workspace).await?;

        // Translate
        self.enter(PipelineState::Translating);
        self.check_cancelled()?;
        let translated = self.translate(&workspace, &transcription).await?;

        // Serialize
        self.enter(PipelineState::Serializing);
        self.check_cancelled()?;
        self.serialize(&workspace, &transcription, translated).await
    }

    async fn transcribe(&self, workspace: &RunWorkspace) -> Result<TranscriptionSnapshot> {
        let kind = StageKind::Transcription;
        let request = StageRequest::transcription(
            workspace.store.clone(),
            workspace.audio.clone(),
            StageParams::for_stage(kind, &self.settings),
        );
        self.runner.run_stage(&request).await?.into_result(kind)?;

        let snapshot: TranscriptionSnapshot = workspace
            .store
            .load(SnapshotKey::Transcription)
            .map_err(|e| kind.failure(format!("worker left no valid snapshot: {}", e)))?;
        if !snapshot.segments.is_empty() {
            validate_segments(&snapshot.segments)
                .map_err(|e| kind.failure(format!("worker left an invalid snapshot: {}", e)))?;
        }

        info!(
            "Transcription: {} segments, language {}",
            snapshot.segments.len(),
            snapshot.language
        );
        Ok(snapshot)
    }

    async fn translate(
        &self,
        workspace: &RunWorkspace,
        transcription: &TranscriptionSnapshot,
    ) -> Result<TranslationSnapshot> {
        let kind = StageKind::Translation;
        let request = StageRequest::translation(
            workspace.store.clone(),
            StageParams::for_stage(kind, &self.settings),
        );
        self.runner.run_stage(&request).await?.into_result(kind)?;

        if !workspace.store.contains(kind.output_key()) {
            return Err(kind.failure("worker exited successfully but left no snapshot"));
        }
        let translated: TranslationSnapshot = workspace
            .store
            .load(kind.output_key())
            .map_err(|e| kind.failure(format!("worker left no valid snapshot: {}", e)))?;
        check_timing_preserved(&transcription.segments, &translated)
            .map_err(|e| kind.failure(format!("worker left an invalid snapshot: {}", e)))?;

        Ok(translated)
    }

    async fn serialize(
        &self,
        workspace: &RunWorkspace,
        transcription: &TranscriptionSnapshot,
        translated: TranslationSnapshot,
    ) -> Result<RunReport> {
        let spoken: Vec<_> = translated.iter().filter(|s| !s.original.trim().is_empty()).collect();
        let untranslated = !spoken.is_empty() && spoken.iter().all(|s| s.is_untranslated());
        if untranslated && self.settings.source_language != self.settings.target_language {
            warn!("Subtitle text is NOT translated: every cue carries the original {} text", self.settings.source_language);
        }

        let segments: Vec<Segment> = translated
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| s.to_segment())
            .collect();
        let skipped_blank = translated.len() - segments.len();
        if skipped_blank > 0 {
            warn!("Dropping {} segments with empty text", skipped_blank);
        }

        validate_segments(&segments)?;

        let style = SmiStyle::for_language(&self.settings.target_language);
        let output = write_subtitles(
            &segments,
            self.settings.format.extension(),
            &style,
            &self.settings.output,
        )
        .await?;

        Ok(RunReport {
            run_id: workspace.id.clone(),
            output,
            segments: segments.len(),
            skipped_blank,
            untranslated,
            language: transcription.language.clone(),
        })
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("Pipeline state: {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        self.transitions.push(state);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| *c.borrow())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_requested() {
            return Err(SubpipeError::Cancelled);
        }
        Ok(())
    }
}

/// Totals from a stale-workspace sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub workspaces: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Delete run workspaces left behind by crashed or killed runs.
/// Must not be called while a run is using `work_dir`.
pub fn sweep_stale_workspaces(work_dir: &Path) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !work_dir.is_dir() {
        return Ok(report);
    }

    let runs: Vec<PathBuf> = WalkDir::new(work_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(RUN_DIR_PREFIX))
        .map(|e| e.into_path())
        .collect();

    for run in runs {
        for entry in WalkDir::new(&run).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                report.files += 1;
                report.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        match fs::remove_dir_all(&run) {
            Ok(()) => {
                info!("Removed stale workspace {}", run.display());
                report.workspaces += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", run.display(), e),
        }
    }

    remove_dir_if_empty(work_dir);
    Ok(report)
}
