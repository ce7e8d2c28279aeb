use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, RunSettings, WhisperModel};
use crate::error::{Result, SubpipeError};
use crate::stage::{StageKind, StageParams};
use crate::subtitle::SubtitleFormat;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate translated subtitles for a video",
    long_about = None,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct Args {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Input video file
    #[arg(short, long, required = true)]
    pub input: Option<PathBuf>,

    /// Output subtitle file [default: <input stem>.<format> next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Subtitle format
    #[arg(short, long, value_enum)]
    pub format: Option<SubtitleFormat>,

    /// Whisper model size
    #[arg(short = 'w', long, value_enum)]
    pub transcription_model: Option<WhisperModel>,

    /// Translation model (Ollama model id)
    #[arg(short = 't', long)]
    pub translation_model: Option<String>,

    /// Spoken language of the input
    #[arg(long)]
    pub language: Option<String>,

    /// Subtitle language
    #[arg(long)]
    pub target_language: Option<String>,

    /// Segments per translation request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Write source-language text instead of failing when translation fails
    #[arg(long)]
    pub allow_untranslated: bool,

    /// Keep the extracted audio file
    #[arg(long)]
    pub keep_audio: bool,

    /// Overwrite an existing output file without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove temporary files left by interrupted runs
    Clean {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run one inference stage in this process (started by the pipeline)
    #[command(hide = true)]
    Worker {
        #[arg(long, value_enum)]
        stage: StageKind,

        /// Interchange store directory
        #[arg(long)]
        store: PathBuf,

        /// Audio input of the transcription stage
        #[arg(long)]
        audio: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        params: StageParams,
    },
}

impl RunArgs {
    /// Merge command-line values over the configuration file.
    pub fn to_settings(&self, config: &Config) -> Result<RunSettings> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| SubpipeError::Config("--input is required".to_string()))?;
        let format = self.format.unwrap_or(config.pipeline.format);
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| RunSettings::default_output(&input, format));

        Ok(RunSettings {
            input,
            output,
            format,
            transcription_model: self.transcription_model.unwrap_or(config.transcriber.model),
            translation_model: self
                .translation_model
                .clone()
                .unwrap_or_else(|| config.translate.model.clone()),
            source_language: self
                .language
                .clone()
                .unwrap_or_else(|| config.transcriber.language.clone()),
            target_language: self
                .target_language
                .clone()
                .unwrap_or_else(|| config.translate.target_language.clone()),
            batch_size: self.batch_size.unwrap_or(config.translate.batch_size),
            fallback_to_original: self.allow_untranslated || config.translate.fallback_to_original,
            keep_audio: self.keep_audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_run_args_and_defaults() {
        let args = Args::try_parse_from(["subpipe", "-i", "/videos/talk.mp4", "-f", "smi", "-w", "small"]).unwrap();
        assert!(args.command.is_none());

        let settings = args.run.to_settings(&Config::default()).unwrap();
        assert_eq!(settings.output, Path::new("/videos/talk.smi"));
        assert_eq!(settings.format, SubtitleFormat::Smi);
        assert_eq!(settings.transcription_model, WhisperModel::Small);
        assert_eq!(settings.translation_model, "llama3.2:3b");
        assert_eq!(settings.source_language, "ja");
        assert_eq!(settings.target_language, "ko");
        assert_eq!(settings.batch_size, 16);
        assert!(!settings.fallback_to_original);
        assert!(!settings.keep_audio);
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.translate.fallback_to_original = true;
        config.pipeline.format = SubtitleFormat::Smi;

        let args = Args::try_parse_from([
            "subpipe", "-i", "a.mkv", "-o", "subs/a.srt", "-f", "srt",
            "-t", "qwen2.5:7b", "--language", "en", "--batch-size", "4", "--keep-audio",
        ])
        .unwrap();
        let settings = args.run.to_settings(&config).unwrap();

        assert_eq!(settings.output, Path::new("subs/a.srt"));
        assert_eq!(settings.format, SubtitleFormat::Srt);
        assert_eq!(settings.translation_model, "qwen2.5:7b");
        assert_eq!(settings.source_language, "en");
        assert_eq!(settings.batch_size, 4);
        assert!(settings.fallback_to_original);
        assert!(settings.keep_audio);
    }

    #[test]
    fn test_input_is_required_without_subcommand() {
        assert!(Args::try_parse_from(["subpipe"]).is_err());
        assert!(Args::try_parse_from(["subpipe", "-i", "a.mp4", "-f", "vtt"]).is_err());
    }

    #[test]
    fn test_clean_needs_no_input() {
        let args = Args::try_parse_from(["subpipe", "clean"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Clean { config: None })));
    }

    #[test]
    fn test_worker_parses_stage_params() {
        let params = StageParams {
            model: "large-v3".to_string(),
            source_language: "ja".to_string(),
            target_language: "ko".to_string(),
            batch_size: 8,
            fallback_to_original: true,
        };
        let mut argv = vec![
            "subpipe".to_string(),
            "worker".to_string(),
            "--stage".to_string(),
            "transcription".to_string(),
            "--store".to_string(),
            "/tmp/run".to_string(),
            "--audio".to_string(),
            "/tmp/run/audio.wav".to_string(),
        ];
        argv.extend(params.to_args());

        let args = Args::try_parse_from(argv).unwrap();
        match args.command {
            Some(Commands::Worker { stage, store, audio, params: parsed, .. }) => {
                assert_eq!(stage, StageKind::Transcription);
                assert_eq!(store, Path::new("/tmp/run"));
                assert_eq!(audio.as_deref(), Some(Path::new("/tmp/run/audio.wav")));
                assert_eq!(parsed, params);
            }
            other => panic!("expected worker command, got {:?}", other),
        }
    }
}
