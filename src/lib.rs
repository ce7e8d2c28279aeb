//! subpipe - staged video to subtitle pipeline
//!
//! Audio is extracted with ffmpeg, transcribed and translated in isolated
//! worker processes that hand results over as JSON snapshots, and written
//! out as SRT or SMI subtitles.

pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod segment;
pub mod stage;
pub mod store;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod workflow;
