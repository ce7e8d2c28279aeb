use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::info;

use crate::error::{Result, SubpipeError};
use crate::segment::Segment;

/// Output subtitle container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Smi,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Smi => "smi",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SubtitleFormat {
    type Err = SubpipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "smi" | "sami" => Ok(Self::Smi),
            _ => Err(SubpipeError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// Caption class used in the SAMI style block.
#[derive(Debug, Clone, PartialEq)]
pub struct SmiStyle {
    pub title: String,
    pub class: String,
    pub language_name: String,
    pub lang_tag: String,
}

impl Default for SmiStyle {
    fn default() -> Self {
        Self::for_language("ko")
    }
}

impl SmiStyle {
    /// Derive the caption class from a target language code (`ko` -> `KRCC`).
    pub fn for_language(code: &str) -> Self {
        let code = code.trim().to_lowercase();
        let (class, name, tag) = match code.as_str() {
            "ko" => ("KRCC", "한국어", "ko-KR"),
            "en" => ("ENCC", "English", "en-US"),
            "ja" => ("JPCC", "日本語", "ja-JP"),
            "zh" => ("CNCC", "中文", "zh-CN"),
            "fr" => ("FRCC", "Français", "fr-FR"),
            "de" => ("DECC", "Deutsch", "de-DE"),
            "es" => ("ESCC", "Español", "es-ES"),
            _ => ("", "", ""),
        };

        if class.is_empty() {
            let upper = code.to_uppercase();
            return Self {
                title: "Subtitle".to_string(),
                class: format!("{}CC", upper),
                language_name: upper,
                lang_tag: code,
            };
        }

        Self {
            title: "Subtitle".to_string(),
            class: class.to_string(),
            language_name: name.to_string(),
            lang_tag: tag.to_string(),
        }
    }
}

/// Render segments in the given format with the default SAMI style.
pub fn serialize(segments: &[Segment], format: SubtitleFormat) -> Result<String> {
    serialize_with(segments, format, &SmiStyle::default())
}

pub fn serialize_with(segments: &[Segment], format: SubtitleFormat, style: &SmiStyle) -> Result<String> {
    if segments.is_empty() {
        return Err(SubpipeError::EmptyInput);
    }

    Ok(match format {
        SubtitleFormat::Srt => render_srt(segments),
        SubtitleFormat::Smi => render_smi(segments, style),
    })
}

fn render_srt(segments: &[Segment]) -> String {
    let mut srt_content = String::new();

    for (index, segment) in segments.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            segment.text.trim()
        ));
    }

    srt_content
}

fn render_smi(segments: &[Segment], style: &SmiStyle) -> String {
    let mut lines = vec![
        "<SAMI>".to_string(),
        "<HEAD>".to_string(),
        format!("<TITLE>{}</TITLE>", style.title),
        "<STYLE TYPE=\"text/css\">".to_string(),
        "<!--".to_string(),
        "P { margin-left:8pt; margin-right:8pt; margin-bottom:2pt;".to_string(),
        "    margin-top:2pt; font-size:20pt; text-align:center;".to_string(),
        "    font-family:Arial; font-weight:normal; color:white; }".to_string(),
        format!(
            ".{} {{ Name:{}; lang:{}; SAMIType:CC; }}",
            style.class, style.language_name, style.lang_tag
        ),
        "-->".to_string(),
        "</STYLE>".to_string(),
        "</HEAD>".to_string(),
        "<BODY>".to_string(),
        String::new(),
    ];

    for segment in segments {
        lines.push(format!("<SYNC Start={}>", format_smi_time(segment.start)));
        lines.push(format!("<P Class={}>", style.class));
        lines.push(segment.text.trim().to_string());
        lines.push("</P>".to_string());
        lines.push(format!("<SYNC Start={}>", format_smi_time(segment.end)));
        lines.push(format!("<P Class={}>&nbsp;</P>", style.class));
        lines.push(String::new());
    }

    lines.push("</BODY>".to_string());
    lines.push("</SAMI>".to_string());

    let mut content = lines.join("\n");
    content.push('\n');
    content
}

/// Serialize and write a subtitle file, creating the parent directory if needed.
///
/// The format string is checked before anything touches the disk.
pub async fn write_subtitles<P: AsRef<Path>>(
    segments: &[Segment],
    format: &str,
    style: &SmiStyle,
    output_path: P,
) -> Result<PathBuf> {
    let output_path = output_path.as_ref();
    let format: SubtitleFormat = format.parse()?;
    let content = serialize_with(segments, format, style)?;

    info!("Generating {} file: {}", format.extension().to_uppercase(), output_path.display());

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| SubpipeError::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(output_path, content).await.map_err(|e| SubpipeError::IoWrite {
        path: output_path.to_path_buf(),
        source: e,
    })?;

    info!("Subtitle file generated: {} cues", segments.len());
    Ok(output_path.to_path_buf())
}

fn to_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = to_millis(seconds);
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse `HH:MM:SS,mmm` (or `HH:MM:SS.mmm`) back into seconds.
pub fn parse_srt_time(timestamp: &str) -> Option<f64> {
    let (hms, millis) = timestamp.trim().split_once([',', '.'])?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || secs >= 60 || millis.len() != 3 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    let total = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Some(total as f64 / 1000.0)
}

/// SAMI sync points are integer milliseconds.
pub fn format_smi_time(seconds: f64) -> u64 {
    to_millis(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 1.2, "A"),
            Segment::new(1.2, 2.5, "B"),
            Segment::new(2.5, 4.0, "C"),
        ]
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
        assert_eq!(format_srt_time(1.2), "00:00:01,200");
        assert_eq!(format_srt_time(59.9996), "00:01:00,000");
    }

    #[test]
    fn test_srt_time_round_trip_within_a_millisecond() {
        let mut seconds = 0.0;
        while seconds < 7300.0 {
            let parsed = parse_srt_time(&format_srt_time(seconds)).unwrap();
            assert!((parsed - seconds).abs() <= 0.001, "{} -> {}", seconds, parsed);
            seconds += 12.3457;
        }
    }

    #[test]
    fn test_parse_srt_time_rejects_garbage() {
        assert_eq!(parse_srt_time("00:00:01.250"), Some(1.25));
        assert_eq!(parse_srt_time("00:61:00,000"), None);
        assert_eq!(parse_srt_time("1:2"), None);
        assert_eq!(parse_srt_time("00:00:01,25"), None);
    }

    #[test]
    fn test_srt_scenario_layout() {
        let srt = serialize(&scenario(), SubtitleFormat::Srt).unwrap();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,200\nA\n\n\
             2\n00:00:01,200 --> 00:00:02,500\nB\n\n\
             3\n00:00:02,500 --> 00:00:04,000\nC\n\n"
        );
    }

    #[test]
    fn test_srt_indices_are_sequential() {
        let segments: Vec<Segment> = (0..25)
            .map(|i| Segment::new(i as f64 * 3.0, i as f64 * 3.0 + 1.0, format!("line {}", i)))
            .collect();
        let srt = serialize(&segments, SubtitleFormat::Srt).unwrap();

        let indices: Vec<usize> = srt
            .split("\n\n")
            .filter(|block| !block.is_empty())
            .map(|block| block.lines().next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(indices, (1..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_smi_double_sync() {
        let smi = serialize(&scenario()[..1], SubtitleFormat::Smi).unwrap();
        assert!(smi.starts_with("<SAMI>\n<HEAD>"));
        assert!(smi.contains(".KRCC { Name:한국어; lang:ko-KR; SAMIType:CC; }"));
        assert!(smi.contains("<SYNC Start=0>\n<P Class=KRCC>\nA\n</P>\n<SYNC Start=1200>\n<P Class=KRCC>&nbsp;</P>"));
        assert!(smi.ends_with("</BODY>\n</SAMI>\n"));
    }

    #[test]
    fn test_smi_style_for_unknown_language() {
        let style = SmiStyle::for_language("pt");
        assert_eq!(style.class, "PTCC");
        assert_eq!(style.lang_tag, "pt");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(serialize(&[], SubtitleFormat::Srt), Err(SubpipeError::EmptyInput)));
        assert!(matches!(serialize(&[], SubtitleFormat::Smi), Err(SubpipeError::EmptyInput)));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("SRT".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Srt);
        assert_eq!("smi".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Smi);
        let err = "xml".parse::<SubtitleFormat>().unwrap_err();
        assert!(err.to_string().contains("srt, smi"));
    }

    #[tokio::test]
    async fn test_write_subtitles_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/movie.srt");

        let written = write_subtitles(&scenario(), "srt", &SmiStyle::default(), &path).await.unwrap();
        assert_eq!(written, path);
        let content = std::fs::read(&path).unwrap();
        assert!(!content.starts_with(&[0xEF, 0xBB, 0xBF]));
        assert!(String::from_utf8(content).unwrap().starts_with("1\n00:00:00,000"));
    }

    #[tokio::test]
    async fn test_unsupported_format_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/movie.xml");

        let result = write_subtitles(&scenario(), "xml", &SmiStyle::default(), &path).await;
        assert!(matches!(result, Err(SubpipeError::UnsupportedFormat { .. })));
        assert!(!path.exists());
        assert!(!dir.path().join("sub").exists());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let result = write_subtitles(&scenario(), "srt", &SmiStyle::default(), blocker.join("out.srt")).await;
        assert!(matches!(result, Err(SubpipeError::IoWrite { .. })));
    }
}
