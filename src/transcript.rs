//! Transcript materialization.
//!
//! A finished transcript is written once per job, either as human-readable
//! text or as a single JSON record. Artifact names combine the title, a
//! generation timestamp and a caller-supplied unique suffix, and files are
//! opened with `create_new` so an existing artifact is never overwritten.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TranscriptError, UnsupportedFormat};
use crate::Utterance;

const TITLE_FALLBACK: &str = "transcript";
const MAX_TITLE_CHARS: usize = 80;

/// Encoding of a persisted transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "txt")]
    Text,
    #[serde(alias = "json")]
    Structured,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Structured => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Text => "text/plain; charset=utf-8",
            OutputFormat::Structured => "application/json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "structured" | "json" => Ok(OutputFormat::Structured),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

/// On-disk shape of a structured transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredTranscript {
    pub title: String,
    pub timestamp: String,
    pub total_phrases: usize,
    pub phrases: Vec<Utterance>,
}

/// Writes transcripts into a single output directory.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    output_dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Persist `utterances` and return the path of the new artifact.
    ///
    /// `unique` disambiguates artifacts written for the same title within the
    /// same second; the job id is the usual choice.
    pub fn write(
        &self,
        utterances: &[Utterance],
        title: &str,
        format: OutputFormat,
        unique: &str,
    ) -> Result<PathBuf, TranscriptError> {
        fs::create_dir_all(&self.output_dir)?;

        let now = chrono::Local::now();
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let stem = sanitize_component(title);
        let file_name = format!(
            "{stem}_transcription_{timestamp}_{}.{}",
            sanitize_component(unique),
            format.extension()
        );
        let path = self.output_dir.join(file_name);

        let contents = match format {
            OutputFormat::Text => render_text(title, utterances),
            OutputFormat::Structured => {
                let record = StructuredTranscript {
                    title: title.to_string(),
                    timestamp,
                    total_phrases: utterances.len(),
                    phrases: utterances.to_vec(),
                };
                serde_json::to_string_pretty(&record)?
            }
        };

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;

        log::info!(
            "Saved {} transcript with {} phrases to {}",
            format.extension(),
            utterances.len(),
            path.display()
        );
        Ok(path)
    }
}

/// Render the plain-text encoding: a title header, a separator line, a blank
/// line, then one `[start - end] [role] text` line per utterance.
pub fn render_text(title: &str, utterances: &[Utterance]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Transcript: {title}");
    let _ = writeln!(out, "{}", "=".repeat(50));
    out.push('\n');
    for utterance in utterances {
        let _ = writeln!(
            out,
            "[{:.2}s - {:.2}s] [{}] {}",
            utterance.start, utterance.end, utterance.role, utterance.text
        );
    }
    out
}

pub fn read_structured(path: &Path) -> Result<StructuredTranscript, TranscriptError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Reduce `raw` to something safe as a single file-name component.
pub(crate) fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TITLE_CHARS)
        .collect();

    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        TITLE_FALLBACK.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators_and_traversal() {
        assert_eq!(sanitize_component("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_component("My Talk: part 1"), "My_Talk__part_1");
        assert_eq!(sanitize_component("   "), TITLE_FALLBACK);
        assert_eq!(sanitize_component("Запись звонка"), "Запись_звонка");
    }

    #[test]
    fn format_parsing_accepts_aliases_only() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("TXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Structured));
        assert_eq!(
            "structured".parse::<OutputFormat>(),
            Ok(OutputFormat::Structured)
        );
        assert!("srt".parse::<OutputFormat>().is_err());
    }
}
