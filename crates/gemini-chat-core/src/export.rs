//! Plain-text transcript export

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::transcript::Message;

const SEPARATOR: &str = "\n---\n\n";

/// Render messages as `ROLE:\ntext\n` blocks joined by a `---` line
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}:\n{}\n", m.role.as_str().to_uppercase(), m.text))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// File name for an export taken at `now`, e.g.
/// `gemini-chat-history-2025-01-02T03-04-05Z.txt`
pub fn export_file_name(now: OffsetDateTime) -> String {
    let stamp = now
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .unwrap_or(now)
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!("gemini-chat-history-{}.txt", stamp.replace(':', "-"))
}

/// Write the transcript into `dir`. Nothing is written for an empty
/// transcript.
pub fn save_transcript(messages: &[Message], dir: &Path, now: OffsetDateTime) -> Result<Option<PathBuf>> {
    if messages.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {:?}", dir))?;
    let path = dir.join(export_file_name(now));
    fs::write(&path, format_transcript(messages))
        .with_context(|| format!("Failed to write transcript to {:?}", path))?;

    tracing::info!("exported {} messages to {:?}", messages.len(), path);
    Ok(Some(path))
}
