use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emulator::types::Screenshot;
use crate::errors::EmuPilotResult;
use crate::llm::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Command,
    Response,
    Error,
    System,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "crate::emulator::types::serialize_screenshot"
    )]
    pub screenshot: Option<Arc<Screenshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line of the conversation between the user, the model and the
/// executor. Entries are append-only once pushed.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            kind: None,
            metadata: None,
        }
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only conversation log, mirrored to a JSONL file when a flush
/// directory is configured. Flush failures are logged, never surfaced.
pub struct Transcript {
    pub session_id: Uuid,
    entries: Vec<ConversationEntry>,
    file_path: Option<PathBuf>,
}

impl Transcript {
    /// In-memory transcript with no file mirror.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            entries: Vec::new(),
            file_path: None,
        }
    }

    pub fn with_flush_dir(session_id: Uuid, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = std::fs::create_dir_all(&dir);
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            entries: Vec::new(),
            file_path: Some(file_path),
        }
    }

    pub fn persistent(session_id: Uuid) -> Self {
        Self::with_flush_dir(session_id, data_dir_or_cwd())
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
        if let Err(e) = self.flush_last() {
            tracing::debug!(error = %e, "transcript flush failed");
        }
    }

    /// Append the latest entry to the JSONL file.
    fn flush_last(&self) -> EmuPilotResult<()> {
        let (Some(path), Some(last)) = (self.file_path.as_ref(), self.entries.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }
}

/// `~/.local/share/emupilot/sessions` (platform equivalent), falling back
/// to the working directory.
fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        return base.join("emupilot").join("sessions");
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_in_order() {
        let mut transcript = Transcript::new(Uuid::new_v4());
        transcript.push(ConversationEntry::new(Role::User, "first"));
        transcript.push(ConversationEntry::new(Role::Assistant, "second"));
        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "first");
        assert_eq!(entries[1].content, "second");
    }

    #[test]
    fn entry_kind_serializes_as_type() {
        let entry = ConversationEntry::new(Role::Assistant, "done")
            .with_kind(EntryKind::Response);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn flush_writes_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let mut transcript = Transcript::with_flush_dir(id, dir.path());
        transcript.push(ConversationEntry::new(Role::User, "run ls"));
        transcript.push(
            ConversationEntry::new(Role::System, "Executing: type \"ls\"")
                .with_kind(EntryKind::Command)
                .with_metadata(EntryMetadata {
                    command: Some("type \"ls\"".into()),
                    ..Default::default()
                }),
        );

        let path = dir.path().join(format!("session_{id}.jsonl"));
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "command");
        assert_eq!(second["metadata"]["command"], "type \"ls\"");
    }
}
