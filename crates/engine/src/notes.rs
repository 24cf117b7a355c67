//! Free-standing grow notes: observations tied to a moment rather than to a
//! phase change or a watering. Append-only, kept in insertion order.

use serde::Serialize;
use time::OffsetDateTime;

use crate::dates;
use crate::error::{EngineError, Result};

pub const MAX_NOTE_CHARS: usize = 1_000;

/// Trim `text` and check it is non-empty and at most `MAX_NOTE_CHARS`.
pub fn validate_note(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::InvalidNote {
            reason: "note is empty".to_string(),
        });
    }
    let chars = text.chars().count();
    if chars > MAX_NOTE_CHARS {
        return Err(EngineError::InvalidNote {
            reason: format!("note is {chars} characters, limit is {MAX_NOTE_CHARS}"),
        });
    }
    Ok(text.to_string())
}

/// One note. Like watering entries, the timestamp keeps its stored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteEntry {
    timestamp: String,
    pub note: String,
}

impl NoteEntry {
    pub fn new(timestamp: OffsetDateTime, note: &str) -> Result<Self> {
        Ok(Self {
            timestamp: dates::format_timestamp(timestamp)?,
            note: validate_note(note)?,
        })
    }

    pub(crate) fn from_stored_parts(timestamp: String, note: String) -> Self {
        Self { timestamp, note }
    }

    pub fn raw_timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        dates::parse_timestamp(&self.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteLedger {
    entries: Vec<NoteEntry>,
}

impl NoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<NoteEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[NoteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a note. The ledger is unchanged on error.
    pub fn append(&mut self, note: &str, timestamp: OffsetDateTime) -> Result<&NoteEntry> {
        let entry = NoteEntry::new(timestamp, note)?;
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn append_trims_and_records() {
        let mut ledger = NoteLedger::new();
        let ts = datetime!(2024-01-10 09:00:00 UTC);
        let entry = ledger.append("  leaves curling at the tips \n", ts).unwrap();
        assert_eq!(entry.note, "leaves curling at the tips");
        assert_eq!(entry.timestamp(), Some(ts));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn blank_note_rejected() {
        let mut ledger = NoteLedger::new();
        let err = ledger
            .append("   ", datetime!(2024-01-10 09:00:00 UTC))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidNote { .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn overlong_note_rejected() {
        let long = "x".repeat(MAX_NOTE_CHARS + 1);
        assert!(validate_note(&long).is_err());
        assert!(validate_note(&long[1..]).is_ok());
    }

    #[test]
    fn stored_note_keeps_malformed_timestamp() {
        let entry = NoteEntry::from_stored_parts("sometime".into(), "looks good".into());
        assert_eq!(entry.timestamp(), None);
        assert_eq!(entry.raw_timestamp(), "sometime");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["timestamp"], "sometime");
        assert_eq!(json["note"], "looks good");
    }
}
