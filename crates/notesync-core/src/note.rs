use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Client-generated identifier, stable for the whole local lifetime of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LocalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::Validation(format!("invalid local id {:?}: {}", s, e)))
    }
}

/// Identifier assigned by the remote store on first successful create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks an offline mutation awaiting remote confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pending {
    /// The note has no remote counterpart, so there is nothing to confirm.
    #[default]
    NotApplicable,
    NotPending,
    Pending,
}

impl Pending {
    pub fn is_pending(self) -> bool {
        self == Pending::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Pending::NotApplicable => "not_applicable",
            Pending::NotPending => "not_pending",
            Pending::Pending => "pending",
        }
    }
}

impl FromStr for Pending {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_applicable" => Ok(Pending::NotApplicable),
            "not_pending" => Ok(Pending::NotPending),
            "pending" => Ok(Pending::Pending),
            other => Err(Error::Store(format!("unknown pending state: {}", other))),
        }
    }
}

/// Where a note stands relative to the remote replica. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    LocalOnly,
    Synced,
    PendingEdit,
    PendingDelete,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::LocalOnly => "local-only",
            SyncState::Synced => "synced",
            SyncState::PendingEdit => "pending-edit",
            SyncState::PendingDelete => "pending-delete",
        };
        f.write_str(s)
    }
}

/// A note in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub local_id: LocalId,
    #[serde(default)]
    pub server_id: Option<ServerId>,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pending_delete: Pending,
    #[serde(default)]
    pub pending_edit: Pending,
}

impl Note {
    /// Build a fresh local-only note. No I/O.
    pub fn new(title: &str, tags: &[String]) -> Result<Self, Error> {
        let title = validate_title(title)?;
        let now = Utc::now();
        Ok(Self {
            local_id: LocalId::new(),
            server_id: None,
            title,
            tags: normalize_tags(tags),
            created_at: now,
            updated_at: now,
            pending_delete: Pending::NotApplicable,
            pending_edit: Pending::NotApplicable,
        })
    }

    pub fn sync_state(&self) -> SyncState {
        if self.server_id.is_none() {
            SyncState::LocalOnly
        } else if self.pending_delete.is_pending() {
            SyncState::PendingDelete
        } else if self.pending_edit.is_pending() {
            SyncState::PendingEdit
        } else {
            SyncState::Synced
        }
    }

    /// A logically deleted note still waiting for the remote delete.
    pub fn is_tombstone(&self) -> bool {
        self.pending_delete.is_pending()
    }

    /// Record the remote identity. An already assigned id is never replaced.
    pub fn confirmed(mut self, server_id: ServerId, updated_at: DateTime<Utc>) -> Self {
        if self.server_id.is_none() {
            self.server_id = Some(server_id);
        }
        self.updated_at = updated_at;
        if self.pending_delete == Pending::NotApplicable {
            self.pending_delete = Pending::NotPending;
        }
        if self.pending_edit == Pending::NotApplicable {
            self.pending_edit = Pending::NotPending;
        }
        self
    }

    pub fn has_content(&self, title: &str, tags: &[String]) -> bool {
        self.title == title && same_tags(&self.tags, tags)
    }
}

/// Query parameters for listing notes.
#[derive(Debug, Default, Clone)]
pub struct NoteQuery {
    /// Only notes carrying every one of these tags.
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
}

/// Tag with note count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

/// Trim a title and reject it if nothing is left.
pub fn validate_title(title: &str) -> Result<String, Error> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::Validation("title cannot be empty".into()));
    }
    Ok(title.to_string())
}

/// Normalize tags: trim, lowercase, drop empties, collapse duplicates.
/// The first occurrence keeps its position.
pub fn normalize_tags<T: AsRef<str>>(tags: &[T]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Compare two tag lists as sets.
pub fn same_tags(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_tags() {
        let normalized = normalize_tags(&["Work", "work", " Urgent "]);
        assert_eq!(normalized, tags(&["work", "urgent"]));
        assert!(same_tags(&normalized, &tags(&["urgent", "work"])));
    }

    #[test]
    fn test_normalize_tags_drops_empty() {
        assert!(normalize_tags(&["", "   "]).is_empty());
    }

    #[test]
    fn test_same_tags_ignores_order() {
        assert!(same_tags(&tags(&["a", "b"]), &tags(&["b", "a"])));
        assert!(!same_tags(&tags(&["a", "b"]), &tags(&["a"])));
        assert!(same_tags(&[], &[]));
    }

    #[test]
    fn test_new_note_rejects_empty_title() {
        let err = Note::new("   ", &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_new_note_is_local_only() {
        let note = Note::new("  Buy milk ", &tags(&["Errand"])).unwrap();
        assert_eq!(note.title, "Buy milk");
        assert_eq!(note.tags, tags(&["errand"]));
        assert_eq!(note.sync_state(), SyncState::LocalOnly);
        assert_eq!(note.pending_delete, Pending::NotApplicable);
        assert_eq!(note.pending_edit, Pending::NotApplicable);
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_confirmed_never_reassigns_server_id() {
        let note = Note::new("Title", &[]).unwrap();
        let now = Utc::now();
        let note = note.confirmed(ServerId::new("a"), now);
        assert_eq!(note.sync_state(), SyncState::Synced);
        let note = note.confirmed(ServerId::new("b"), now);
        assert_eq!(note.server_id, Some(ServerId::new("a")));
    }

    #[test]
    fn test_sync_state_prefers_delete() {
        let mut note = Note::new("Title", &[]).unwrap().confirmed(ServerId::new("x"), Utc::now());
        note.pending_edit = Pending::Pending;
        assert_eq!(note.sync_state(), SyncState::PendingEdit);
        note.pending_delete = Pending::Pending;
        assert_eq!(note.sync_state(), SyncState::PendingDelete);
        assert!(note.is_tombstone());
    }

    #[test]
    fn test_local_id_round_trips_through_string() {
        let id = LocalId::new();
        let parsed: LocalId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<LocalId>().is_err());
    }
}
