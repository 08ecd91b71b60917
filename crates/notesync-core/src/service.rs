use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::{
    normalize_tags, validate_title, ConnectivityProbe, Error, LocalId, LocalStore, Note,
    NoteQuery, Pending, RefreshOutcome, RemoteStore, SyncEngine, SyncState, TagCount,
};

/// Number of notes in each sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub local_only: usize,
    pub synced: usize,
    pub pending_edit: usize,
    pub pending_delete: usize,
}

/// The note commands a UI invokes. Local writes always happen first;
/// remote calls are opportunistic and never fail a command.
pub struct NoteService<S, R, P> {
    engine: SyncEngine<S, R, P>,
}

impl<S: LocalStore, R: RemoteStore, P: ConnectivityProbe> NoteService<S, R, P> {
    pub fn new(store: S, remote: R, probe: P) -> Self {
        Self {
            engine: SyncEngine::new(store, remote, probe),
        }
    }

    pub fn with_conflict_window(self, window: Duration) -> Self {
        Self {
            engine: self.engine.with_conflict_window(window),
        }
    }

    pub fn engine(&self) -> &SyncEngine<S, R, P> {
        &self.engine
    }

    /// Build a new local-only note. No I/O.
    pub fn create_note(&self, title: &str, tags: &[String]) -> Result<Note, Error> {
        Note::new(title, tags)
    }

    /// Store a note locally, then try to create it remotely.
    ///
    /// Returns the note as stored. A failed remote create leaves it local-only
    /// for the next refresh.
    pub async fn submit_note(&self, mut note: Note) -> Result<Note, Error> {
        let _lock = self.engine.lock().await;
        note.updated_at = Utc::now();
        self.engine.store().put(&note).await?;

        if note.server_id.is_some() || !self.engine.is_online() {
            return Ok(note);
        }
        match self.engine.create_remote(&note).await {
            Ok(confirmed) => {
                self.engine.store().put(&confirmed).await?;
                Ok(confirmed)
            }
            Err(e) => {
                debug!(local_id = %note.local_id, error = %e, "left local-only");
                Ok(note)
            }
        }
    }

    /// Delete a note. Returns false if there was no visible note to delete.
    ///
    /// Local-only notes are removed outright. A note with a remote copy is
    /// removed once the remote delete succeeds; offline, or if the remote
    /// delete fails, it becomes a tombstone for the next refresh.
    pub async fn delete_note(&self, local_id: &LocalId) -> Result<bool, Error> {
        let _lock = self.engine.lock().await;
        let Some(mut note) = self.engine.store().get(local_id).await? else {
            return Ok(false);
        };
        if note.is_tombstone() {
            return Ok(false);
        }
        if note.server_id.is_none() {
            return self.engine.store().delete(local_id).await;
        }

        if self.engine.is_online() && self.engine.delete_remote(&note).await.is_ok() {
            self.engine.store().delete(local_id).await?;
            return Ok(true);
        }

        note.pending_delete = Pending::Pending;
        note.updated_at = Utc::now();
        self.engine.store().put(&note).await?;
        Ok(true)
    }

    /// Change a note's title and, if given, its tags.
    pub async fn edit_note(
        &self,
        local_id: &LocalId,
        title: &str,
        tags: Option<&[String]>,
    ) -> Result<Note, Error> {
        let title = validate_title(title)?;
        let _lock = self.engine.lock().await;
        let mut note = match self.engine.store().get(local_id).await? {
            Some(note) if !note.is_tombstone() => note,
            _ => return Err(Error::NotFound(format!("note {}", local_id))),
        };

        note.title = title;
        if let Some(tags) = tags {
            note.tags = normalize_tags(tags);
        }
        note.updated_at = Utc::now();

        if note.server_id.is_none() {
            self.engine.store().put(&note).await?;
            return Ok(note);
        }

        // durable pending marker before any network attempt
        note.pending_edit = Pending::Pending;
        self.engine.store().put(&note).await?;

        if !self.engine.is_online() {
            return Ok(note);
        }
        match self.engine.update_remote(&note).await {
            Ok(()) | Err(Error::NotFound(_)) => {
                note.pending_edit = Pending::NotPending;
                note.updated_at = Utc::now();
                self.engine.store().put(&note).await?;
            }
            Err(e) => {
                warn!(local_id = %note.local_id, error = %e, "edit left pending");
            }
        }
        Ok(note)
    }

    /// Get a note by local ID. Tombstones read as absent.
    pub async fn get_note(&self, local_id: &LocalId) -> Result<Option<Note>, Error> {
        let note = self.engine.store().get(local_id).await?;
        Ok(note.filter(|n| !n.is_tombstone()))
    }

    /// List visible notes, newest first by creation time.
    pub async fn list_notes(&self, query: NoteQuery) -> Result<Vec<Note>, Error> {
        let wanted = query.tags.as_deref().map(normalize_tags).unwrap_or_default();
        let mut notes: Vec<Note> = self
            .engine
            .store()
            .list()
            .await?
            .into_iter()
            .filter(|n| !n.is_tombstone())
            .filter(|n| wanted.iter().all(|t| n.tags.contains(t)))
            .collect();
        notes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        if let Some(limit) = query.limit {
            notes.truncate(limit);
        }
        Ok(notes)
    }

    /// List all tags on visible notes with their counts.
    pub async fn list_tags(&self) -> Result<Vec<TagCount>, Error> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for note in self.list_notes(NoteQuery::default()).await? {
            for tag in note.tags {
                *counts.entry(tag).or_default() += 1;
            }
        }
        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(name, count)| TagCount { name, count })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(tags)
    }

    /// Reconcile with the remote store.
    pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
        self.engine.refresh().await
    }

    /// Count notes per sync state, tombstones included.
    pub async fn status(&self) -> Result<StatusCounts, Error> {
        let mut counts = StatusCounts::default();
        for note in self.engine.store().list().await? {
            match note.sync_state() {
                SyncState::LocalOnly => counts.local_only += 1,
                SyncState::Synced => counts.synced += 1,
                SyncState::PendingEdit => counts.pending_edit += 1,
                SyncState::PendingDelete => counts.pending_delete += 1,
            }
        }
        Ok(counts)
    }
}
