//! Pure reconciliation of the local replica against a server listing.
//!
//! [`plan_merge`] never touches a store. It looks at a snapshot of both
//! replicas and returns one [`MergeStep`] per note that needs to change,
//! plus any conflicts it noticed. The sync engine applies the steps one note
//! at a time.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{normalize_tags, LocalId, Note, Pending, ServerId, ServerNote};

/// Default width of the near-simultaneous edit window.
pub const DEFAULT_CONFLICT_WINDOW_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both replicas changed the note within the conflict window.
    SimultaneousEdit,
    /// The server dropped a note that still had an unsent local edit.
    DeletedRemotely,
}

/// A detected divergence. Reported only; resolution follows the fixed policy
/// (pending local edit wins, remote deletion wins).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub local_id: LocalId,
    pub server_id: ServerId,
    pub local_title: String,
    pub local_tags: Vec<String>,
    pub local_updated_at: DateTime<Utc>,
    pub server_title: Option<String>,
    pub server_tags: Option<Vec<String>>,
    pub server_updated_at: Option<DateTime<Utc>>,
}

/// One note-level change. `before` is the snapshot the step was planned
/// against; the engine skips the step if the stored note no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStep {
    /// A local-only note the server now knows about: stamp its server id.
    /// The local title is kept; a local change made after the create reached
    /// the server leaves `after` with a pending edit.
    Adopt { before: Note, after: Note },
    /// A server note with no local counterpart.
    Insert(Note),
    /// A pending local edit to send again. `after` is the note once the
    /// server accepted it.
    PushEdit { before: Note, after: Note },
    /// No local intent outstanding: take the server's content.
    TakeServer { before: Note, after: Note },
    /// The server no longer has this note.
    Remove { before: Note },
}

impl MergeStep {
    pub fn local_id(&self) -> LocalId {
        match self {
            MergeStep::Adopt { before, .. }
            | MergeStep::PushEdit { before, .. }
            | MergeStep::TakeServer { before, .. }
            | MergeStep::Remove { before } => before.local_id,
            MergeStep::Insert(note) => note.local_id,
        }
    }

    pub fn before(&self) -> Option<&Note> {
        match self {
            MergeStep::Adopt { before, .. }
            | MergeStep::PushEdit { before, .. }
            | MergeStep::TakeServer { before, .. }
            | MergeStep::Remove { before } => Some(before),
            MergeStep::Insert(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub steps: Vec<MergeStep>,
    pub conflicts: Vec<Conflict>,
}

/// Flag a pending local edit that differs from the server copy when both
/// were updated within `window` of each other.
pub fn detect_conflict(local: &Note, server: &ServerNote, window: Duration) -> Option<Conflict> {
    if !local.pending_edit.is_pending() {
        return None;
    }
    if local.has_content(&server.title, &normalize_tags(&server.tags)) {
        return None;
    }
    let gap = if local.updated_at > server.updated_at {
        local.updated_at - server.updated_at
    } else {
        server.updated_at - local.updated_at
    };
    if gap >= window {
        return None;
    }
    Some(Conflict {
        kind: ConflictKind::SimultaneousEdit,
        local_id: local.local_id,
        server_id: server.id.clone(),
        local_title: local.title.clone(),
        local_tags: local.tags.clone(),
        local_updated_at: local.updated_at,
        server_title: Some(server.title.clone()),
        server_tags: Some(server.tags.clone()),
        server_updated_at: Some(server.updated_at),
    })
}

/// Reconcile a local note already matched to `server` by server id.
fn reconcile(local: &Note, server: &ServerNote, now: DateTime<Utc>) -> Option<MergeStep> {
    if local.is_tombstone() {
        // the push phase owns tombstones
        return None;
    }
    if local.pending_edit.is_pending() {
        let mut after = local.clone();
        after.pending_edit = Pending::NotPending;
        after.updated_at = now;
        return Some(MergeStep::PushEdit {
            before: local.clone(),
            after,
        });
    }
    let after = take_server(local, server);
    if after == *local {
        return None;
    }
    Some(MergeStep::TakeServer {
        before: local.clone(),
        after,
    })
}

fn take_server(local: &Note, server: &ServerNote) -> Note {
    let mut after = local.clone();
    after.title = server.title.clone();
    after.tags = normalize_tags(&server.tags);
    after.updated_at = server.updated_at;
    after.pending_edit = Pending::NotPending;
    after.pending_delete = Pending::NotPending;
    after
}

/// Confirm a local-only note against the server copy its create produced.
fn adopted(local: &Note, server: &ServerNote) -> Note {
    let server_tags = normalize_tags(&server.tags);
    if local.has_content(&server.title, &server_tags) {
        let mut after = local.clone().confirmed(server.id.clone(), server.updated_at);
        after.tags = server_tags;
        return after;
    }
    // edited locally after the create landed: keep the edit and push it
    let mut after = local.clone().confirmed(server.id.clone(), local.updated_at);
    after.pending_edit = Pending::Pending;
    after
}

fn inserted(server: &ServerNote) -> Note {
    Note {
        local_id: LocalId::new(),
        server_id: Some(server.id.clone()),
        title: server.title.clone(),
        tags: normalize_tags(&server.tags),
        created_at: server.created_at,
        updated_at: server.updated_at,
        pending_delete: Pending::NotPending,
        pending_edit: Pending::NotPending,
    }
}

/// Plan the pull/merge phase.
///
/// Server notes are matched by server id first, then (for notes this device
/// created but never saw confirmed) by the local id carried in the server
/// payload. Anything left unmatched on the server side is inserted; anything
/// with a server id that the server no longer lists is removed.
pub fn plan_merge(
    local: &[Note],
    server: &[ServerNote],
    window: Duration,
    now: DateTime<Utc>,
) -> MergePlan {
    let mut plan = MergePlan::default();

    let by_server_id: HashMap<&ServerId, &Note> = local
        .iter()
        .filter_map(|n| n.server_id.as_ref().map(|id| (id, n)))
        .collect();
    let unconfirmed: HashMap<LocalId, &Note> = local
        .iter()
        .filter(|n| n.server_id.is_none())
        .map(|n| (n.local_id, n))
        .collect();
    let mut claimed: HashSet<LocalId> = HashSet::new();

    for remote in server {
        if let Some(existing) = by_server_id.get(&remote.id) {
            if let Some(conflict) = detect_conflict(existing, remote, window) {
                plan.conflicts.push(conflict);
            }
            if let Some(step) = reconcile(existing, remote, now) {
                plan.steps.push(step);
            }
            continue;
        }

        let candidate = remote
            .local_id
            .and_then(|id| unconfirmed.get(&id).copied())
            .filter(|n| !claimed.contains(&n.local_id));

        match candidate {
            Some(unsynced) => {
                claimed.insert(unsynced.local_id);
                plan.steps.push(MergeStep::Adopt {
                    before: unsynced.clone(),
                    after: adopted(unsynced, remote),
                });
            }
            None => plan.steps.push(MergeStep::Insert(inserted(remote))),
        }
    }

    let listed: HashSet<&ServerId> = server.iter().map(|n| &n.id).collect();
    for note in local {
        let Some(server_id) = note.server_id.as_ref() else {
            continue;
        };
        if listed.contains(server_id) {
            continue;
        }
        if note.pending_edit.is_pending() && !note.is_tombstone() {
            plan.conflicts.push(Conflict {
                kind: ConflictKind::DeletedRemotely,
                local_id: note.local_id,
                server_id: server_id.clone(),
                local_title: note.title.clone(),
                local_tags: note.tags.clone(),
                local_updated_at: note.updated_at,
                server_title: None,
                server_tags: None,
                server_updated_at: None,
            });
        }
        plan.steps.push(MergeStep::Remove {
            before: note.clone(),
        });
    }

    plan
}
