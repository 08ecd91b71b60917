//! The sync engine: push phase, then pull/merge phase.
//!
//! A refresh first lists the server, pushes pending creates and deletes, then
//! lists the server again and reconciles the local replica against that
//! post-push state. Every note-level operation runs under the store write
//! lock and re-checks the note before writing, so an interrupted or repeated
//! pass leaves the replica consistent and the next pass converges.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::merge::{plan_merge, Conflict, MergeStep, DEFAULT_CONFLICT_WINDOW_MS};
use crate::{
    ConnectivityProbe, Error, LocalId, LocalStore, NewRemoteNote, Note, Pending, RemoteStore,
    ServerId, ServerNote, SyncState,
};

/// What one refresh did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub deleted: usize,
    pub edited: usize,
    pub adopted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    /// Steps skipped because the note changed while the pass was running.
    pub skipped: usize,
    pub conflicts: Vec<Conflict>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failures.is_empty()
    }
}

/// A note whose remote call failed; it stays pending for the next refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub local_id: LocalId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RefreshOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
}

/// Marks a refresh as running; released on drop, including when the refresh
/// future is cancelled.
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Reconciles one local replica with one remote replica.
pub struct SyncEngine<S, R, P> {
    store: S,
    remote: R,
    probe: P,
    write_lock: Mutex<()>,
    in_flight: AtomicBool,
    conflict_window: Duration,
}

impl<S: LocalStore, R: RemoteStore, P: ConnectivityProbe> SyncEngine<S, R, P> {
    pub fn new(store: S, remote: R, probe: P) -> Self {
        Self {
            store,
            remote,
            probe,
            write_lock: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            conflict_window: Duration::milliseconds(DEFAULT_CONFLICT_WINDOW_MS),
        }
    }

    pub fn with_conflict_window(mut self, window: Duration) -> Self {
        self.conflict_window = window;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn is_online(&self) -> bool {
        self.probe.is_online()
    }

    /// Serializes read-modify-write cycles on the local store.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Run a full reconciliation pass.
    ///
    /// Returns `Skipped` when offline or when another refresh is running.
    /// A failed server listing aborts the pass with [`Error::Network`];
    /// whatever the push phase already applied is kept.
    pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
        if !self.probe.is_online() {
            debug!("offline, skipping refresh");
            return Ok(RefreshOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_guard) = RefreshGuard::try_acquire(&self.in_flight) else {
            debug!("refresh already in flight");
            return Ok(RefreshOutcome::Skipped(SkipReason::InFlight));
        };

        let mut report = SyncReport::default();

        let before = self.remote.list().await?;
        self.push_pending(&before, &mut report).await?;

        // Snapshot and listing are taken together so no local write can
        // confirm a note between them.
        let (local, after) = {
            let _lock = self.lock().await;
            let local = self.store.list().await?;
            let after = self.remote.list().await?;
            (local, after)
        };
        self.pull_and_merge(&local, &after, &mut report).await?;

        info!(
            created = report.created,
            deleted = report.deleted,
            edited = report.edited,
            adopted = report.adopted,
            inserted = report.inserted,
            updated = report.updated,
            removed = report.removed,
            conflicts = report.conflicts.len(),
            failures = report.failures.len(),
            "refresh complete"
        );
        Ok(RefreshOutcome::Completed(report))
    }

    /// Push phase: create local-only notes remotely and confirm pending
    /// deletes. `server` is the listing taken before pushing.
    ///
    /// Per-note network failures are recorded in `report` and do not stop
    /// the pass. Local store failures do.
    pub async fn push_pending(
        &self,
        server: &[ServerNote],
        report: &mut SyncReport,
    ) -> Result<(), Error> {
        let listed: HashSet<&ServerId> = server.iter().map(|n| &n.id).collect();
        let claimed: HashSet<LocalId> = server.iter().filter_map(|n| n.local_id).collect();

        for note in self.store.list().await? {
            match note.sync_state() {
                SyncState::PendingDelete => {
                    let still_listed = note
                        .server_id
                        .as_ref()
                        .map(|id| listed.contains(id))
                        .unwrap_or(false);
                    self.push_delete(&note, still_listed, report).await?;
                }
                SyncState::LocalOnly => {
                    if claimed.contains(&note.local_id) {
                        // created on an earlier attempt whose response was lost;
                        // the merge phase adopts it
                        debug!(local_id = %note.local_id, "server already has note, not re-creating");
                        continue;
                    }
                    self.push_create(&note, report).await?;
                }
                SyncState::Synced | SyncState::PendingEdit => {}
            }
        }
        Ok(())
    }

    async fn push_create(&self, snapshot: &Note, report: &mut SyncReport) -> Result<(), Error> {
        let _lock = self.lock().await;
        if !self.unchanged(snapshot).await? {
            report.skipped += 1;
            return Ok(());
        }
        match self.create_remote(snapshot).await {
            Ok(confirmed) => {
                self.store.put(&confirmed).await?;
                report.created += 1;
            }
            Err(e) => report.failures.push(failure(snapshot, e)),
        }
        Ok(())
    }

    async fn push_delete(
        &self,
        snapshot: &Note,
        still_listed: bool,
        report: &mut SyncReport,
    ) -> Result<(), Error> {
        let _lock = self.lock().await;
        if !self.unchanged(snapshot).await? {
            report.skipped += 1;
            return Ok(());
        }
        if still_listed {
            if let Err(e) = self.delete_remote(snapshot).await {
                report.failures.push(failure(snapshot, e));
                return Ok(());
            }
        } else {
            debug!(local_id = %snapshot.local_id, "server copy already gone, dropping tombstone");
        }
        self.store.delete(&snapshot.local_id).await?;
        report.deleted += 1;
        Ok(())
    }

    /// Pull/merge phase against the post-push server listing.
    ///
    /// `local` must be a snapshot of the store taken before `server` was
    /// listed. Only notes in that snapshot can be removed as deleted
    /// remotely.
    pub async fn pull_and_merge(
        &self,
        local: &[Note],
        server: &[ServerNote],
        report: &mut SyncReport,
    ) -> Result<(), Error> {
        let plan = plan_merge(local, server, self.conflict_window, Utc::now());

        for conflict in &plan.conflicts {
            warn!(
                kind = ?conflict.kind,
                local_id = %conflict.local_id,
                server_id = %conflict.server_id,
                local_title = %conflict.local_title,
                server_title = ?conflict.server_title,
                local_updated_at = %conflict.local_updated_at,
                server_updated_at = ?conflict.server_updated_at,
                "conflict detected"
            );
        }
        report.conflicts.extend(plan.conflicts);

        for step in plan.steps {
            self.apply_step(step, report).await?;
        }
        Ok(())
    }

    async fn apply_step(&self, step: MergeStep, report: &mut SyncReport) -> Result<(), Error> {
        let _lock = self.lock().await;
        if let Some(before) = step.before() {
            if !self.unchanged(before).await? {
                debug!(local_id = %before.local_id, "note changed during refresh, skipping");
                report.skipped += 1;
                return Ok(());
            }
        }

        if let MergeStep::Insert(note) = &step {
            if self.knows_server_id(note.server_id.as_ref()).await? {
                debug!(server_id = ?note.server_id, "confirmed locally during refresh, not inserting");
                report.skipped += 1;
                return Ok(());
            }
        }

        match step {
            MergeStep::Adopt { mut after, .. } => {
                debug!(local_id = %after.local_id, server_id = ?after.server_id, "adopting");
                if after.pending_edit.is_pending() {
                    // edited after the lost create; stays pending if this fails
                    match self.update_remote(&after).await {
                        Ok(()) => {
                            after.pending_edit = Pending::NotPending;
                            after.updated_at = Utc::now();
                            report.edited += 1;
                        }
                        Err(e) => report.failures.push(failure(&after, e)),
                    }
                }
                self.store.put(&after).await?;
                report.adopted += 1;
            }
            MergeStep::Insert(note) => {
                debug!(local_id = %note.local_id, server_id = ?note.server_id, "inserting");
                self.store.put(&note).await?;
                report.inserted += 1;
            }
            MergeStep::PushEdit { before, after } => {
                match self.update_remote(&before).await {
                    Ok(()) => report.edited += 1,
                    Err(Error::NotFound(_)) => {
                        debug!(local_id = %before.local_id, "server copy gone, clearing pending edit");
                    }
                    Err(e) => {
                        report.failures.push(failure(&before, e));
                        return Ok(());
                    }
                }
                self.store.put(&after).await?;
            }
            MergeStep::TakeServer { after, .. } => {
                debug!(local_id = %after.local_id, "taking server copy");
                self.store.put(&after).await?;
                report.updated += 1;
            }
            MergeStep::Remove { before } => {
                debug!(local_id = %before.local_id, "removed on server");
                self.store.delete(&before.local_id).await?;
                report.removed += 1;
            }
        }
        Ok(())
    }

    /// True if some stored note already carries `server_id`.
    async fn knows_server_id(&self, server_id: Option<&ServerId>) -> Result<bool, Error> {
        let Some(server_id) = server_id else {
            return Ok(false);
        };
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .any(|n| n.server_id.as_ref() == Some(server_id)))
    }

    /// True if the stored copy still equals `snapshot`.
    async fn unchanged(&self, snapshot: &Note) -> Result<bool, Error> {
        let current = self.store.get(&snapshot.local_id).await?;
        Ok(current.as_ref() == Some(snapshot))
    }

    /// Create `note` remotely and return it confirmed. Does not write locally.
    pub(crate) async fn create_remote(&self, note: &Note) -> Result<Note, Error> {
        let server_id = self
            .remote
            .create(&NewRemoteNote::from(note))
            .await
            .map_err(|e| log_remote("create", note, e))?;
        debug!(local_id = %note.local_id, server_id = %server_id, "created remotely");
        Ok(note.clone().confirmed(server_id, Utc::now()))
    }

    /// Delete the remote copy of `note`. An already deleted copy counts as success.
    pub(crate) async fn delete_remote(&self, note: &Note) -> Result<(), Error> {
        let Some(server_id) = note.server_id.as_ref() else {
            return Ok(());
        };
        match self.remote.delete(server_id).await {
            Ok(()) | Err(Error::NotFound(_)) => {
                debug!(local_id = %note.local_id, server_id = %server_id, "deleted remotely");
                Ok(())
            }
            Err(e) => Err(log_remote("delete", note, e)),
        }
    }

    /// Send the note's title and tags to its remote copy.
    pub(crate) async fn update_remote(&self, note: &Note) -> Result<(), Error> {
        let Some(server_id) = note.server_id.as_ref() else {
            return Ok(());
        };
        self.remote
            .update(server_id, &note.title, &note.tags)
            .await
            .map_err(|e| log_remote("update", note, e))?;
        debug!(local_id = %note.local_id, server_id = %server_id, "updated remotely");
        Ok(())
    }
}

fn log_remote(op: &str, note: &Note, e: Error) -> Error {
    if !e.is_not_found() {
        warn!(local_id = %note.local_id, error = %e, "remote {} failed", op);
    }
    e
}

fn failure(note: &Note, e: Error) -> SyncFailure {
    SyncFailure {
        local_id: note.local_id,
        message: e.to_string(),
    }
}
