//! notesync core library - note model, store traits, and the sync engine.
//!
//! This crate does no disk or network I/O itself. The local replica and the
//! remote store are reached through the [`LocalStore`] and [`RemoteStore`]
//! traits; backends live in their own crates.

mod connectivity;
mod error;
pub mod merge;
mod note;
mod remote;
mod service;
mod store;
mod sync;

#[cfg(test)]
mod testing;

pub use connectivity::{ConnectivityFlag, ConnectivityProbe};
pub use error::Error;
pub use merge::{plan_merge, Conflict, ConflictKind, MergePlan, MergeStep};
pub use note::{
    normalize_tags, same_tags, validate_title, LocalId, Note, NoteQuery, Pending, ServerId,
    SyncState, TagCount,
};
pub use remote::{NewRemoteNote, RemoteStore, ServerNote};
pub use service::{NoteService, StatusCounts};
pub use store::LocalStore;
pub use sync::{RefreshOutcome, SkipReason, SyncEngine, SyncFailure, SyncReport};
