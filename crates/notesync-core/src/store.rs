use crate::{Error, LocalId, Note};

/// Durable key-value storage for the local replica, keyed by [`LocalId`].
///
/// Uses `async_trait` with `?Send` bound so backends can hold non-`Send` handles.
#[async_trait::async_trait(?Send)]
pub trait LocalStore {
    /// Get a note by local ID, tombstones included.
    async fn get(&self, local_id: &LocalId) -> Result<Option<Note>, Error>;

    /// List every note in the replica, tombstones included. Order is unspecified.
    async fn list(&self) -> Result<Vec<Note>, Error>;

    /// Insert or replace a note by local ID.
    async fn put(&self, note: &Note) -> Result<(), Error>;

    /// Physically remove a note. Returns true if it existed.
    async fn delete(&self, local_id: &LocalId) -> Result<bool, Error>;
}
