//! In-memory replicas for exercising the engine without disk or network.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::{Error, LocalId, LocalStore, NewRemoteNote, Note, RemoteStore, ServerId, ServerNote};

#[derive(Clone, Default)]
pub struct MemoryStore {
    notes: Arc<Mutex<BTreeMap<LocalId, Note>>>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> Vec<Note> {
        self.notes.lock().unwrap().values().cloned().collect()
    }

    pub fn insert(&self, note: Note) {
        self.notes.lock().unwrap().insert(note.local_id, note);
    }
}

#[async_trait::async_trait(?Send)]
impl LocalStore for MemoryStore {
    async fn get(&self, local_id: &LocalId) -> Result<Option<Note>, Error> {
        Ok(self.notes.lock().unwrap().get(local_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Note>, Error> {
        Ok(self.snapshot())
    }

    async fn put(&self, note: &Note) -> Result<(), Error> {
        self.insert(note.clone());
        Ok(())
    }

    async fn delete(&self, local_id: &LocalId) -> Result<bool, Error> {
        Ok(self.notes.lock().unwrap().remove(local_id).is_some())
    }
}

#[derive(Default)]
struct RemoteState {
    notes: Vec<ServerNote>,
    next_id: u64,
    fail_all: bool,
    fail_creates: bool,
    fail_updates: bool,
    fail_deletes: bool,
    lose_create_responses: bool,
    fail_lists_after: Option<usize>,
    creates: usize,
    updates: usize,
    deletes: usize,
    lists: usize,
}

/// A server replica with switches for injecting failures.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn notes(&self) -> Vec<ServerNote> {
        let mut notes = self.state.lock().unwrap().notes.clone();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notes
    }

    pub fn seed(&self, note: ServerNote) {
        self.state.lock().unwrap().notes.push(note);
    }

    pub fn find(&self, id: &ServerId) -> Option<ServerNote> {
        self.state
            .lock()
            .unwrap()
            .notes
            .iter()
            .find(|n| &n.id == id)
            .cloned()
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_creates = fail;
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_updates = fail;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    /// Apply creates on the server but report a network error to the caller.
    pub fn set_lose_create_responses(&self, lose: bool) {
        self.state.lock().unwrap().lose_create_responses = lose;
    }

    /// Let `n` more listings succeed, then fail every listing.
    pub fn set_fail_lists_after(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_lists_after = Some(state.lists + n);
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn updates(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub fn deletes(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    pub fn lists(&self) -> usize {
        self.state.lock().unwrap().lists
    }
}

fn unreachable() -> Error {
    Error::Network("server unreachable".into())
}

#[async_trait::async_trait(?Send)]
impl RemoteStore for MemoryRemote {
    async fn create(&self, note: &NewRemoteNote) -> Result<ServerId, Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all || state.fail_creates {
            return Err(unreachable());
        }
        state.next_id += 1;
        state.creates += 1;
        let id = ServerId::new(format!("srv-{}", state.next_id));
        state.notes.push(ServerNote {
            id: id.clone(),
            local_id: Some(note.local_id),
            title: note.title.clone(),
            tags: note.tags.clone(),
            created_at: note.created_at,
            updated_at: Utc::now(),
        });
        if state.lose_create_responses {
            return Err(Error::Network("connection reset".into()));
        }
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<ServerNote>, Error> {
        {
            let mut state = self.state.lock().unwrap();
            let exhausted = state.fail_lists_after.is_some_and(|n| state.lists >= n);
            if state.fail_all || exhausted {
                return Err(unreachable());
            }
            state.lists += 1;
        }
        Ok(self.notes())
    }

    async fn update(&self, id: &ServerId, title: &str, tags: &[String]) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all || state.fail_updates {
            return Err(unreachable());
        }
        let note = state
            .notes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| Error::NotFound(format!("note {}", id)))?;
        note.title = title.to_string();
        note.tags = tags.to_vec();
        note.updated_at = Utc::now();
        state.updates += 1;
        Ok(())
    }

    async fn delete(&self, id: &ServerId) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all || state.fail_deletes {
            return Err(unreachable());
        }
        let before = state.notes.len();
        state.notes.retain(|n| &n.id != id);
        if state.notes.len() == before {
            return Err(Error::NotFound(format!("note {}", id)));
        }
        state.deletes += 1;
        Ok(())
    }
}
