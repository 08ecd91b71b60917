use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, LocalId, Note, ServerId};

/// Payload for creating a note remotely. The local ID is round-tripped so a
/// later pull can match the server copy back to the note that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteNote {
    pub local_id: LocalId,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Note> for NewRemoteNote {
    fn from(note: &Note) -> Self {
        Self {
            local_id: note.local_id,
            title: note.title.clone(),
            tags: note.tags.clone(),
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

/// A note as the remote store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerNote {
    pub id: ServerId,
    #[serde(default)]
    pub local_id: Option<LocalId>,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authoritative replica.
#[async_trait::async_trait(?Send)]
pub trait RemoteStore {
    /// Create a note and return the identifier the server assigned.
    async fn create(&self, note: &NewRemoteNote) -> Result<ServerId, Error>;

    /// List every note, newest first by creation time.
    async fn list(&self) -> Result<Vec<ServerNote>, Error>;

    /// Replace title and tags. Fails with [`Error::NotFound`] for unknown ids.
    async fn update(&self, id: &ServerId, title: &str, tags: &[String]) -> Result<(), Error>;

    /// Delete a note. Fails with [`Error::NotFound`] if it is already gone.
    async fn delete(&self, id: &ServerId) -> Result<(), Error>;
}
