use notesync_core::{Error, NewRemoteNote, RemoteStore, ServerId, ServerNote};
use notesync_http::HttpRemote;

/// The remote store as configured: an HTTP server, or none at all.
pub enum Remote {
    Http(HttpRemote),
    Unconfigured,
}

impl Remote {
    pub fn is_configured(&self) -> bool {
        matches!(self, Remote::Http(_))
    }

    pub async fn ping(&self) -> bool {
        match self {
            Remote::Http(remote) => remote.ping().await,
            Remote::Unconfigured => false,
        }
    }

    fn http(&self) -> Result<&HttpRemote, Error> {
        match self {
            Remote::Http(remote) => Ok(remote),
            Remote::Unconfigured => Err(Error::Network("no server configured".into())),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl RemoteStore for Remote {
    async fn create(&self, note: &NewRemoteNote) -> Result<ServerId, Error> {
        self.http()?.create(note).await
    }

    async fn list(&self) -> Result<Vec<ServerNote>, Error> {
        self.http()?.list().await
    }

    async fn update(&self, id: &ServerId, title: &str, tags: &[String]) -> Result<(), Error> {
        self.http()?.update(id, title, tags).await
    }

    async fn delete(&self, id: &ServerId) -> Result<(), Error> {
        self.http()?.delete(id).await
    }
}
