use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote call failed or timed out. Never fatal for sync: the note
    /// keeps its pending state and is retried on the next refresh.
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The local replica could not be read or written.
    #[error("local store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
