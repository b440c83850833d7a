use thiserror::Error;

/// Error taxonomy for store operations.
///
/// `NotFound` is a first-class case so call sites can branch on "nothing to
/// do" versus "the store is down"; it is never folded into `Unavailable`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport, auth or service fault from the backing store.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// Logical absence of an expected entity.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Entity <-> row conversion failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
