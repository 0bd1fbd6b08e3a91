use blobkit_core::{BoxError, StoreError};
use thiserror::Error;

/// Failure reported by an object client, with provider-specific not-found
/// and precondition signals already normalized.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no such key: {0}")]
    NotFound(String),

    #[error("precondition failed for key {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    Other(BoxError),
}

impl ClientError {
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Convert into the store taxonomy. `path` names the object for
    /// not-found, `context` scopes everything else.
    pub fn into_store_error(self, path: &str, context: impl Into<String>) -> StoreError {
        match self {
            Self::NotFound(_) => StoreError::NotFound(path.to_string()),
            Self::Other(source) => StoreError::upstream(context, source),
            err @ Self::PreconditionFailed(_) => StoreError::upstream(context, err),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_store_not_found() {
        let err = ClientError::NotFound("k".into()).into_store_error("base/k", "reading");
        assert!(matches!(err, StoreError::NotFound(path) if path == "base/k"));
    }

    #[test]
    fn other_keeps_context_and_cause() {
        let err = ClientError::other("connection reset").into_store_error("k", "reading \"k\"");
        assert_eq!(err.to_string(), "reading \"k\": connection reset");
    }
}
