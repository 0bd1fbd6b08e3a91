/// Boxed error used to carry a backend failure without losing its cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named object does not exist. Every backend's native not-found
    /// signal is normalized into this variant.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The caller misused the API: malformed location descriptor, unknown
    /// codec, a starting point outside the walked prefix.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// The caller fired the operation's cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other failure reported by the backend, with the scope it
    /// happened in.
    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: BoxError,
    },

    /// I/O error from the local filesystem or a stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wrap an opaque backend failure with diagnostic context.
    pub fn upstream(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upstream {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn invalid_usage(message: impl Into<String>) -> Self {
        Self::InvalidUsage(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn upstream_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = StoreError::upstream("listing objects under \"data/\"", cause);
        assert_eq!(
            err.to_string(),
            "listing objects under \"data/\": socket closed"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn not_found_predicate() {
        assert!(StoreError::NotFound("a".into()).is_not_found());
        assert!(!StoreError::Cancelled.is_not_found());
    }
}
