use std::sync::Arc;
use thiserror::Error;

/// The value a future ultimately holds: a success or an [`Error`].
pub type Fallible<T> = Result<T, Error>;

/// Failure delivered through a future or channel.
///
/// Cancellation is not a separate branch. It is the [`Error::Cancelled`]
/// failure, so every path that handles failures also handles cancellation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The canonical cancellation sentinel.
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(Arc::new(err))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Cancelled, Error::Cancelled) => true,
            (Error::Message(a), Error::Message(b)) => a == b,
            // opaque errors compare by identity of the shared allocation
            (Error::Other(a), Error::Other(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl Eq for Error {}

#[cfg(test)]
mod tests {
    use super::Error;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_cancellation_is_a_failure_kind() {
        let err = Error::Cancelled;
        assert!(err.is_cancellation());
        assert!(!Error::msg("nope").is_cancellation());
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn test_other_compares_by_identity() {
        let a = Error::other(DiskError);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Error::other(DiskError));
        assert_eq!(a.to_string(), "disk on fire");
    }

    #[test]
    fn test_message_compares_by_text() {
        assert_eq!(Error::msg("x"), Error::Message("x".into()));
        assert_ne!(Error::msg("x"), Error::Cancelled);
    }
}
