//! Error types for transfer sessions.

/// Alias for `Result<T, lfs_swift::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Session-level failures. Every variant ends the session.
///
/// A single object that fails to transfer is not an `Error`: storage
/// backends report it as a failed [`Outcome`](crate::Outcome) and the
/// session moves on to the next request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The control channel carried an invalid or unexpected message.
    #[error(transparent)]
    Protocol(#[from] lfs_swift_proto::Error),

    /// `action.href` has no `/` separating storage URL and container.
    #[error("invalid container URL: {0}")]
    InvalidHref(String),

    /// The storage backend rejected the credentials.
    #[error("storage rejected credentials: {0}")]
    Unauthorized(String),

    /// The storage backend failed outside of any single object.
    #[error("storage error: {0}")]
    Storage(String),

    /// A local resource the session depends on is unusable.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
