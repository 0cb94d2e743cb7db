//! Server errors.
//!
//! Startup failures are the only fatal errors in this crate; everything
//! after `listen()` recovers locally (evict one consumer, drop one
//! payload) or is a logged warning.

/// Fatal server construction/startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server was already started.
    #[error("server already started")]
    AlreadyStarted,
}
