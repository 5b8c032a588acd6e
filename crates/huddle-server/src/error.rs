use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The session's writer has shut down; the peer is gone.
    #[error("Session closed")]
    SessionClosed,

    /// The session's outbound queue is full; the peer has stopped reading.
    #[error("Outbound queue full")]
    Backlogged,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
