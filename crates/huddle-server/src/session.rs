//! Per-connection session state and the outbound writer task.
//!
//! Every connection gets one writer task that owns the socket's write half.
//! Everything else talks to it through a bounded queue, so there is exactly
//! one writer per socket and a chunk sequence is never interleaved with
//! other frames.
//!
//! Queueing never waits. A connection whose queue is full has stopped
//! reading; it is evicted instead of holding up the sender.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_shared::constants::{PSEUDONYM_PREFIX, PSEUDONYM_RANGE};
use huddle_shared::{FrameError, FrameWriter};

use crate::error::ServerError;

/// Work for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(String),
    /// Written back to back, e.g. a whole chunk sequence.
    Frames(Arc<[String]>),
    /// Flush what is queued, then shut the write half down.
    Close,
}

/// Cloneable address of a connection's writer, as stored in the registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    username: Arc<str>,
    outbound: mpsc::Sender<Outbound>,
    evicted: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(username: &str, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: Arc::from(username),
            outbound,
            evicted: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue work for this connection. Fails once its writer has stopped or
    /// its queue is full.
    pub fn send(&self, item: Outbound) -> Result<(), ServerError> {
        self.outbound.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => ServerError::Backlogged,
            TrySendError::Closed(_) => ServerError::SessionClosed,
        })
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ServerError> {
        self.send(Outbound::Frame(text.into()))
    }

    /// Tell the owning handler to drop this connection.
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// Resolves once [`evict`](Self::evict) has been called, even if that
    /// happened before this future was created.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

/// An authenticated user on one connection. Owned by that connection's
/// handler; only a [`SessionHandle`] is shared.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    peer: SocketAddr,
    pseudonym: String,
    anonymous: bool,
}

impl Session {
    pub fn new(handle: SessionHandle, peer: SocketAddr) -> Self {
        Self {
            handle,
            peer,
            pseudonym: generate_pseudonym(),
            anonymous: false,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn username(&self) -> &str {
        self.handle.username()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn pseudonym(&self) -> &str {
        &self.pseudonym
    }

    /// Flip anonymity and return the new state.
    pub fn toggle_anonymous(&mut self) -> bool {
        self.anonymous = !self.anonymous;
        self.anonymous
    }

    /// Name shown to others as the sender of this session's messages.
    pub fn display_name(&self) -> &str {
        if self.anonymous {
            &self.pseudonym
        } else {
            self.username()
        }
    }
}

pub fn generate_pseudonym() -> String {
    let n = rand::thread_rng().gen_range(0..PSEUDONYM_RANGE);
    format!("{PSEUDONYM_PREFIX}{n}")
}

/// Drain `rx` into the socket until `Close`, a fatal write error, or every
/// sender is gone. Oversized items are dropped and the loop carries on.
pub async fn write_loop<W>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::Receiver<Outbound>,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        let result = match item {
            Outbound::Frame(text) => writer.write_frame(&text).await,
            Outbound::Frames(frames) => writer.write_frames(&frames[..]).await,
            Outbound::Close => break,
        };

        match result {
            Ok(()) => {}
            Err(e @ FrameError::Oversized { .. }) => {
                warn!(peer = %peer, error = %e, "Dropping outbound frame");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Writer stopped");
                break;
            }
        }
    }

    rx.close();
    if let Err(e) = writer.shutdown().await {
        debug!(peer = %peer, error = %e, "Shutdown of write half failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::constants::MAX_FRAME_SIZE;
    use huddle_shared::FrameReader;

    fn test_peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_pseudonym_is_stable_and_only_used_when_anonymous() {
        let (tx, _rx) = mpsc::channel(1);
        let mut session = Session::new(SessionHandle::new("alice", tx), test_peer());

        assert_eq!(session.display_name(), "alice");
        assert!(session.toggle_anonymous());

        let first = session.display_name().to_string();
        assert!(first.starts_with(PSEUDONYM_PREFIX));
        assert_eq!(session.display_name(), first);

        assert!(!session.toggle_anonymous());
        assert_eq!(session.display_name(), "alice");
        assert!(session.toggle_anonymous());
        assert_eq!(session.display_name(), first);
    }

    #[tokio::test]
    async fn test_writer_keeps_sequences_contiguous_and_stops_on_close() {
        let (client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(write_loop(
            FrameWriter::new(server, MAX_FRAME_SIZE),
            rx,
            test_peer(),
        ));

        let handle = SessionHandle::new("bob", tx);
        handle.send_text("one").unwrap();
        handle
            .send(Outbound::Frames(Arc::from(vec!["a".to_string(), "b".to_string()])))
            .unwrap();
        handle.send(Outbound::Close).unwrap();
        writer.await.unwrap();

        let mut reader = FrameReader::new(client, MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), "one");
        assert_eq!(reader.read_frame().await.unwrap(), "a");
        assert_eq!(reader.read_frame().await.unwrap(), "b");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::ConnectionClosed)
        ));

        assert!(matches!(
            handle.send_text("late"),
            Err(ServerError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_is_reported_without_waiting() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new("bob", tx);

        handle.send_text("one").unwrap();
        assert!(matches!(
            handle.send_text("two"),
            Err(ServerError::Backlogged)
        ));
    }

    #[tokio::test]
    async fn test_eviction_is_remembered() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new("bob", tx);

        handle.clone().evict();
        tokio::time::timeout(std::time::Duration::from_millis(100), handle.evicted())
            .await
            .unwrap();
    }
}
