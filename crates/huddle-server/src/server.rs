//! TCP acceptor.
//!
//! One task per accepted connection. Stopping closes the listening socket
//! and then waits for the live sessions to end on their own.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::handler::{handle_connection, SessionContext};

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
}

impl Server {
    pub async fn bind(addr: SocketAddr, ctx: SessionContext) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `stop` resolves, then drain live sessions.
    pub async fn run<F>(self, stop: F)
    where
        F: Future<Output = ()>,
    {
        let Server { listener, ctx } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                () = &mut stop => {
                    info!("Stop requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        sessions.spawn(handle_connection(stream, peer, ctx.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        drop(listener);
        info!(remaining = sessions.len(), "Listener closed, waiting for sessions to end");

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Session task failed");
            }
        }
        info!("All sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::constants::MAX_FRAME_SIZE;
    use huddle_shared::{FrameReader, FrameWriter};
    use huddle_store::{CredentialStore, Journal};
    use tempfile::TempDir;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_stop_closes_listener_but_keeps_sessions() {
        let dir = TempDir::new().unwrap();
        let credentials = CredentialStore::open(dir.path().join("users.txt"))
            .await
            .unwrap();
        credentials.register("alice", "pw").await.unwrap();
        let journal = Journal::new(dir.path().join("journal.txt"));
        let ctx = SessionContext::new(ServerConfig::default(), credentials, journal);

        let server = Server::bind(([127, 0, 0, 1], 0).into(), ctx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let (read_half, write_half) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut reader = FrameReader::new(read_half, MAX_FRAME_SIZE);
        let mut writer = FrameWriter::new(write_half, MAX_FRAME_SIZE);

        writer.write_frame("alice,pw").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), "success");
        assert_eq!(reader.read_frame().await.unwrap(), "alice 加入了聊天室");

        stop_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());

        writer.write_frame("@@list").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), "在线用户：alice");
        assert!(!running.is_finished());

        writer.write_frame("##exit").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }
}
