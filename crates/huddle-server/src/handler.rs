//! Per-connection state machine: unauthenticated, then authenticated, then
//! closed.
//!
//! The read half stays with the handler task. The write half belongs to a
//! spawned [`write_loop`] fed through the session's outbound queue, so
//! replies from this task and deliveries from other sessions share one
//! writer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use huddle_shared::replies;
use huddle_shared::{
    AuthRequest, Feed, FrameReader, FrameWriter, LogicalMessage, ProtocolError, Reassembler,
};
use huddle_store::{CredentialStore, Journal, StoreError};

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::router::{Disposition, LeaveReason, Router};
use crate::session::{write_loop, Outbound, Session, SessionHandle};

/// Everything a connection handler needs, shared across all connections.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub registry: SessionRegistry,
    pub credentials: Arc<CredentialStore>,
    pub router: Arc<Router>,
}

impl SessionContext {
    pub fn new(config: ServerConfig, credentials: CredentialStore, journal: Journal) -> Self {
        let registry = SessionRegistry::new();
        let router = Router::new(
            registry.clone(),
            Arc::new(journal),
            config.chunk_size,
            config.max_frame_size,
        );
        Self {
            config: Arc::new(config),
            registry,
            credentials: Arc::new(credentials),
            router: Arc::new(router),
        }
    }

    pub fn journal(&self) -> &Journal {
        self.router.journal()
    }
}

/// Drive one client connection until it closes.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, ctx: SessionContext)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let max_frame_size = ctx.config.max_frame_size;
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, max_frame_size);

    let (tx, rx) = mpsc::channel(ctx.config.outbound_queue);
    let writer = tokio::spawn(write_loop(
        FrameWriter::new(write_half, max_frame_size),
        rx,
        peer,
    ));

    debug!(peer = %peer, "Connection accepted");

    let mut evicted = false;
    if let Some(mut session) = authenticate(&mut reader, &tx, peer, &ctx).await {
        let reason = run_session(&mut reader, &mut session, &ctx).await;
        evicted = reason == LeaveReason::Evicted;
        leave(&session, reason, &ctx).await;
    }

    // A writer stuck behind a peer that stopped reading would never see
    // `Close`, so it is cut off instead.
    let stuck = evicted || matches!(tx.try_send(Outbound::Close), Err(TrySendError::Full(_)));
    drop(tx);
    if stuck {
        writer.abort();
    }
    match writer.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!(peer = %peer, "Writer cut off"),
        Err(e) => warn!(peer = %peer, error = %e, "Writer task failed"),
    }
    debug!(peer = %peer, "Connection closed");
}

/// Answer register and login frames until a login succeeds. Returns `None`
/// when the connection ends first.
async fn authenticate<R>(
    reader: &mut FrameReader<R>,
    tx: &mpsc::Sender<Outbound>,
    peer: SocketAddr,
    ctx: &SessionContext,
) -> Option<Session>
where
    R: AsyncRead + Unpin,
{
    let mut failed_attempts: u32 = 0;

    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                warn!(peer = %peer, error = %e, "Skipping unreadable frame");
                continue;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection ended before login");
                return None;
            }
        };

        let reply = match AuthRequest::parse(&frame) {
            AuthRequest::Exit => {
                debug!(peer = %peer, "Client left before login");
                return None;
            }
            AuthRequest::Register { username, password } => {
                register(&username, &password, peer, ctx).await
            }
            AuthRequest::MalformedRegister => replies::register_failed(replies::REASON_BAD_FORMAT),
            AuthRequest::Login { username, password } => {
                if ctx.credentials.verify(&username, &password).await {
                    let handle = SessionHandle::new(&username, tx.clone());
                    match admit(handle, peer, ctx).await {
                        Admission::Admitted(session) => return Some(session),
                        Admission::Closed => return None,
                        Admission::AlreadyOnline => {}
                    }
                } else {
                    ctx.journal()
                        .record(&format!(
                            "登录失败: 用户[{username}], IP地址: {}",
                            peer.ip()
                        ))
                        .await;
                    info!(user = %username, peer = %peer, "Login failed");
                }
                failed_attempts += 1;
                replies::LOGIN_FAIL.to_string()
            }
            AuthRequest::Malformed => {
                debug!(peer = %peer, "Malformed login frame");
                failed_attempts += 1;
                replies::LOGIN_FAIL.to_string()
            }
        };

        if let Err(e) = tx.try_send(Outbound::Frame(reply)) {
            debug!(peer = %peer, error = %e, "Could not queue login reply");
            return None;
        }

        let limit = ctx.config.max_login_attempts;
        if limit > 0 && failed_attempts >= limit {
            warn!(peer = %peer, attempts = failed_attempts, "Too many failed logins, closing");
            return None;
        }
    }
}

async fn register(username: &str, password: &str, peer: SocketAddr, ctx: &SessionContext) -> String {
    match ctx.credentials.register(username, password).await {
        Ok(()) => {
            ctx.journal()
                .record(&format!(
                    "新用户注册: 用户[{username}], IP地址: {}",
                    peer.ip()
                ))
                .await;
            info!(user = %username, peer = %peer, "User registered");
            replies::REGISTER_SUCCESS.to_string()
        }
        Err(StoreError::AlreadyExists(_)) => {
            debug!(user = %username, "Registration refused, name taken");
            replies::register_failed(replies::REASON_USER_EXISTS)
        }
        Err(StoreError::InvalidCredential(why)) => {
            debug!(user = %username, reason = why, "Registration refused");
            replies::register_failed(replies::REASON_INVALID_CREDENTIAL)
        }
        Err(e) => {
            error!(user = %username, error = %e, "Failed to persist registration");
            replies::register_failed(replies::REASON_SERVER_ERROR)
        }
    }
}

enum Admission {
    Admitted(Session),
    /// Duplicate logins are disabled and the name is in use.
    AlreadyOnline,
    Closed,
}

/// Put a verified user into the registry and announce them.
async fn admit(handle: SessionHandle, peer: SocketAddr, ctx: &SessionContext) -> Admission {
    let username = handle.username().to_string();
    let unique = !ctx.config.allow_duplicate_logins;

    if unique && ctx.registry.contains_username(&username).await {
        info!(user = %username, peer = %peer, "Login refused, user already online");
        return Admission::AlreadyOnline;
    }

    // Queued before registering so "success" precedes any broadcast.
    if handle.send_text(replies::LOGIN_SUCCESS).is_err() {
        return Admission::Closed;
    }

    let online = if unique {
        match ctx.registry.add_unique(handle.clone()).await {
            Some(online) => online,
            None => {
                warn!(user = %username, peer = %peer, "Lost a concurrent login race, closing");
                return Admission::Closed;
            }
        }
    } else {
        ctx.registry.add(handle.clone()).await
    };

    ctx.journal()
        .record(&format!("登录成功: 用户[{username}], IP地址: {}", peer.ip()))
        .await;
    ctx.router.announce(replies::joined(&username)).await;
    info!(user = %username, peer = %peer, online, "User logged in");

    Admission::Admitted(Session::new(handle, peer))
}

/// Feed frames through the reassembler and router until the session ends.
async fn run_session<R>(
    reader: &mut FrameReader<R>,
    session: &mut Session,
    ctx: &SessionContext,
) -> LeaveReason
where
    R: AsyncRead + Unpin,
{
    let mut reassembler = Reassembler::new(ctx.config.max_payload_size);
    let handle = session.handle().clone();

    loop {
        let read = tokio::select! {
            read = reader.read_frame() => read,
            () = handle.evicted() => {
                warn!(user = %session.username(), "Evicted, outbound queue full");
                return LeaveReason::Evicted;
            }
        };
        let frame = match read {
            Ok(frame) => frame,
            Err(e) if e.is_recoverable() => {
                warn!(user = %session.username(), error = %e, "Skipping unreadable frame");
                continue;
            }
            Err(e) => {
                debug!(user = %session.username(), error = %e, "Connection lost");
                return LeaveReason::ConnectionLost;
            }
        };

        let text = match reassembler.feed(frame) {
            Feed::Message(text) | Feed::Complete(text) => text,
            Feed::Pending => continue,
            Feed::Incomplete { expected, received } => {
                warn!(
                    user = %session.username(),
                    expected,
                    received,
                    "Discarding incomplete chunk sequence"
                );
                ctx.journal()
                    .record(&format!(
                        "用户[{}]的分块传输不完整: 应收 {expected} 块, 实收 {received} 块",
                        session.username()
                    ))
                    .await;
                continue;
            }
            Feed::TooLarge { max } => {
                warn!(user = %session.username(), max, "Discarding oversized chunk sequence");
                if session.handle().send_text(replies::INVALID_IMAGE).is_err() {
                    return LeaveReason::ConnectionLost;
                }
                continue;
            }
            Feed::MalformedStart(raw) => {
                let err = ProtocolError::MalformedChunkHeader(raw);
                match ctx.router.reject(session, &err).await {
                    Disposition::Continue => continue,
                    Disposition::Close(reason) => return reason,
                }
            }
        };

        let disposition = match LogicalMessage::parse(&text) {
            Ok(message) => ctx.router.route(session, message).await,
            Err(e) => ctx.router.reject(session, &e).await,
        };
        if let Disposition::Close(reason) = disposition {
            return reason;
        }
    }
}

async fn leave(session: &Session, reason: LeaveReason, ctx: &SessionContext) {
    let username = session.username();
    ctx.registry.remove(session.handle().id()).await;

    let notice = match reason {
        LeaveReason::Quit => replies::quit_requested(username),
        LeaveReason::Exit | LeaveReason::ConnectionLost | LeaveReason::Evicted => {
            replies::left(username)
        }
    };
    ctx.router.announce(notice).await;
    ctx.journal()
        .record(&format!("用户退出: 用户[{username}]"))
        .await;

    let online = ctx.registry.len().await;
    info!(
        user = %username,
        peer = %session.peer(),
        reason = ?reason,
        online,
        "User left"
    );
}
