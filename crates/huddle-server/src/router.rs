//! Dispatch of logical messages from one authenticated session.
//!
//! Broadcasts snapshot the registry and queue the message for every
//! recipient without waiting on any of them. A recipient that cannot take
//! it, because its connection is gone or has stopped reading, is dropped
//! from the registry and evicted.

use std::sync::Arc;

use tracing::{debug, info, warn};

use huddle_shared::constants::EXIT;
use huddle_shared::{chunk_frames, replies, Command, ImagePayload, LogicalMessage, ProtocolError};
use huddle_store::Journal;

use crate::error::ServerError;
use crate::registry::SessionRegistry;
use crate::session::{Outbound, Session, SessionHandle};

/// Why a session is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Client sent `##exit`.
    Exit,
    /// Client sent `@@quit`; `##exit` has been queued as the reply.
    Quit,
    /// Reading from or writing to the peer failed.
    ConnectionLost,
    /// Another session found this one's outbound queue full.
    Evicted,
}

/// What the handler should do after a message has been routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close(LeaveReason),
}

pub struct Router {
    registry: SessionRegistry,
    journal: Arc<Journal>,
    chunk_size: usize,
    max_frame_size: usize,
}

impl Router {
    pub fn new(
        registry: SessionRegistry,
        journal: Arc<Journal>,
        chunk_size: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            registry,
            journal,
            chunk_size,
            max_frame_size,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub async fn route(&self, session: &mut Session, message: LogicalMessage) -> Disposition {
        let result = match message {
            LogicalMessage::Exit => return Disposition::Close(LeaveReason::Exit),
            LogicalMessage::Command(Command::Quit) => {
                return match session.handle().send_text(EXIT) {
                    Ok(()) => Disposition::Close(LeaveReason::Quit),
                    Err(_) => Disposition::Close(LeaveReason::ConnectionLost),
                };
            }
            LogicalMessage::Command(Command::List) => self.list_online(session).await,
            LogicalMessage::Command(Command::Anonymous) => self.toggle_anonymous(session).await,
            LogicalMessage::Private { recipient, body } => {
                self.deliver_private(session, &recipient, &body).await
            }
            LogicalMessage::ImagePayload(image) => self.broadcast_image(session, image).await,
            LogicalMessage::PlainText { body } => self.broadcast_text(session, &body).await,
        };

        Self::disposition(result)
    }

    /// Report an unroutable frame back to its sender.
    pub async fn reject(&self, session: &Session, error: &ProtocolError) -> Disposition {
        debug!(user = %session.username(), error = %error, "Rejected message");
        Self::disposition(session.handle().send_text(error.notice()))
    }

    fn disposition(result: Result<(), ServerError>) -> Disposition {
        match result {
            Ok(()) => Disposition::Continue,
            Err(_) => Disposition::Close(LeaveReason::ConnectionLost),
        }
    }

    /// Deliver `item` to every session in a registry snapshot. Returns how
    /// many recipients accepted it.
    pub async fn broadcast(&self, item: Outbound) -> usize {
        let targets = self.registry.snapshot().await;

        let mut delivered = 0;
        for target in &targets {
            match target.send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => self.drop_recipient(target, &e).await,
            }
        }
        delivered
    }

    /// Broadcast a server notice such as a join or leave line.
    pub async fn announce(&self, text: String) -> usize {
        self.broadcast(self.text_item(text)).await
    }

    async fn drop_recipient(&self, target: &SessionHandle, error: &ServerError) {
        if self.registry.remove(target.id()).await {
            warn!(
                user = %target.username(),
                session = %target.id(),
                error = %error,
                "Dropping unreachable recipient"
            );
        }
        target.evict();
    }

    async fn broadcast_text(&self, session: &Session, body: &str) -> Result<(), ServerError> {
        let line = replies::broadcast(session.display_name(), body);
        self.journal.record(&line).await;

        let delivered = self.broadcast(self.text_item(line)).await;
        debug!(user = %session.username(), delivered, "Broadcast text");
        Ok(())
    }

    async fn broadcast_image(
        &self,
        session: &Session,
        image: ImagePayload,
    ) -> Result<(), ServerError> {
        if let Err(e) = image.validate() {
            return session.handle().send_text(e.notice());
        }

        let sender = session.display_name();
        let frames = self.image_frames(&image, sender);
        self.journal
            .record(&format!("[{sender}]：发送了一张图片"))
            .await;

        let delivered = self.broadcast(frames).await;
        info!(
            user = %session.username(),
            size = image.data.len(),
            delivered,
            "Broadcast image"
        );
        Ok(())
    }

    async fn deliver_private(
        &self,
        session: &Session,
        recipient: &str,
        body: &str,
    ) -> Result<(), ServerError> {
        let sender = session.display_name();
        let (item, entry) = if ImagePayload::is_image(body) {
            let image = match ImagePayload::parse(body).and_then(|image| {
                image.validate()?;
                Ok(image)
            }) {
                Ok(image) => image,
                Err(e) => return session.handle().send_text(e.notice()),
            };
            (
                self.image_frames(&image, sender),
                format!("[{}]向[{recipient}]发送了一张图片", session.username()),
            )
        } else {
            (
                self.text_item(replies::private(sender, body)),
                format!("[{}] 对 [{recipient}]私聊: {body}", session.username()),
            )
        };

        let Some(target) = self.registry.find_by_name(recipient).await else {
            debug!(user = %session.username(), recipient, "Private message recipient not online");
            return session
                .handle()
                .send_text(replies::recipient_not_found(recipient));
        };

        if let Err(e) = target.send(item) {
            self.drop_recipient(&target, &e).await;
            return session
                .handle()
                .send_text(replies::recipient_not_found(recipient));
        }

        info!(from = %session.username(), to = recipient, "Private message delivered");
        self.journal.record(&entry).await;
        Ok(())
    }

    async fn list_online(&self, session: &Session) -> Result<(), ServerError> {
        let names = self.registry.usernames().await;
        session
            .handle()
            .send(self.text_item(replies::online_users(&names)))
    }

    async fn toggle_anonymous(&self, session: &mut Session) -> Result<(), ServerError> {
        let anonymous = session.toggle_anonymous();
        info!(user = %session.username(), anonymous, "Anonymity toggled");
        self.journal
            .record(&format!(
                "客户端[{}]已切换到 {} 聊天模式",
                session.username(),
                replies::mode_label(anonymous)
            ))
            .await;
        session
            .handle()
            .send_text(replies::anonymity_changed(anonymous))
    }

    /// A chat line as one frame, or as a chunk sequence when it does not fit
    /// in one.
    fn text_item(&self, line: String) -> Outbound {
        if line.len() > self.max_frame_size {
            Outbound::Frames(Arc::from(chunk_frames(&line, self.chunk_size)))
        } else {
            Outbound::Frame(line)
        }
    }

    /// Re-chunk an image under the server-side sender label. The frames are
    /// built once and shared by every recipient.
    fn image_frames(&self, image: &ImagePayload, sender: &str) -> Outbound {
        let frames = chunk_frames(&image.encode_as(sender), self.chunk_size);
        Outbound::Frames(Arc::from(frames))
    }
}
