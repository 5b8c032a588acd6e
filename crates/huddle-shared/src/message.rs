//! Classification of frames into typed messages.
//!
//! Parsing is separate from dispatch: [`LogicalMessage::parse`] and
//! [`AuthRequest::parse`] look only at the text, never at server state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::constants::{
    CMD_ANONYMOUS, CMD_LIST, CMD_QUIT, COMMAND_PREFIX, CREDENTIAL_SEPARATOR, EXIT, IMG_SEPARATOR,
    IMG_TAG, PRIVATE_DELIMITER, PRIVATE_PREFIX, REGISTER_PREFIX,
};
use crate::error::ProtocolError;

/// Frames accepted before a connection has logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// `REGISTER:<user>,<password>`
    Register { username: String, password: String },
    /// `REGISTER:` followed by anything other than two fields.
    MalformedRegister,
    /// `<user>,<password>`
    Login { username: String, password: String },
    /// Anything else.
    Malformed,
    /// The client closed its login window.
    Exit,
}

impl AuthRequest {
    pub fn parse(frame: &str) -> Self {
        if frame == EXIT {
            return AuthRequest::Exit;
        }

        if let Some(rest) = frame.strip_prefix(REGISTER_PREFIX) {
            return match split_credentials(rest) {
                Some((username, password)) => AuthRequest::Register { username, password },
                None => AuthRequest::MalformedRegister,
            };
        }

        match split_credentials(frame) {
            Some((username, password)) => AuthRequest::Login { username, password },
            None => AuthRequest::Malformed,
        }
    }
}

fn split_credentials(text: &str) -> Option<(String, String)> {
    let mut fields = text.split(CREDENTIAL_SEPARATOR);
    let username = fields.next()?;
    let password = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
}

/// Commands a logged-in client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Quit,
    Anonymous,
}

/// A base64 image with the sender name the client embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub sender_display_name: String,
    pub data: String,
}

impl ImagePayload {
    /// Whether `text` claims to be an image payload.
    pub fn is_image(text: &str) -> bool {
        text.trim_start().starts_with(IMG_TAG)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let body = text
            .trim_start()
            .strip_prefix(IMG_TAG)
            .ok_or(ProtocolError::MalformedImage)?;
        let (sender, data) = body
            .split_once(IMG_SEPARATOR)
            .ok_or(ProtocolError::MalformedImage)?;

        Ok(Self {
            sender_display_name: sender.to_string(),
            data: data.to_string(),
        })
    }

    /// Check that the body decodes as base64, ignoring embedded whitespace.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let cleaned: String = self.data.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64
            .decode(cleaned)
            .map(|_| ())
            .map_err(|_| ProtocolError::InvalidImageData)
    }

    /// The wire form, `[IMG]<sender>|<data>`, with the given sender label.
    pub fn encode_as(&self, sender: &str) -> String {
        format!("{IMG_TAG}{sender}{IMG_SEPARATOR}{}", self.data)
    }
}

/// One message from a logged-in client, after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalMessage {
    PlainText { body: String },
    Private { recipient: String, body: String },
    Command(Command),
    ImagePayload(ImagePayload),
    /// `##exit`: the client is going away and expects no reply.
    Exit,
}

impl LogicalMessage {
    /// Classify a frame. Exact control tokens win over the `@` prefix, which
    /// wins over plain text.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text {
            EXIT => return Ok(LogicalMessage::Exit),
            CMD_LIST => return Ok(LogicalMessage::Command(Command::List)),
            CMD_QUIT => return Ok(LogicalMessage::Command(Command::Quit)),
            CMD_ANONYMOUS => return Ok(LogicalMessage::Command(Command::Anonymous)),
            _ => {}
        }

        if text.starts_with(COMMAND_PREFIX) {
            return Err(ProtocolError::UnknownCommand(text.to_string()));
        }

        if let Some(addressed) = text.strip_prefix(PRIVATE_PREFIX) {
            let (recipient, body) = addressed
                .split_once(PRIVATE_DELIMITER)
                .filter(|(recipient, _)| !recipient.is_empty())
                .ok_or_else(|| ProtocolError::MalformedPrivate(text.to_string()))?;
            return Ok(LogicalMessage::Private {
                recipient: recipient.to_string(),
                body: body.to_string(),
            });
        }

        if ImagePayload::is_image(text) {
            return ImagePayload::parse(text).map(LogicalMessage::ImagePayload);
        }

        Ok(LogicalMessage::PlainText {
            body: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_requests() {
        assert_eq!(
            AuthRequest::parse("alice,secret"),
            AuthRequest::Login {
                username: "alice".into(),
                password: "secret".into()
            }
        );
        assert_eq!(
            AuthRequest::parse("REGISTER:bob,pw"),
            AuthRequest::Register {
                username: "bob".into(),
                password: "pw".into()
            }
        );
        assert_eq!(AuthRequest::parse("REGISTER:bob"), AuthRequest::MalformedRegister);
        assert_eq!(AuthRequest::parse("REGISTER:a,b,c"), AuthRequest::MalformedRegister);
        assert_eq!(AuthRequest::parse("nocomma"), AuthRequest::Malformed);
        assert_eq!(AuthRequest::parse("##exit"), AuthRequest::Exit);
    }

    #[test]
    fn test_control_tokens_are_exact() {
        assert_eq!(
            LogicalMessage::parse("@@list"),
            Ok(LogicalMessage::Command(Command::List))
        );
        assert_eq!(
            LogicalMessage::parse("@@quit"),
            Ok(LogicalMessage::Command(Command::Quit))
        );
        assert_eq!(
            LogicalMessage::parse("@@anonymous"),
            Ok(LogicalMessage::Command(Command::Anonymous))
        );
        assert_eq!(LogicalMessage::parse("##exit"), Ok(LogicalMessage::Exit));
        assert!(matches!(
            LogicalMessage::parse("@@lists"),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_private_messages() {
        assert_eq!(
            LogicalMessage::parse("@bob：hi：there"),
            Ok(LogicalMessage::Private {
                recipient: "bob".into(),
                body: "hi：there".into()
            })
        );
        assert!(matches!(
            LogicalMessage::parse("@bob hi"),
            Err(ProtocolError::MalformedPrivate(_))
        ));
        assert!(matches!(
            LogicalMessage::parse("@：hi"),
            Err(ProtocolError::MalformedPrivate(_))
        ));
    }

    #[test]
    fn test_plain_text_and_images() {
        assert_eq!(
            LogicalMessage::parse("hello, 世界"),
            Ok(LogicalMessage::PlainText {
                body: "hello, 世界".into()
            })
        );

        let parsed = LogicalMessage::parse("[IMG]alice|QUJD").unwrap();
        assert_eq!(
            parsed,
            LogicalMessage::ImagePayload(ImagePayload {
                sender_display_name: "alice".into(),
                data: "QUJD".into()
            })
        );

        assert_eq!(
            LogicalMessage::parse("[IMG]no separator"),
            Err(ProtocolError::MalformedImage)
        );
    }

    #[test]
    fn test_image_validation_and_relabel() {
        let image = ImagePayload::parse("[IMG]alice|QUJD\nREVG").unwrap();
        assert!(image.validate().is_ok());
        assert_eq!(image.encode_as("匿名用户7"), "[IMG]匿名用户7|QUJD\nREVG");

        let bogus = ImagePayload::parse("[IMG]alice|not base64!").unwrap();
        assert_eq!(bogus.validate(), Err(ProtocolError::InvalidImageData));
    }
}
