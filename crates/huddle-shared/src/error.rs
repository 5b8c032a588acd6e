use std::io;

use thiserror::Error;

use crate::replies;

/// Transport-level failures while reading or writing one frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer went away (EOF, reset, broken pipe).
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame exceeded the configured maximum. The stream is still aligned
    /// on a frame boundary.
    #[error("Frame too large: {size} bytes (max {max})")]
    Oversized { size: usize, max: usize },

    /// The frame body was not valid UTF-8. The stream is still aligned.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(io::Error),
}

impl FrameError {
    /// Whether the connection can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Oversized { .. } | FrameError::InvalidUtf8)
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        }
    }
}

/// A frame that parsed as nothing the protocol knows how to route.
///
/// These are reported back to the sender as chat text and never end the
/// session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed private message: {0}")]
    MalformedPrivate(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed image payload")]
    MalformedImage,

    #[error("Image payload is not valid base64")]
    InvalidImageData,

    #[error("Malformed chunk header: {0}")]
    MalformedChunkHeader(String),
}

impl ProtocolError {
    /// Chat-visible notice sent back to the offending client.
    pub fn notice(&self) -> String {
        match self {
            ProtocolError::MalformedPrivate(raw) => replies::malformed_private(raw),
            ProtocolError::UnknownCommand(raw) => replies::unknown_command(raw),
            ProtocolError::MalformedImage | ProtocolError::InvalidImageData => {
                replies::INVALID_IMAGE.to_string()
            }
            ProtocolError::MalformedChunkHeader(_) => replies::MALFORMED_CHUNK_HEADER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_connection_closed() {
        let err: FrameError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_io_errors_are_kept() {
        let err: FrameError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn test_malformed_private_notice_echoes_input() {
        let notice = ProtocolError::MalformedPrivate("@bob hi".into()).notice();
        assert_eq!(notice, "无效的私聊格式: @bob hi");
    }
}
