//! # huddle-shared
//!
//! Wire-level building blocks for the Huddle chat relay.
//!
//! Everything here is independent of sockets and server state: the
//! length-prefixed frame codec works over any tokio `AsyncRead` /
//! `AsyncWrite`, the chunk reassembler is a pure state machine, and the
//! message parser turns one frame into a typed [`LogicalMessage`].

pub mod chunk;
pub mod constants;
pub mod error;
pub mod framing;
pub mod message;
pub mod replies;

pub use chunk::{chunk_frames, Feed, Reassembler};
pub use error::{FrameError, ProtocolError};
pub use framing::{FrameReader, FrameWriter};
pub use message::{AuthRequest, Command, ImagePayload, LogicalMessage};
