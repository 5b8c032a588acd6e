//! Length-prefixed text frames.
//!
//! Each frame is a 2-byte big-endian body length followed by the UTF-8 body,
//! the layout produced by `DataOutputStream.writeUTF` on existing clients.
//! Boundaries are preserved exactly, so bodies may contain newlines or any
//! other delimiter.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::error::FrameError;

/// Encode one frame, rejecting bodies over `max_frame_size`.
pub fn encode_frame(text: &str, max_frame_size: usize) -> Result<Bytes, FrameError> {
    let max = max_frame_size.min(MAX_FRAME_SIZE);
    let size = text.len();
    if size > max {
        return Err(FrameError::Oversized { size, max });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + size);
    buf.put_u16(size as u16);
    buf.put_slice(text.as_bytes());
    Ok(buf.freeze())
}

/// Reads frames from the inbound half of a connection.
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Wait for the next complete frame.
    ///
    /// An oversized or non-UTF-8 frame is consumed in full before the error
    /// is returned, so the caller may simply read again.
    pub async fn read_frame(&mut self) -> Result<String, FrameError> {
        let size = self.inner.read_u16().await? as usize;

        if size > self.max_frame_size {
            let mut body = (&mut self.inner).take(size as u64);
            let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
            if skipped < size as u64 {
                return Err(FrameError::ConnectionClosed);
            }
            return Err(FrameError::Oversized {
                size,
                max: self.max_frame_size,
            });
        }

        let mut body = vec![0u8; size];
        self.inner.read_exact(&mut body).await?;
        String::from_utf8(body).map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Writes frames to the outbound half of a connection.
///
/// Exactly one `FrameWriter` exists per connection; whoever owns it is the
/// only writer on that socket.
pub struct FrameWriter<W> {
    inner: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Send one frame and flush. Nothing is written if the frame is too large.
    pub async fn write_frame(&mut self, text: &str) -> Result<(), FrameError> {
        let encoded = encode_frame(text, self.max_frame_size)?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send a run of frames back to back with a single flush at the end.
    ///
    /// Every frame is validated first so a chunk sequence is never cut off
    /// halfway by an oversized slice.
    pub async fn write_frames<S: AsRef<str>>(&mut self, frames: &[S]) -> Result<(), FrameError> {
        let encoded = frames
            .iter()
            .map(|frame| encode_frame(frame.as_ref(), self.max_frame_size))
            .collect::<Result<Vec<_>, _>>()?;

        for frame in &encoded {
            self.inner.write_all(frame).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
