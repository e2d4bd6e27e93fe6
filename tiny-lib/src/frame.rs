//! The 5-byte wire unit and the aligned frame transport.
//!
//! ```text
//! +------+--------+--------+--------+--------+
//! | id   | data 0 | data 1 | data 2 | data 3 |
//! +------+--------+--------+--------+--------+
//! ```
//!
//! Multi-byte fields in the data section are big-endian. Once the stream has
//! been aligned (see [`crate::align`]) every read yields whole frames; a
//! partial frame is never handed out as a value.

use crate::clock::ClockValue;
use crate::constants::{DATA_SIZE, FRAME_SIZE};
use crate::error::TransportError;
use bytes::{Buf, BytesMut};
use serde::Serialize;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// One complete frame: an identifying byte followed by four data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    pub const fn new(id: u8, data: [u8; DATA_SIZE]) -> Self {
        Frame([id, data[0], data[1], data[2], data[3]])
    }

    pub const fn id(&self) -> u8 {
        self.0[0]
    }

    pub const fn data(&self) -> [u8; DATA_SIZE] {
        [self.0[1], self.0[2], self.0[3], self.0[4]]
    }

    /// The data field read as a box clock value
    pub const fn clock(&self) -> ClockValue {
        ClockValue::from_bytes(self.data())
    }

    pub const fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}

impl From<[u8; FRAME_SIZE]> for Frame {
    fn from(bytes: [u8; FRAME_SIZE]) -> Self {
        Frame(bytes)
    }
}

impl From<Frame> for [u8; FRAME_SIZE] {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = std::array::TryFromSliceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Frame(bytes.try_into()?))
    }
}

impl From<Frame> for String {
    fn from(frame: Frame) -> Self {
        hex::encode(frame.0)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Read half of an aligned transport.
///
/// Bytes already received past the alignment echo are carried over in
/// `buffer` so no frame is lost between alignment and steady state.
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffered(inner, BytesMut::new())
    }

    pub(crate) fn with_buffered(inner: R, buffer: BytesMut) -> Self {
        Self { inner, buffer }
    }

    /// Number of bytes received but not yet returned as frames
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Wait for the next complete frame.
    ///
    /// Cancel safe: bytes read before the future is dropped stay buffered.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        while self.buffer.len() < FRAME_SIZE {
            self.buffer.reserve(FRAME_SIZE * 8);
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
        }
        let mut bytes = [0u8; FRAME_SIZE];
        self.buffer.copy_to_slice(&mut bytes);
        let frame = Frame::from(bytes);
        debug!(bytes = %frame, "Serial Read");
        Ok(frame)
    }

    pub fn into_inner(self) -> (R, BytesMut) {
        (self.inner, self.buffer)
    }
}

/// Write half of an aligned transport.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one frame and flush it out of any userspace buffering.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        debug!(bytes = %frame, "Serial Write");
        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
