//! Message framing.
use bytes::{Buf, Bytes, BytesMut};

use super::{BackendMessage, ProtocolError};
use crate::{common::verbose, ext::FmtExt};

/// Largest backend message accepted by default, this is the maximum field size of postgres.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

// msgtype + length
const HEADER: usize = 1 + 4;

/// One framed backend message.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// The message type byte.
    pub msgtype: u8,
    /// Message body, excluding message type and length.
    pub body: Bytes,
}

impl Message {
    pub fn new(msgtype: u8, body: impl Into<Bytes>) -> Self {
        Self { msgtype, body: body.into() }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("msgtype", &BackendMessage::message_name(self.msgtype))
            .field("body", &self.body.lossy())
            .finish()
    }
}

/// Incremental message framer.
///
/// Bytes can be fed in chunk of any size, messages are yielded only when complete.
#[derive(Debug)]
pub struct MessageDecoder {
    buf: BytesMut,
    max_size: usize,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(1024), max_size }
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The underlying buffer, transport may read directly into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Returns the number of buffered bytes that are not yet a complete message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to take one complete message.
    ///
    /// Returns `Ok(None)` when more bytes are required.
    pub fn decode(&mut self) -> Result<Option<Message>, ProtocolError> {
        let Some(mut header) = self.buf.get(..HEADER) else {
            return Ok(None);
        };

        let msgtype = header.get_u8();
        let len = header.get_i32();

        if len < 4 {
            return Err(ProtocolError::InvalidLength { len });
        }

        let len = len as usize;
        if len > self.max_size {
            return Err(ProtocolError::TooLarge { len, max: self.max_size });
        }

        if self.buf.len() - 1/*msgtype*/ < len {
            self.buf.reserve(1 + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(HEADER);
        let body = self.buf.split_to(len - 4).freeze();

        verbose!("Decoded {}, {} bytes", BackendMessage::message_name(msgtype), body.len());

        Ok(Some(Message { msgtype, body }))
    }
}
