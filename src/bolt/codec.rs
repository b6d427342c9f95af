//! Bolt message framing for tokio_util.
//!
//! Each message travels as `<u32 big-endian length><payload>`. Zero-length
//! frames carry nothing and are skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, MessageReader, MessageWriter};
use super::BoltError;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefixed frame codec. Items are raw message payloads.
#[derive(Debug, Clone)]
pub struct BoltCodec {
    /// Maximum payload size, both directions
    max_message_size: usize,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Get the maximum payload size.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltCodec {
    type Item = BytesMut;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

            if len == 0 {
                src.advance(LENGTH_PREFIX_SIZE);
                continue;
            }

            if len > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: len,
                    max: self.max_message_size,
                });
            }

            if src.len() < LENGTH_PREFIX_SIZE + len {
                src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_PREFIX_SIZE);
            return Ok(Some(src.split_to(len)));
        }
    }
}

impl Encoder<BytesMut> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_message_size {
            return Err(BoltError::MessageTooLarge {
                size: item.len(),
                max: self.max_message_size,
            });
        }
        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

/// Frame codec that also decodes and encodes whole messages.
///
/// Used where messages are handled as values rather than dispatched, such
/// as an in-process peer in tests.
#[derive(Debug, Default)]
pub struct MessageCodec {
    frames: BoltCodec,
    reader: MessageReader,
    writer: MessageWriter,
}

impl MessageCodec {
    /// Create a new message codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(payload) => Ok(Some(self.reader.decode(&payload)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = BoltError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.writer.write(&item)?;
        let payload = self.writer.take();
        self.frames.encode(payload, dst)
    }
}
