//! Message serialization.

use bytes::BytesMut;

use super::{field_count, tag, Message};
use crate::bolt::packstream::{PackStreamEncoder, PackStreamError};

/// Serializes messages into one reusable buffer.
///
/// Messages are appended until [`take`](Self::take) moves the bytes out or
/// [`reset`](Self::reset) drops them; the allocation is kept either way.
#[derive(Debug, Default)]
pub struct MessageWriter {
    encoder: PackStreamEncoder,
}

impl MessageWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message.
    pub fn write(&mut self, message: &Message) -> Result<(), PackStreamError> {
        let tag = message.tag();
        let fields = field_count(tag).ok_or(PackStreamError::UnknownStructure(tag))?;
        self.encoder.encode_struct_header(tag, fields)?;

        match message {
            Message::Init { client_name } => self.encoder.encode_string(client_name),
            Message::Run {
                statement,
                parameters,
            } => {
                self.encoder.encode_string(statement)?;
                self.encoder.encode_map(parameters)
            }
            Message::Success { metadata } => self.encoder.encode_map(metadata),
            Message::Record { fields } => self.encoder.encode_list(fields),
            Message::Failure { code, message } => {
                // Bolt v1 carries both values in one metadata map
                self.encoder.encode_map_header(2)?;
                self.encoder.encode_string("code")?;
                self.encoder.encode_string(code)?;
                self.encoder.encode_string("message")?;
                self.encoder.encode_string(message)
            }
            Message::PullAll
            | Message::DiscardAll
            | Message::AckFailure
            | Message::Reset
            | Message::Ignored => Ok(()),
        }
    }

    /// Bytes written since the last take or reset.
    pub fn as_bytes(&self) -> &[u8] {
        self.encoder.as_bytes()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    /// Move the buffered bytes out.
    pub fn take(&mut self) -> BytesMut {
        self.encoder.split()
    }

    /// Drop the buffered bytes.
    pub fn reset(&mut self) {
        self.encoder.clear();
    }
}

/// Encode a single message to bytes.
pub fn write_message(message: &Message) -> Result<BytesMut, PackStreamError> {
    let mut writer = MessageWriter::new();
    writer.write(message)?;
    Ok(writer.take())
}
