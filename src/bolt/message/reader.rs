//! Message deserialization and dispatch.

use std::collections::HashMap;

use super::{field_count, name_of, tag, Message};
use crate::bolt::packstream::{PackStreamDecoder, PackStreamError, PackStreamValue};

/// Receiver of decoded messages, one callback per message type.
///
/// A client implements the response callbacks and rejects the request
/// ones; a server does the opposite.
pub trait MessageHandler {
    /// Error returned by the callbacks. Decode failures convert into it.
    type Error: From<PackStreamError>;

    fn handle_init(&mut self, client_name: String) -> Result<(), Self::Error>;

    fn handle_run(
        &mut self,
        statement: String,
        parameters: HashMap<String, PackStreamValue>,
    ) -> Result<(), Self::Error>;

    fn handle_pull_all(&mut self) -> Result<(), Self::Error>;

    fn handle_discard_all(&mut self) -> Result<(), Self::Error>;

    fn handle_ack_failure(&mut self) -> Result<(), Self::Error>;

    fn handle_reset(&mut self) -> Result<(), Self::Error>;

    fn handle_success(&mut self, metadata: HashMap<String, PackStreamValue>) -> Result<(), Self::Error>;

    fn handle_record(&mut self, fields: Vec<PackStreamValue>) -> Result<(), Self::Error>;

    fn handle_failure(&mut self, code: String, message: String) -> Result<(), Self::Error>;

    fn handle_ignored(&mut self) -> Result<(), Self::Error>;
}

/// Decodes one message per payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageReader;

impl MessageReader {
    /// Create a new reader.
    pub fn new() -> Self {
        Self
    }

    /// Decode one message and hand it to `handler`.
    pub fn read<H: MessageHandler>(&self, payload: &[u8], handler: &mut H) -> Result<(), H::Error> {
        let message = self.decode(payload)?;
        dispatch(message, handler)
    }

    /// Decode exactly one message structure from `payload`.
    pub fn decode(&self, payload: &[u8]) -> Result<Message, PackStreamError> {
        let mut decoder = PackStreamDecoder::new(payload);
        let (fields, signature) = decoder.read_struct_header()?;

        let expected = field_count(signature).ok_or(PackStreamError::UnknownStructure(signature))?;
        if fields != expected {
            return Err(PackStreamError::StructureArity {
                name: name_of(signature),
                expected,
                actual: fields,
            });
        }

        let message = match signature {
            tag::INIT => Message::Init {
                client_name: decoder.decode_string()?,
            },
            tag::RUN => Message::Run {
                statement: decoder.decode_string()?,
                parameters: decoder.decode_map()?,
            },
            tag::PULL_ALL => Message::PullAll,
            tag::DISCARD_ALL => Message::DiscardAll,
            tag::ACK_FAILURE => Message::AckFailure,
            tag::RESET => Message::Reset,
            tag::SUCCESS => Message::Success {
                metadata: decoder.decode_map()?,
            },
            tag::RECORD => Message::Record {
                fields: decoder.decode_list()?,
            },
            tag::FAILURE => {
                let mut metadata = decoder.decode_map()?;
                Message::Failure {
                    code: take_string(&mut metadata, "code")?,
                    message: take_string(&mut metadata, "message")?,
                }
            }
            tag::IGNORED => Message::Ignored,
            other => return Err(PackStreamError::UnknownStructure(other)),
        };

        if !decoder.is_empty() {
            return Err(PackStreamError::InvalidStructure(format!(
                "{} trailing bytes after {} message",
                decoder.remaining(),
                message.name()
            )));
        }
        Ok(message)
    }
}

/// Route an already decoded message to the matching callback.
pub fn dispatch<H: MessageHandler>(message: Message, handler: &mut H) -> Result<(), H::Error> {
    match message {
        Message::Init { client_name } => handler.handle_init(client_name),
        Message::Run {
            statement,
            parameters,
        } => handler.handle_run(statement, parameters),
        Message::PullAll => handler.handle_pull_all(),
        Message::DiscardAll => handler.handle_discard_all(),
        Message::AckFailure => handler.handle_ack_failure(),
        Message::Reset => handler.handle_reset(),
        Message::Success { metadata } => handler.handle_success(metadata),
        Message::Record { fields } => handler.handle_record(fields),
        Message::Failure { code, message } => handler.handle_failure(code, message),
        Message::Ignored => handler.handle_ignored(),
    }
}

fn take_string(
    metadata: &mut HashMap<String, PackStreamValue>,
    key: &str,
) -> Result<String, PackStreamError> {
    match metadata.remove(key) {
        Some(PackStreamValue::String(s)) => Ok(s),
        _ => Err(PackStreamError::InvalidStructure(format!(
            "FAILURE metadata requires a string '{}'",
            key
        ))),
    }
}
