//! Bolt v1 message catalogue.
//!
//! Every message is a PackStream structure whose signature is the message
//! tag. Requests flow client to server, responses server to client; a
//! connection only ever writes the former and reads the latter.

pub mod reader;
pub mod writer;

pub use reader::{MessageHandler, MessageReader};
pub use writer::MessageWriter;

use std::collections::HashMap;

use crate::bolt::packstream::PackStreamValue;

/// Bolt message tags.
pub mod tag {
    /// INIT message tag (0x01)
    pub const INIT: u8 = 0x01;
    /// ACK_FAILURE message tag (0x0E)
    pub const ACK_FAILURE: u8 = 0x0E;
    /// RESET message tag (0x0F)
    pub const RESET: u8 = 0x0F;
    /// RUN message tag (0x10)
    pub const RUN: u8 = 0x10;
    /// DISCARD_ALL message tag (0x2F)
    pub const DISCARD_ALL: u8 = 0x2F;
    /// PULL_ALL message tag (0x3F)
    pub const PULL_ALL: u8 = 0x3F;

    /// SUCCESS response tag (0x70)
    pub const SUCCESS: u8 = 0x70;
    /// RECORD response tag (0x71)
    pub const RECORD: u8 = 0x71;
    /// IGNORED response tag (0x7E)
    pub const IGNORED: u8 = 0x7E;
    /// FAILURE response tag (0x7F)
    pub const FAILURE: u8 = 0x7F;
}

/// All Bolt v1 messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// INIT - identify the client after the handshake
    Init { client_name: String },
    /// RUN - execute a statement
    Run {
        statement: String,
        parameters: HashMap<String, PackStreamValue>,
    },
    /// PULL_ALL - stream every remaining record
    PullAll,
    /// DISCARD_ALL - drop every remaining record
    DiscardAll,
    /// ACK_FAILURE - acknowledge a failure so the server accepts new work
    AckFailure,
    /// RESET - abandon pending work and return to a clean state
    Reset,
    /// SUCCESS - request completed with metadata
    Success { metadata: HashMap<String, PackStreamValue> },
    /// RECORD - one row of a result stream
    Record { fields: Vec<PackStreamValue> },
    /// FAILURE - request failed
    Failure { code: String, message: String },
    /// IGNORED - request skipped because of an earlier failure
    Ignored,
}

impl Message {
    /// Create an INIT message.
    pub fn init(client_name: impl Into<String>) -> Self {
        Message::Init {
            client_name: client_name.into(),
        }
    }

    /// Create a RUN message.
    pub fn run(statement: impl Into<String>, parameters: HashMap<String, PackStreamValue>) -> Self {
        Message::Run {
            statement: statement.into(),
            parameters,
        }
    }

    /// Create a SUCCESS message.
    pub fn success(metadata: HashMap<String, PackStreamValue>) -> Self {
        Message::Success { metadata }
    }

    /// Create a FAILURE message.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Message::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Init { .. } => tag::INIT,
            Message::Run { .. } => tag::RUN,
            Message::PullAll => tag::PULL_ALL,
            Message::DiscardAll => tag::DISCARD_ALL,
            Message::AckFailure => tag::ACK_FAILURE,
            Message::Reset => tag::RESET,
            Message::Success { .. } => tag::SUCCESS,
            Message::Record { .. } => tag::RECORD,
            Message::Failure { .. } => tag::FAILURE,
            Message::Ignored => tag::IGNORED,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        name_of(self.tag())
    }

    /// Check if this message is sent by clients.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::Init { .. }
                | Message::Run { .. }
                | Message::PullAll
                | Message::DiscardAll
                | Message::AckFailure
                | Message::Reset
        )
    }
}

/// Name of a message tag, for logging and error text.
pub fn name_of(tag: u8) -> &'static str {
    match tag {
        tag::INIT => "INIT",
        tag::RUN => "RUN",
        tag::PULL_ALL => "PULL_ALL",
        tag::DISCARD_ALL => "DISCARD_ALL",
        tag::ACK_FAILURE => "ACK_FAILURE",
        tag::RESET => "RESET",
        tag::SUCCESS => "SUCCESS",
        tag::RECORD => "RECORD",
        tag::FAILURE => "FAILURE",
        tag::IGNORED => "IGNORED",
        _ => "UNKNOWN",
    }
}

/// Number of fields a message structure carries on the wire.
pub(crate) fn field_count(tag: u8) -> Option<usize> {
    match tag {
        tag::INIT => Some(1),
        tag::RUN => Some(2),
        tag::PULL_ALL | tag::DISCARD_ALL | tag::ACK_FAILURE | tag::RESET => Some(0),
        tag::SUCCESS | tag::RECORD | tag::FAILURE => Some(1),
        tag::IGNORED => Some(0),
        _ => None,
    }
}
