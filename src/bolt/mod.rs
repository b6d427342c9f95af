//! # Bolt Protocol Implementation
//!
//! Low-level Bolt v1 client protocol.
//!
//! ## Submodules
//!
//! - [`packstream`] - Binary serialization/deserialization
//! - [`message`] - Bolt message types (INIT, RUN, PULL_ALL, etc.), writer and reader
//! - [`handshake`] - Version negotiation
//! - [`codec`] - Tokio codec for length-prefixed framing
//! - [`error`] - Protocol error types
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the Bolt protocol directly.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltCodec, MessageCodec};
pub use error::{BoltError, BoltErrorCode, BoltResult, HandshakeError};
pub use handshake::{BoltVersion, BOLT_MAGIC};
pub use message::{Message, MessageHandler, MessageReader, MessageWriter};
pub use packstream::{
    Node, PackStreamDecoder, PackStreamEncoder, PackStreamError, PackStreamValue, Path,
    Relationship,
};
