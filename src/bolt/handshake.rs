//! Bolt protocol handshake.
//!
//! The Bolt handshake consists of:
//! 1. Client sends 4-byte magic number (0x6060B017)
//! 2. Client sends 4 x 4-byte version proposals (highest first)
//! 3. Server responds with 4-byte agreed version (or 0 if none)

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{BoltResult, HandshakeError};

/// Bolt protocol magic number: 0x6060B017
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the complete handshake message from client (magic + 4 versions)
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of server response (negotiated version)
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// "HTTP" read as a big-endian u32, what an HTTP endpoint answers with.
const HTTP_RESPONSE: u32 = 0x4854_5450;

/// Bolt protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BoltVersion {
    /// Bolt 1
    V1 = 0x0000_0001,
}

impl BoltVersion {
    /// Versions proposed by this driver, in order of preference.
    pub const SUPPORTED: [BoltVersion; 1] = [BoltVersion::V1];

    /// Create a BoltVersion from a raw u32 value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000_0001 => Some(BoltVersion::V1),
            _ => None,
        }
    }

    /// Get the raw u32 value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Convert to big-endian bytes.
    pub fn to_bytes(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Build the client preamble: magic followed by up to four proposals.
pub fn client_preamble(versions: &[BoltVersion]) -> [u8; HANDSHAKE_SIZE] {
    let mut data = [0u8; HANDSHAKE_SIZE];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    for (i, version) in versions.iter().take(4).enumerate() {
        let offset = 4 + (i * 4);
        data[offset..offset + 4].copy_from_slice(&version.to_bytes());
    }
    data
}

/// Interpret the server's 4-byte answer to our proposals.
pub fn parse_response(response: [u8; HANDSHAKE_RESPONSE_SIZE]) -> Result<BoltVersion, HandshakeError> {
    match u32::from_be_bytes(response) {
        0 => Err(HandshakeError::NoCompatibleVersion),
        HTTP_RESPONSE => Err(HandshakeError::HttpEndpoint),
        value => BoltVersion::from_u32(value)
            .filter(|v| BoltVersion::SUPPORTED.contains(v))
            .ok_or(HandshakeError::UnexpectedVersion(value)),
    }
}

/// Negotiate a version on a freshly opened stream.
pub async fn perform<S>(stream: &mut S) -> BoltResult<BoltVersion>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&client_preamble(&BoltVersion::SUPPORTED))
        .await?;
    stream.flush().await?;

    let mut response = [0u8; HANDSHAKE_RESPONSE_SIZE];
    if let Err(e) = stream.read_exact(&mut response).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(HandshakeError::ConnectionClosed.into());
        }
        return Err(e.into());
    }

    let version = parse_response(response)?;
    tracing::debug!(%version, "Bolt handshake complete");
    Ok(version)
}

/// Server side of the handshake: validate a client preamble and pick the
/// first proposal we support.
pub fn accept(data: &[u8]) -> Result<BoltVersion, HandshakeError> {
    if data.len() < HANDSHAKE_SIZE {
        return Err(HandshakeError::InvalidData(format!(
            "Expected {} bytes, got {}",
            HANDSHAKE_SIZE,
            data.len()
        )));
    }

    let received = [data[0], data[1], data[2], data[3]];
    if received != BOLT_MAGIC {
        return Err(HandshakeError::InvalidMagic {
            expected: BOLT_MAGIC,
            received,
        });
    }

    data[4..HANDSHAKE_SIZE]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .filter(|v| *v != 0)
        .find_map(BoltVersion::from_u32)
        .ok_or(HandshakeError::NoCompatibleVersion)
}
