//! Bolt protocol connection for client-side use.
//!
//! A connection owns one transport and a FIFO queue of response handlers.
//! Responses arrive in request order, so the head of the queue is always
//! the handler for the next response read off the wire.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::codec::{Decoder, Encoder};

use crate::bolt::message::{name_of, tag};
use crate::bolt::{
    handshake, BoltCodec, BoltError, BoltVersion, Message, MessageHandler, MessageReader,
    MessageWriter, PackStreamValue,
};
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::handlers::{GenericResponseHandler, Metadata, ResponseHandler};
use crate::driver::ServerAddress;

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed transport
pub type BoxedStream = Box<dyn AsyncStream>;

/// Bolt connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoltConnectionState {
    /// Usable
    Ready,
    /// Desynchronized or transport failed; must be discarded
    Broken,
    /// Closed
    Closed,
}

/// Client-side Bolt connection.
pub struct BoltConnection {
    stream: BoxedStream,
    codec: BoltCodec,
    writer: MessageWriter,
    reader: MessageReader,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    pending: VecDeque<ResponseHandler>,
    /// Failure not yet acknowledged, as (code, message)
    current_failure: Option<(String, String)>,
    state: BoltConnectionState,
    address: ServerAddress,
    protocol_version: BoltVersion,
    server_agent: Option<String>,
}

impl BoltConnection {
    /// Handshake and INIT over a freshly connected stream.
    pub async fn open(
        mut stream: BoxedStream,
        address: ServerAddress,
        user_agent: &str,
        max_message_size: usize,
    ) -> DriverResult<Self> {
        let protocol_version = handshake::perform(&mut stream).await.map_err(|e| match e {
            BoltError::Io(e) => DriverError::service_unavailable(format!(
                "Handshake with {} failed: {}",
                address, e
            )),
            e => DriverError::connection_lifecycle(format!("Handshake with {} failed: {}", address, e)),
        })?;

        let mut connection = Self {
            stream,
            codec: BoltCodec::with_max_size(max_message_size),
            writer: MessageWriter::new(),
            reader: MessageReader::new(),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
            pending: VecDeque::new(),
            current_failure: None,
            state: BoltConnectionState::Ready,
            address,
            protocol_version,
            server_agent: None,
        };

        let (tx, rx) = oneshot::channel();
        connection.send(Message::init(user_agent), GenericResponseHandler::new(tx))?;
        connection.flush().await?;
        // INIT is answered by exactly one message; a server that rejects
        // it closes the transport, so the queued ACK_FAILURE is not awaited.
        connection.receive_one().await?;
        let metadata = match await_completion(rx).await {
            Ok(metadata) => metadata,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        connection.server_agent = metadata
            .get("server")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        tracing::debug!(
            address = %connection.address,
            server = ?connection.server_agent,
            "Bolt connection opened"
        );
        Ok(connection)
    }

    /// Encode a request and queue its handler. Nothing is written to the
    /// transport until [`flush`](Self::flush).
    pub fn send(
        &mut self,
        message: Message,
        handler: impl Into<ResponseHandler>,
    ) -> DriverResult<()> {
        self.ensure_usable()?;
        if !message.is_request() {
            return Err(DriverError::protocol_violation(format!(
                "{} is a response message and cannot be sent by a client",
                message.name()
            )));
        }

        if let Err(e) = self.writer.write(&message) {
            self.writer.reset();
            return Err(e.into());
        }
        let payload = self.writer.take();
        self.codec
            .encode(payload, &mut self.write_buffer)
            .map_err(DriverError::from)?;

        tracing::trace!(address = %self.address, message = message.name(), "queued");
        self.pending.push_back(handler.into());
        Ok(())
    }

    /// Write every queued request to the transport.
    pub async fn flush(&mut self) -> DriverResult<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        let result = match self.stream.write_all(&self.write_buffer).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        self.write_buffer.clear();
        result.map_err(|e| self.transport_failed(e))
    }

    /// Flush and read responses until every queued handler has completed.
    pub async fn sync(&mut self) -> DriverResult<()> {
        self.flush().await?;
        while !self.pending.is_empty() {
            self.receive_one().await?;
            // An ACK_FAILURE may have been queued while dispatching
            self.flush().await?;
        }
        Ok(())
    }

    /// Read and dispatch exactly one response.
    pub async fn receive_one(&mut self) -> DriverResult<()> {
        self.ensure_usable()?;
        let frame = self.read_frame().await?;
        let reader = self.reader;
        let result = reader.read(&frame, self);
        if let Err(e) = &result {
            if e.requires_disposal() {
                tracing::warn!(address = %self.address, error = %e, "Bolt connection broken");
                self.state = BoltConnectionState::Broken;
            }
        }
        result
    }

    /// Send RESET and wait for it, leaving a clean connection.
    pub async fn reset(&mut self) -> DriverResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(
            Message::Reset,
            GenericResponseHandler::new(tx).clearing_failure(),
        )?;
        self.sync().await?;
        await_completion(rx).await.map(|_| ())
    }

    /// Close the transport. Every queued handler fails.
    pub async fn close(&mut self) {
        if self.state == BoltConnectionState::Closed {
            return;
        }
        self.state = BoltConnectionState::Closed;
        for mut handler in self.pending.drain(..) {
            // Handlers that already completed reject the callback; ignore.
            let _ = handler.on_failure(DriverError::service_unavailable("Connection closed"));
        }
        self.write_buffer.clear();
        let _ = self.stream.shutdown().await;
        tracing::debug!(address = %self.address, "Bolt connection closed");
    }

    /// Get the connection state.
    pub fn state(&self) -> BoltConnectionState {
        self.state
    }

    /// Ready with no queued work and no unacknowledged failure.
    pub fn is_idle(&self) -> bool {
        self.state == BoltConnectionState::Ready
            && self.pending.is_empty()
            && self.write_buffer.is_empty()
            && self.current_failure.is_none()
    }

    /// Can still carry requests.
    pub fn is_open(&self) -> bool {
        self.state == BoltConnectionState::Ready
    }

    /// Number of requests waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Failure the server reported and that has not been acknowledged yet.
    pub fn current_failure(&self) -> Option<(&str, &str)> {
        self.current_failure
            .as_ref()
            .map(|(code, message)| (code.as_str(), message.as_str()))
    }

    /// Get the server address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Get the negotiated protocol version.
    pub fn protocol_version(&self) -> BoltVersion {
        self.protocol_version
    }

    /// Server agent reported on INIT.
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    async fn read_frame(&mut self) -> DriverResult<BytesMut> {
        loop {
            match self.codec.decode(&mut self.read_buffer) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => {
                    self.state = BoltConnectionState::Broken;
                    return Err(e.into());
                }
            }

            match self.stream.read_buf(&mut self.read_buffer).await {
                Ok(0) => {
                    self.state = BoltConnectionState::Broken;
                    return Err(DriverError::service_unavailable(format!(
                        "Connection to {} closed by server",
                        self.address
                    )));
                }
                Ok(_) => {}
                Err(e) => return Err(self.transport_failed(e)),
            }
        }
    }

    fn ensure_usable(&self) -> DriverResult<()> {
        match self.state {
            BoltConnectionState::Ready => Ok(()),
            BoltConnectionState::Broken => Err(DriverError::service_unavailable(format!(
                "Connection to {} is broken",
                self.address
            ))),
            BoltConnectionState::Closed => Err(DriverError::service_unavailable(format!(
                "Connection to {} is closed",
                self.address
            ))),
        }
    }

    fn transport_failed(&mut self, e: std::io::Error) -> DriverError {
        tracing::warn!(address = %self.address, error = %e, "Bolt transport failed");
        self.state = BoltConnectionState::Broken;
        DriverError::service_unavailable(format!("Connection to {} failed: {}", self.address, e))
    }

    fn next_handler(&mut self, response: u8) -> DriverResult<ResponseHandler> {
        self.pending.pop_front().ok_or_else(|| {
            DriverError::protocol_violation(format!(
                "Received {} with no pending request",
                name_of(response)
            ))
        })
    }

    fn unexpected_request(&self, request: u8) -> DriverError {
        DriverError::protocol_violation(format!(
            "Received request message {} from {}",
            name_of(request),
            self.address
        ))
    }
}

impl MessageHandler for BoltConnection {
    type Error = DriverError;

    fn handle_init(&mut self, _client_name: String) -> DriverResult<()> {
        Err(self.unexpected_request(tag::INIT))
    }

    fn handle_run(
        &mut self,
        _statement: String,
        _parameters: std::collections::HashMap<String, PackStreamValue>,
    ) -> DriverResult<()> {
        Err(self.unexpected_request(tag::RUN))
    }

    fn handle_pull_all(&mut self) -> DriverResult<()> {
        Err(self.unexpected_request(tag::PULL_ALL))
    }

    fn handle_discard_all(&mut self) -> DriverResult<()> {
        Err(self.unexpected_request(tag::DISCARD_ALL))
    }

    fn handle_ack_failure(&mut self) -> DriverResult<()> {
        Err(self.unexpected_request(tag::ACK_FAILURE))
    }

    fn handle_reset(&mut self) -> DriverResult<()> {
        Err(self.unexpected_request(tag::RESET))
    }

    fn handle_success(&mut self, metadata: Metadata) -> DriverResult<()> {
        let mut handler = self.next_handler(tag::SUCCESS)?;
        if handler.clears_failure() {
            self.current_failure = None;
        }
        handler.on_success(metadata)
    }

    fn handle_record(&mut self, fields: Vec<PackStreamValue>) -> DriverResult<()> {
        match self.pending.front_mut() {
            Some(handler) => handler.on_record(fields),
            None => Err(DriverError::protocol_violation(
                "Received RECORD with no pending request",
            )),
        }
    }

    fn handle_failure(&mut self, code: String, message: String) -> DriverResult<()> {
        let mut handler = self.next_handler(tag::FAILURE)?;
        tracing::debug!(address = %self.address, %code, %message, "server reported failure");

        if handler.clears_failure() {
            // The acknowledgement itself failed; the server is in an unknown state.
            self.state = BoltConnectionState::Broken;
        } else if self.current_failure.is_none() {
            let acknowledging = self.pending.iter().any(ResponseHandler::clears_failure);
            if !acknowledging {
                self.send(
                    Message::AckFailure,
                    GenericResponseHandler::detached().clearing_failure(),
                )?;
            }
        }

        self.current_failure = Some((code.clone(), message.clone()));
        handler.on_failure(DriverError::from_failure(code, message))
    }

    fn handle_ignored(&mut self) -> DriverResult<()> {
        let mut handler = self.next_handler(tag::IGNORED)?;
        match &self.current_failure {
            Some((code, message)) => {
                handler.on_failure(DriverError::from_failure(code.clone(), message.clone()))
            }
            None => handler.on_ignored(),
        }
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("protocol_version", &self.protocol_version)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Wait for a generic handler's outcome.
pub(crate) async fn await_completion<T>(
    rx: oneshot::Receiver<DriverResult<T>>,
) -> DriverResult<T> {
    rx.await.unwrap_or_else(|_| {
        Err(DriverError::protocol_violation(
            "Response handler dropped without completing",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::handlers::{PullAllResponseHandler, RunResponseHandler};
    use crate::driver::testkit::{ScriptedServer, Step};
    use std::collections::HashMap;

    fn address() -> ServerAddress {
        ServerAddress::new("localhost", 7687)
    }

    async fn open(script: Vec<Step>) -> (BoltConnection, ScriptedServer) {
        let (stream, server) = ScriptedServer::spawn(script);
        let connection = BoltConnection::open(stream, address(), "test/1.0", 1 << 20)
            .await
            .unwrap();
        (connection, server)
    }

    fn fields(names: &[&str]) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            "fields".into(),
            PackStreamValue::List(names.iter().map(|n| (*n).into()).collect()),
        );
        metadata
    }

    #[tokio::test]
    async fn test_open_sends_init() {
        let (connection, server) = open(Vec::new()).await;
        assert!(connection.is_idle());
        assert_eq!(connection.server_agent(), Some("Scripted/1.0"));
        assert_eq!(connection.protocol_version(), BoltVersion::V1);
        let received = server.received();
        assert_eq!(received, vec![Message::init("test/1.0")]);
    }

    #[tokio::test]
    async fn test_open_fails_on_init_failure() {
        let (stream, _server) = ScriptedServer::spawn_with_init(Step::fail(
            "Neo.ClientError.Security.Unauthorized",
            "bad credentials",
        ));
        let err = BoltConnection::open(stream, address(), "test/1.0", 1 << 20)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_pipelined_run_and_pull_all() {
        let (mut connection, server) = open(vec![
            Step::expect_run("RETURN 1 AS x"),
            Step::success(fields(&["x"])),
            Step::expect(Message::PullAll),
            Step::record(vec![1.into()]),
            Step::record(vec![2.into()]),
            Step::success(Metadata::new()),
        ])
        .await;

        let (run_tx, run_rx) = oneshot::channel();
        let (pull_tx, pull_rx) = oneshot::channel();
        connection
            .send(
                Message::run("RETURN 1 AS x", HashMap::new()),
                RunResponseHandler::new(run_tx),
            )
            .unwrap();
        connection
            .send(Message::PullAll, PullAllResponseHandler::new(pull_tx))
            .unwrap();
        assert_eq!(connection.pending(), 2);

        connection.sync().await.unwrap();

        assert_eq!(run_rx.await.unwrap().statement_keys, vec!["x"]);
        let outcome = pull_rx.await.unwrap().unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert!(connection.is_idle());
        server.finish().await;
    }

    #[tokio::test]
    async fn test_failure_acks_and_propagates_to_ignored() {
        let (mut connection, server) = open(vec![
            Step::expect_run("BAD"),
            Step::fail("Neo.ClientError.Statement.SyntaxError", "Invalid input"),
            Step::expect(Message::PullAll),
            Step::ignored(),
            Step::expect(Message::AckFailure),
            Step::success(Metadata::new()),
        ])
        .await;

        let (run_tx, run_rx) = oneshot::channel();
        let (pull_tx, pull_rx) = oneshot::channel();
        connection
            .send(Message::run("BAD", HashMap::new()), RunResponseHandler::new(run_tx))
            .unwrap();
        connection
            .send(Message::PullAll, PullAllResponseHandler::new(pull_tx))
            .unwrap();
        connection.sync().await.unwrap();

        // RUN completes without an error; the stream carries the failure
        assert!(run_rx.await.unwrap().statement_keys.is_empty());
        let err = pull_rx.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Some("Neo.ClientError.Statement.SyntaxError"));

        assert!(connection.current_failure().is_none());
        assert!(connection.is_idle());
        server.finish().await;
    }

    #[tokio::test]
    async fn test_ignored_without_failure_completes_handler() {
        let (mut connection, _server) = open(vec![
            Step::expect(Message::DiscardAll),
            Step::ignored(),
        ])
        .await;

        let (tx, rx) = oneshot::channel();
        connection
            .send(Message::DiscardAll, GenericResponseHandler::new(tx))
            .unwrap();
        connection.sync().await.unwrap();
        assert!(rx.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_for_run_breaks_connection() {
        let (mut connection, _server) = open(vec![
            Step::expect_run("RETURN 1"),
            Step::record(vec![1.into()]),
        ])
        .await;

        let (tx, _rx) = oneshot::channel();
        connection
            .send(Message::run("RETURN 1", HashMap::new()), RunResponseHandler::new(tx))
            .unwrap();
        let err = connection.sync().await.unwrap_err();

        assert!(matches!(err, DriverError::ProtocolViolation(_)));
        assert_eq!(connection.state(), BoltConnectionState::Broken);
        assert!(connection
            .send(Message::PullAll, GenericResponseHandler::detached())
            .is_err());
    }

    #[tokio::test]
    async fn test_malformed_record_is_decode_error() {
        let (mut connection, _server) = open(vec![
            Step::expect(Message::PullAll),
            // RECORD([NODE with no fields])
            Step::raw(vec![0xB1, tag::RECORD, 0x91, 0xB0, 0x4E]),
        ])
        .await;

        let (tx, _rx) = oneshot::channel();
        connection
            .send(Message::PullAll, PullAllResponseHandler::new(tx))
            .unwrap();
        let err = connection.sync().await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Decode error: Invalid message received, serialized NODE structures should have \
             3 fields, received NODE structure has 0 fields."
        );
        assert_eq!(connection.state(), BoltConnectionState::Broken);
    }

    #[tokio::test]
    async fn test_send_rejects_response_messages() {
        let (mut connection, _server) = open(Vec::new()).await;
        let err = connection
            .send(Message::Ignored, GenericResponseHandler::detached())
            .unwrap_err();
        assert!(matches!(err, DriverError::ProtocolViolation(_)));
        assert!(connection.is_idle());
    }

    #[tokio::test]
    async fn test_close_fails_pending_handlers() {
        let (mut connection, _server) = open(Vec::new()).await;
        let (tx, rx) = oneshot::channel();
        connection
            .send(Message::DiscardAll, GenericResponseHandler::new(tx))
            .unwrap();

        connection.close().await;

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Service unavailable: Connection closed");
        assert_eq!(connection.state(), BoltConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_server_hangup_breaks_connection() {
        let (mut connection, _server) = open(vec![
            Step::expect(Message::PullAll),
            Step::hang_up(),
        ])
        .await;

        let (tx, _rx) = oneshot::channel();
        connection
            .send(Message::PullAll, PullAllResponseHandler::new(tx))
            .unwrap();
        let err = connection.sync().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_reset_clears_failure() {
        let (mut connection, _server) = open(vec![
            Step::expect(Message::Reset),
            Step::success(Metadata::new()),
        ])
        .await;
        connection.reset().await.unwrap();
        assert!(connection.is_idle());
    }
}
