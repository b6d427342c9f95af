//! In-memory Bolt servers for tests.
//!
//! [`ScriptedServer`] plays a fixed sequence of expectations and replies over
//! one duplex stream. [`TestConnector`] hands out duplex streams served by a
//! responder closure or by a small statement server, one server task per
//! connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::bolt::handshake::{self, HANDSHAKE_SIZE};
use crate::bolt::{Message, MessageCodec, PackStreamValue};
use crate::driver::bolt::{BoxedStream, Connector};
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::handlers::Metadata;
use crate::driver::ServerAddress;

const BUFFER_SIZE: usize = 64 * 1024;

/// Server agent reported on INIT.
pub(crate) const SERVER_AGENT: &str = "Scripted/1.0";

pub(crate) type MessageLog = Arc<Mutex<Vec<Message>>>;

/// One scripted server action.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Expect(Message),
    ExpectRun(String),
    Reply(Message),
    Raw(Vec<u8>),
    HangUp,
}

impl Step {
    pub fn expect(message: Message) -> Self {
        Step::Expect(message)
    }

    pub fn expect_run(statement: &str) -> Self {
        Step::ExpectRun(statement.to_string())
    }

    pub fn success(metadata: Metadata) -> Self {
        Step::Reply(Message::success(metadata))
    }

    pub fn fail(code: &str, message: &str) -> Self {
        Step::Reply(Message::failure(code, message))
    }

    pub fn record(fields: Vec<PackStreamValue>) -> Self {
        Step::Reply(Message::Record { fields })
    }

    pub fn ignored() -> Self {
        Step::Reply(Message::Ignored)
    }

    /// Unframed message payload; the length prefix is added when sent.
    pub fn raw(payload: Vec<u8>) -> Self {
        Step::Raw(payload)
    }

    pub fn hang_up() -> Self {
        Step::HangUp
    }
}

/// Metadata a server sends in reply to INIT.
pub(crate) fn init_metadata() -> Metadata {
    let mut metadata = HashMap::new();
    metadata.insert("server".to_string(), PackStreamValue::from(SERVER_AGENT));
    metadata
}

/// SUCCESS metadata announcing result columns.
pub(crate) fn fields(names: &[&str]) -> Metadata {
    let mut metadata = HashMap::new();
    metadata.insert(
        "fields".to_string(),
        PackStreamValue::List(names.iter().map(|n| PackStreamValue::from(*n)).collect()),
    );
    metadata
}

// ============================================================================
// ScriptedServer
// ============================================================================

pub(crate) struct ScriptedServer {
    received: MessageLog,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    /// Accept the handshake, answer INIT with SUCCESS, then play `script`.
    pub fn spawn(script: Vec<Step>) -> (BoxedStream, Self) {
        Self::start(Step::success(init_metadata()), script)
    }

    /// Accept the handshake and answer INIT with `init_reply`.
    pub fn spawn_with_init(init_reply: Step) -> (BoxedStream, Self) {
        Self::start(init_reply, Vec::new())
    }

    fn start(init_reply: Step, script: Vec<Step>) -> (BoxedStream, Self) {
        let (client, server) = duplex(BUFFER_SIZE);
        let received = MessageLog::default();
        let log = received.clone();
        let task = tokio::spawn(async move {
            let mut framed = accept(server).await;
            let init = next_message(&mut framed, &log).await;
            assert!(matches!(init, Some(Message::Init { .. })), "expected INIT, got {:?}", init);
            if !play(&mut framed, &log, init_reply).await {
                return;
            }
            for step in script {
                if !play(&mut framed, &log, step).await {
                    return;
                }
            }
        });
        (Box::new(client), Self { received, task })
    }

    /// Messages received so far, INIT included.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Wait for the script to finish, surfacing any failed expectation.
    pub async fn finish(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}

async fn accept(mut stream: DuplexStream) -> Framed<DuplexStream, MessageCodec> {
    let mut preamble = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut preamble).await.unwrap();
    let version = handshake::accept(&preamble).unwrap();
    stream.write_all(&version.to_bytes()).await.unwrap();
    Framed::new(stream, MessageCodec::new())
}

async fn next_message(
    framed: &mut Framed<DuplexStream, MessageCodec>,
    log: &MessageLog,
) -> Option<Message> {
    let message = framed.next().await?.unwrap();
    log.lock().push(message.clone());
    Some(message)
}

/// Returns false once the connection should end.
async fn play(framed: &mut Framed<DuplexStream, MessageCodec>, log: &MessageLog, step: Step) -> bool {
    match step {
        Step::Expect(expected) => {
            let message = next_message(framed, log).await;
            assert_eq!(message.as_ref(), Some(&expected));
        }
        Step::ExpectRun(expected) => match next_message(framed, log).await {
            Some(Message::Run { statement, .. }) => assert_eq!(statement, expected),
            other => panic!("expected RUN {:?}, got {:?}", expected, other),
        },
        Step::Reply(message) => framed.send(message).await.unwrap(),
        Step::Raw(payload) => {
            let mut frame = BytesMut::with_capacity(4 + payload.len());
            frame.put_u32(payload.len() as u32);
            frame.put_slice(&payload);
            framed.get_mut().write_all(&frame).await.unwrap();
        }
        Step::HangUp => return false,
    }
    true
}

// ============================================================================
// TestConnector
// ============================================================================

/// Replies for one request.
pub(crate) type Responder = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

/// Replies every server gives when nothing else is scripted.
pub(crate) fn default_replies(message: &Message) -> Vec<Message> {
    match message {
        Message::Init { .. } => vec![Message::success(init_metadata())],
        Message::Run { .. } => vec![Message::success(fields(&[]))],
        _ => vec![Message::success(HashMap::new())],
    }
}

/// How the statement server answers one RUN.
#[derive(Debug, Clone)]
pub(crate) enum StatementReply {
    Rows {
        fields: Vec<String>,
        records: Vec<Vec<PackStreamValue>>,
    },
    Fail {
        code: String,
        message: String,
    },
}

impl StatementReply {
    /// No columns, no records (BEGIN, COMMIT, writes)
    pub fn empty() -> Self {
        Self::rows(&[], Vec::new())
    }

    pub fn rows(fields: &[&str], records: Vec<Vec<PackStreamValue>>) -> Self {
        StatementReply::Rows {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            records,
        }
    }

    pub fn fail(code: &str, message: &str) -> Self {
        StatementReply::Fail {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

pub(crate) type StatementFn = Arc<dyn Fn(&str) -> StatementReply + Send + Sync>;

/// Per-connection Bolt v1 server: after a FAILURE every request is IGNORED
/// until ACK_FAILURE or RESET.
struct StatementServer {
    statements: StatementFn,
    failed: bool,
    records: Vec<Vec<PackStreamValue>>,
}

impl StatementServer {
    fn new(statements: StatementFn) -> Self {
        Self {
            statements,
            failed: false,
            records: Vec::new(),
        }
    }

    fn reply(&mut self, message: &Message) -> Vec<Message> {
        match message {
            Message::Init { .. } => vec![Message::success(init_metadata())],
            Message::AckFailure | Message::Reset => {
                self.failed = false;
                self.records.clear();
                vec![Message::success(HashMap::new())]
            }
            _ if self.failed => vec![Message::Ignored],
            Message::Run { statement, .. } => match (self.statements)(statement) {
                StatementReply::Rows { fields: names, records } => {
                    self.records = records;
                    let names: Vec<&str> = names.iter().map(String::as_str).collect();
                    vec![Message::success(fields(&names))]
                }
                StatementReply::Fail { code, message } => {
                    self.failed = true;
                    self.records.clear();
                    vec![Message::failure(code, message)]
                }
            },
            Message::PullAll => {
                let mut replies: Vec<Message> = std::mem::take(&mut self.records)
                    .into_iter()
                    .map(|fields| Message::Record { fields })
                    .collect();
                let mut summary = HashMap::new();
                summary.insert("type".to_string(), PackStreamValue::from("rw"));
                summary.insert("result_consumed_after".to_string(), PackStreamValue::from(1i64));
                replies.push(Message::success(summary));
                replies
            }
            _ => {
                self.records.clear();
                vec![Message::success(HashMap::new())]
            }
        }
    }
}

/// Connector whose streams are served in-process.
pub(crate) struct TestConnector {
    responder: Responder,
    statements: Option<StatementFn>,
    received: MessageLog,
    connects: AtomicUsize,
    refuse: AtomicBool,
    silent: bool,
}

impl TestConnector {
    pub fn new() -> Arc<Self> {
        Self::responding(default_replies)
    }

    pub fn responding(
        responder: impl Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Arc::new(responder),
            statements: None,
            received: MessageLog::default(),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            silent: false,
        })
    }

    /// Servers that accept the transport but never answer the handshake.
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            responder: Arc::new(default_replies),
            statements: None,
            received: MessageLog::default(),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            silent: true,
        })
    }

    /// Servers that answer each RUN through `statements`, tracking failure
    /// state per connection.
    pub fn with_statements(
        statements: impl Fn(&str) -> StatementReply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Arc::new(default_replies),
            statements: Some(Arc::new(statements)),
            received: MessageLog::default(),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            silent: false,
        })
    }

    /// Statements of every RUN received, in arrival order.
    pub fn statements(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                Message::Run { statement, .. } => Some(statement),
                _ => None,
            })
            .collect()
    }

    /// Fail every later connection attempt.
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every request received on any connection, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Received requests other than INIT.
    pub fn requests(&self) -> Vec<Message> {
        self.received()
            .into_iter()
            .filter(|m| !matches!(m, Message::Init { .. }))
            .collect()
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, address: &ServerAddress) -> DriverResult<BoxedStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DriverError::service_unavailable(format!(
                "Connection refused by {}",
                address
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client, server) = duplex(BUFFER_SIZE);
        if self.silent {
            tokio::spawn(async move {
                let mut server = server;
                let mut sink = Vec::new();
                let _ = server.read_to_end(&mut sink).await;
            });
        } else {
            let responder = self.responder.clone();
            let mut statement_server = self.statements.clone().map(StatementServer::new);
            let log = self.received.clone();
            tokio::spawn(async move {
                let mut framed = accept(server).await;
                while let Some(Ok(message)) = framed.next().await {
                    log.lock().push(message.clone());
                    let replies = match statement_server.as_mut() {
                        Some(server) => server.reply(&message),
                        None => responder(&message),
                    };
                    for reply in replies {
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
        Ok(Box::new(client))
    }
}
