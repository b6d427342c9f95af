//! Response handlers
//!
//! Every request that expects a reply is paired with one handler when it is
//! sent. The connection feeds responses to the handler at the head of its
//! queue; the handler resolves a oneshot completion signal when its terminal
//! callback (success, failure or ignored) fires. A second terminal callback
//! means responses and requests no longer line up and is reported as a
//! protocol violation.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::error::{DriverError, DriverResult};
use crate::bolt::PackStreamValue;

/// SUCCESS metadata
pub type Metadata = HashMap<String, PackStreamValue>;

// ============================================================================
// Run
// ============================================================================

/// What a RUN round trip reported.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Result column names
    pub statement_keys: Vec<String>,
    /// Milliseconds until the first record was available, -1 if unknown
    pub result_available_after: i64,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            statement_keys: Vec::new(),
            result_available_after: -1,
        }
    }
}

impl RunSummary {
    fn from_metadata(metadata: &Metadata) -> Self {
        let statement_keys = metadata
            .get("fields")
            .and_then(|v| v.as_list())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let result_available_after = metadata
            .get("result_available_after")
            .and_then(|v| v.as_int())
            .unwrap_or(-1);
        Self {
            statement_keys,
            result_available_after,
        }
    }
}

/// Handler for RUN.
///
/// The completion signal fires on success and on failure alike: it tells
/// the caller the round trip is over, not whether the statement worked.
/// After a failure the cached keys are empty and the timing is -1.
#[derive(Debug)]
pub struct RunResponseHandler {
    completion: Option<oneshot::Sender<RunSummary>>,
    summary: RunSummary,
    completed: bool,
}

impl RunResponseHandler {
    pub fn new(completion: oneshot::Sender<RunSummary>) -> Self {
        Self {
            completion: Some(completion),
            summary: RunSummary::default(),
            completed: false,
        }
    }

    /// Result column names, empty until a successful completion
    pub fn statement_keys(&self) -> &[String] {
        &self.summary.statement_keys
    }

    /// Milliseconds until results were available, -1 until a successful completion
    pub fn result_available_after(&self) -> i64 {
        self.summary.result_available_after
    }

    pub fn on_success(&mut self, metadata: Metadata) -> DriverResult<()> {
        self.complete("RUN")?;
        self.summary = RunSummary::from_metadata(&metadata);
        self.resolve();
        Ok(())
    }

    pub fn on_failure(&mut self, _error: DriverError) -> DriverResult<()> {
        self.complete("RUN")?;
        self.summary = RunSummary::default();
        self.resolve();
        Ok(())
    }

    pub fn on_ignored(&mut self) -> DriverResult<()> {
        self.complete("RUN")?;
        self.resolve();
        Ok(())
    }

    pub fn on_record(&mut self, _fields: Vec<PackStreamValue>) -> DriverResult<()> {
        Err(DriverError::protocol_violation(
            "RUN response handler received a RECORD",
        ))
    }

    fn complete(&mut self, name: &str) -> DriverResult<()> {
        mark_completed(&mut self.completed, name)
    }

    fn resolve(&mut self) {
        if let Some(tx) = self.completion.take() {
            // The receiver may have been dropped; nothing is waiting then.
            let _ = tx.send(self.summary.clone());
        }
    }
}

// ============================================================================
// Stream (PULL_ALL)
// ============================================================================

/// Records and trailing metadata of a finished stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub records: Vec<Vec<PackStreamValue>>,
    pub metadata: Metadata,
}

/// Handler for PULL_ALL: buffers records until the stream ends.
#[derive(Debug)]
pub struct PullAllResponseHandler {
    completion: Option<oneshot::Sender<DriverResult<StreamOutcome>>>,
    records: Vec<Vec<PackStreamValue>>,
    completed: bool,
}

impl PullAllResponseHandler {
    pub fn new(completion: oneshot::Sender<DriverResult<StreamOutcome>>) -> Self {
        Self {
            completion: Some(completion),
            records: Vec::new(),
            completed: false,
        }
    }

    /// Records received so far
    pub fn buffered(&self) -> usize {
        self.records.len()
    }

    pub fn on_record(&mut self, fields: Vec<PackStreamValue>) -> DriverResult<()> {
        if self.completed {
            return Err(DriverError::protocol_violation(
                "PULL_ALL response handler received a RECORD after completion",
            ));
        }
        self.records.push(fields);
        Ok(())
    }

    pub fn on_success(&mut self, metadata: Metadata) -> DriverResult<()> {
        mark_completed(&mut self.completed, "PULL_ALL")?;
        let records = std::mem::take(&mut self.records);
        self.resolve(Ok(StreamOutcome { records, metadata }));
        Ok(())
    }

    pub fn on_failure(&mut self, error: DriverError) -> DriverResult<()> {
        mark_completed(&mut self.completed, "PULL_ALL")?;
        self.records.clear();
        self.resolve(Err(error));
        Ok(())
    }

    pub fn on_ignored(&mut self) -> DriverResult<()> {
        mark_completed(&mut self.completed, "PULL_ALL")?;
        let records = std::mem::take(&mut self.records);
        self.resolve(Ok(StreamOutcome {
            records,
            metadata: Metadata::new(),
        }));
        Ok(())
    }

    fn resolve(&mut self, outcome: DriverResult<StreamOutcome>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

// ============================================================================
// Generic
// ============================================================================

/// Handler for requests answered by a single SUCCESS: INIT, DISCARD_ALL,
/// ACK_FAILURE and RESET.
#[derive(Debug)]
pub struct GenericResponseHandler {
    completion: Option<oneshot::Sender<DriverResult<Metadata>>>,
    clears_failure: bool,
    completed: bool,
}

impl GenericResponseHandler {
    pub fn new(completion: oneshot::Sender<DriverResult<Metadata>>) -> Self {
        Self {
            completion: Some(completion),
            clears_failure: false,
            completed: false,
        }
    }

    /// A handler nobody waits on.
    pub fn detached() -> Self {
        Self {
            completion: None,
            clears_failure: false,
            completed: false,
        }
    }

    /// Mark this as the handler of ACK_FAILURE or RESET: its SUCCESS clears
    /// the connection's current failure.
    pub fn clearing_failure(mut self) -> Self {
        self.clears_failure = true;
        self
    }

    pub fn clears_failure(&self) -> bool {
        self.clears_failure
    }

    pub fn on_success(&mut self, metadata: Metadata) -> DriverResult<()> {
        mark_completed(&mut self.completed, "generic")?;
        self.resolve(Ok(metadata));
        Ok(())
    }

    pub fn on_failure(&mut self, error: DriverError) -> DriverResult<()> {
        mark_completed(&mut self.completed, "generic")?;
        self.resolve(Err(error));
        Ok(())
    }

    pub fn on_ignored(&mut self) -> DriverResult<()> {
        mark_completed(&mut self.completed, "generic")?;
        self.resolve(Ok(Metadata::new()));
        Ok(())
    }

    pub fn on_record(&mut self, _fields: Vec<PackStreamValue>) -> DriverResult<()> {
        Err(DriverError::protocol_violation(
            "Non-streaming response handler received a RECORD",
        ))
    }

    fn resolve(&mut self, outcome: DriverResult<Metadata>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

fn mark_completed(completed: &mut bool, name: &str) -> DriverResult<()> {
    if *completed {
        return Err(DriverError::protocol_violation(format!(
            "{} response handler already completed",
            name
        )));
    }
    *completed = true;
    Ok(())
}

// ============================================================================
// ResponseHandler
// ============================================================================

/// The closed set of handlers a connection can queue.
#[derive(Debug)]
pub enum ResponseHandler {
    Run(RunResponseHandler),
    Stream(PullAllResponseHandler),
    Generic(GenericResponseHandler),
}

impl ResponseHandler {
    pub fn on_success(&mut self, metadata: Metadata) -> DriverResult<()> {
        match self {
            Self::Run(h) => h.on_success(metadata),
            Self::Stream(h) => h.on_success(metadata),
            Self::Generic(h) => h.on_success(metadata),
        }
    }

    pub fn on_failure(&mut self, error: DriverError) -> DriverResult<()> {
        match self {
            Self::Run(h) => h.on_failure(error),
            Self::Stream(h) => h.on_failure(error),
            Self::Generic(h) => h.on_failure(error),
        }
    }

    pub fn on_record(&mut self, fields: Vec<PackStreamValue>) -> DriverResult<()> {
        match self {
            Self::Run(h) => h.on_record(fields),
            Self::Stream(h) => h.on_record(fields),
            Self::Generic(h) => h.on_record(fields),
        }
    }

    pub fn on_ignored(&mut self) -> DriverResult<()> {
        match self {
            Self::Run(h) => h.on_ignored(),
            Self::Stream(h) => h.on_ignored(),
            Self::Generic(h) => h.on_ignored(),
        }
    }

    /// Whether SUCCESS for this request clears the connection's failure
    pub fn clears_failure(&self) -> bool {
        matches!(self, Self::Generic(h) if h.clears_failure())
    }
}

impl From<RunResponseHandler> for ResponseHandler {
    fn from(h: RunResponseHandler) -> Self {
        Self::Run(h)
    }
}

impl From<PullAllResponseHandler> for ResponseHandler {
    fn from(h: PullAllResponseHandler) -> Self {
        Self::Stream(h)
    }
}

impl From<GenericResponseHandler> for ResponseHandler {
    fn from(h: GenericResponseHandler) -> Self {
        Self::Generic(h)
    }
}

// ============================================================================
// Tests
// ============================================================================
