//! Delivery seam: where merged payloads leave the pipeline.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use engage_core::{ActivityPayload, DeliveryError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Opaque response body returned by the ingest endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualificationResult {
    pub body: Value,
}

impl QualificationResult {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A completed delivery, broadcast to subscribers of the queue.
#[derive(Clone, Debug)]
pub struct Qualification {
    pub account_id: String,
    pub user_id: String,
    pub event_names: Vec<String>,
    pub result: QualificationResult,
}

impl Qualification {
    pub(crate) fn from_delivery(payload: &ActivityPayload, result: QualificationResult) -> Self {
        Self {
            account_id: payload.account_id.clone(),
            user_id: payload.user_id.clone(),
            event_names: payload.event_names().into_iter().map(str::to_owned).collect(),
            result,
        }
    }
}

/// Transport for merged payloads. Invoked sequentially, in hand-off order,
/// from the delivery worker.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &str {
        "sink"
    }

    async fn deliver(&self, payload: &ActivityPayload) -> Result<QualificationResult, DeliveryError>;
}

/// Writes each payload's wire JSON as one line, either to stdout or only to
/// the log.
#[derive(Debug, Default)]
pub struct LogSink {
    stdout: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout() -> Self {
        Self { stdout: true }
    }
}

#[async_trait]
impl DeliverySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, payload: &ActivityPayload) -> Result<QualificationResult, DeliveryError> {
        let line = serde_json::to_string(&payload.to_wire())?;
        if self.stdout {
            writeln!(std::io::stdout(), "{line}").map_err(|e| DeliveryError::Io(e.to_string()))?;
        } else {
            info!(user_id = %payload.user_id, body = %line, "activity");
        }
        Ok(QualificationResult::empty())
    }
}

/// In-memory sink that records deliveries and plays back scripted outcomes.
///
/// Outcomes queued with [`RecordingSink::push_outcome`] are consumed one per
/// delivery; once exhausted every delivery succeeds with an empty body.
/// Failed deliveries are still recorded.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<ActivityPayload>>,
    outcomes: Mutex<VecDeque<Result<QualificationResult, DeliveryError>>>,
    latency: Option<Duration>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery sleeps for `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn push_outcome(&self, outcome: Result<QualificationResult, DeliveryError>) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn deliveries(&self) -> Vec<ActivityPayload> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Wait until at least `count` deliveries have been recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<ActivityPayload> {
        loop {
            let notified = self.notify.notified();
            if self.count() >= count {
                return self.deliveries();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, payload: &ActivityPayload) -> Result<QualificationResult, DeliveryError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QualificationResult::empty()));
        self.delivered.lock().push(payload.clone());
        debug!(recorded = self.count(), "recorded delivery");
        self.notify.notify_waiters();
        outcome
    }
}
