//! Debounced batch queue with four admission operations.
//!
//! Pending payloads accumulate in a single batch guarded by one mutex. A
//! batch is flushed (merged and handed to the delivery worker) when the
//! debounce timer fires, when an immediate or separate admission arrives,
//! or on an explicit flush. All state transitions happen under the batch
//! lock; the timer callback re-enters through the same lock and discards
//! itself if the timer it was armed with has since been cancelled.
//!
//! Lock order is batch, then scheduler. Nothing awaits while holding either.

use std::sync::{Arc, Weak};
use std::time::Duration;

use engage_core::{ActivityPayload, PipelineError};
use engage_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{spawn_delivery_worker, Outbox};
use crate::merge::merge;
use crate::scheduler::{Scheduler, TimerId};
use crate::sink::{DeliverySink, Qualification};

const QUALIFICATION_CAPACITY: usize = 64;

/// How a payload enters the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionPolicy {
    /// Join the pending batch; flush when the debounce window closes.
    Deferred,
    /// Join the pending batch and flush it now.
    Immediate,
    /// Flush the pending batch now, then deliver this payload on its own.
    Separate,
}

impl AdmissionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Separate => "separate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlushReason {
    Timer,
    Immediate,
    Separate,
    Manual,
    Shutdown,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Immediate => "immediate",
            Self::Separate => "separate",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Debounce window measured from the first deferred payload of a batch.
    pub debounce: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(10),
        }
    }
}

struct PendingBatch {
    payloads: Vec<ActivityPayload>,
    timer: Option<TimerId>,
    /// `None` once the queue has shut down.
    outbox: Option<Outbox>,
}

struct Shared {
    batch: Mutex<PendingBatch>,
    scheduler: Scheduler,
    config: QueueConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Shared {
    /// Timer callback entry point. Stale firings are ignored.
    fn on_timer(&self, id: TimerId) {
        let mut batch = self.batch.lock();
        if batch.timer != Some(id) {
            trace!(?id, "ignoring stale debounce timer");
            return;
        }
        batch.timer = None;
        self.flush_locked(&mut batch, FlushReason::Timer);
    }

    fn arm_locked(self: &Arc<Self>, batch: &mut PendingBatch) {
        let weak: Weak<Self> = Arc::downgrade(self);
        batch.timer = self.scheduler.schedule(self.config.debounce, move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.on_timer(id);
            }
        });
        if batch.timer.is_none() {
            warn!("debounce timer already armed with no batch timer recorded");
        }
    }

    fn cancel_timer_locked(&self, batch: &mut PendingBatch) {
        if batch.timer.take().is_some() {
            let _ = self.scheduler.cancel();
        }
    }

    /// Snapshot and clear the batch, merge it, and hand the result off.
    /// An empty batch hands off nothing.
    fn flush_locked(&self, batch: &mut PendingBatch, reason: FlushReason) {
        let payloads = std::mem::take(&mut batch.payloads);
        let merged_from = payloads.len();
        if let Some(merged) = merge(payloads) {
            debug!(reason = reason.as_str(), merged_from, "flushing batch");
            if let Some(m) = &self.metrics {
                m.counter_inc("queue.flushes", &[("reason", reason.as_str())], 1);
            }
            self.hand_off(batch, merged);
        }
        self.record_pending(batch);
    }

    fn hand_off(&self, batch: &PendingBatch, payload: ActivityPayload) {
        match &batch.outbox {
            Some(outbox) => {
                if outbox.send(payload).is_err() {
                    warn!("delivery worker has stopped, dropping payload");
                }
            }
            None => warn!("queue is shut down, dropping payload"),
        }
    }

    fn record_pending(&self, batch: &PendingBatch) {
        if let Some(m) = &self.metrics {
            m.gauge_set("queue.pending", &[], batch.payloads.len() as f64);
        }
    }

    /// Lock the batch for an admission, or `None` if the queue is closed.
    fn admit(
        &self,
        policy: AdmissionPolicy,
    ) -> Option<parking_lot::MutexGuard<'_, PendingBatch>> {
        let batch = self.batch.lock();
        if batch.outbox.is_none() {
            warn!(policy = policy.as_str(), "admission after shutdown ignored");
            return None;
        }
        if let Some(m) = &self.metrics {
            m.counter_inc("queue.enqueued", &[("policy", policy.as_str())], 1);
        }
        Some(batch)
    }
}

/// Thread-safe batching queue. Admission operations never block on delivery.
pub struct BatchQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    qualifications: broadcast::Sender<Qualification>,
}

impl BatchQueue {
    /// Build a queue on the current tokio runtime.
    pub fn new(config: QueueConfig, sink: Arc<dyn DeliverySink>) -> Result<Self, PipelineError> {
        Self::with_metrics(config, sink, None)
    }

    pub fn with_metrics(
        config: QueueConfig,
        sink: Arc<dyn DeliverySink>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Result<Self, PipelineError> {
        let runtime = Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(config, sink, metrics, runtime))
    }

    pub fn with_runtime(
        config: QueueConfig,
        sink: Arc<dyn DeliverySink>,
        metrics: Option<Arc<MetricsRecorder>>,
        runtime: Handle,
    ) -> Self {
        let (qualifications, _) = broadcast::channel(QUALIFICATION_CAPACITY);
        let (outbox, worker) =
            spawn_delivery_worker(&runtime, sink, qualifications.clone(), metrics.clone());
        info!(debounce_ms = config.debounce.as_millis() as u64, "batch queue started");
        Self {
            shared: Arc::new(Shared {
                batch: Mutex::new(PendingBatch {
                    payloads: Vec::new(),
                    timer: None,
                    outbox: Some(outbox),
                }),
                scheduler: Scheduler::new(runtime),
                config,
                metrics,
            }),
            worker: Mutex::new(Some(worker)),
            qualifications,
        }
    }

    /// Add to the pending batch, arming the debounce timer if the queue was idle.
    pub fn enqueue_deferred(&self, payload: ActivityPayload) {
        let Some(mut batch) = self.shared.admit(AdmissionPolicy::Deferred) else {
            return;
        };
        batch.payloads.push(payload);
        if batch.timer.is_none() {
            self.shared.arm_locked(&mut batch);
        }
        self.shared.record_pending(&batch);
    }

    /// Add to the pending batch and flush it now. The payload rides in the
    /// same merged delivery as whatever was pending.
    pub fn enqueue_immediate(&self, payload: ActivityPayload) {
        let Some(mut batch) = self.shared.admit(AdmissionPolicy::Immediate) else {
            return;
        };
        self.shared.cancel_timer_locked(&mut batch);
        batch.payloads.push(payload);
        self.shared.flush_locked(&mut batch, FlushReason::Immediate);
    }

    /// Flush whatever is pending, then deliver `payload` as its own
    /// unmerged delivery.
    pub fn flush_then_deliver_separately(&self, payload: ActivityPayload) {
        let Some(mut batch) = self.shared.admit(AdmissionPolicy::Separate) else {
            return;
        };
        self.shared.cancel_timer_locked(&mut batch);
        self.shared.flush_locked(&mut batch, FlushReason::Separate);
        self.shared.hand_off(&batch, payload);
    }

    /// Flush whatever is pending. A no-op on an empty queue.
    pub fn flush_all(&self) {
        let mut batch = self.shared.batch.lock();
        self.shared.cancel_timer_locked(&mut batch);
        self.shared.flush_locked(&mut batch, FlushReason::Manual);
    }

    pub fn enqueue(&self, payload: ActivityPayload, policy: AdmissionPolicy) {
        match policy {
            AdmissionPolicy::Deferred => self.enqueue_deferred(payload),
            AdmissionPolicy::Immediate => self.enqueue_immediate(payload),
            AdmissionPolicy::Separate => self.flush_then_deliver_separately(payload),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.batch.lock().payloads.len()
    }

    /// Whether a debounce timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.shared.batch.lock().timer.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.batch.lock().outbox.is_none()
    }

    /// Receive a [`Qualification`] for every successful delivery.
    pub fn subscribe(&self) -> broadcast::Receiver<Qualification> {
        self.qualifications.subscribe()
    }

    /// Flush pending payloads, stop accepting admissions, and wait for every
    /// handed-off payload to be delivered. Idempotent.
    pub async fn shutdown(&self) {
        let worker = {
            let mut batch = self.shared.batch.lock();
            self.shared.cancel_timer_locked(&mut batch);
            self.shared.flush_locked(&mut batch, FlushReason::Shutdown);
            batch.outbox = None;
            self.worker.lock().take()
        };
        let Some(worker) = worker else {
            return;
        };
        if let Err(e) = worker.await {
            warn!(error = %e, "delivery worker ended abnormally");
        }
        info!("batch queue shut down");
    }
}

impl std::fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let batch = self.shared.batch.lock();
        f.debug_struct("BatchQueue")
            .field("pending", &batch.payloads.len())
            .field("armed", &batch.timer.is_some())
            .field("closed", &batch.outbox.is_none())
            .finish()
    }
}
