//! Background delivery worker.
//!
//! Merged payloads are handed off through an unbounded channel so admission
//! never waits on the network. One worker drains the channel and calls the
//! sink sequentially, preserving hand-off order.

use std::sync::Arc;
use std::time::Instant;

use engage_core::ActivityPayload;
use engage_telemetry::MetricsRecorder;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sink::{DeliverySink, Qualification};

pub(crate) type Outbox = mpsc::UnboundedSender<ActivityPayload>;

pub(crate) fn spawn_delivery_worker(
    runtime: &Handle,
    sink: Arc<dyn DeliverySink>,
    qualifications: broadcast::Sender<Qualification>,
    metrics: Option<Arc<MetricsRecorder>>,
) -> (Outbox, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = runtime.spawn(run(rx, sink, qualifications, metrics));
    (tx, handle)
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<ActivityPayload>,
    sink: Arc<dyn DeliverySink>,
    qualifications: broadcast::Sender<Qualification>,
    metrics: Option<Arc<MetricsRecorder>>,
) {
    let sink_name = sink.name();
    debug!(sink = %sink_name, "delivery worker started");

    while let Some(payload) = rx.recv().await {
        let started = Instant::now();
        match sink.deliver(&payload).await {
            Ok(result) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(
                    sink = %sink_name,
                    user_id = %payload.user_id,
                    events = payload.event_count(),
                    elapsed_ms,
                    "activity delivered"
                );
                if let Some(m) = &metrics {
                    m.counter_inc("delivery.sent", &[("sink", sink_name)], 1);
                    m.histogram_observe("delivery.latency_ms", &[("sink", sink_name)], elapsed_ms);
                }
                // No subscribers is fine.
                let _ = qualifications.send(Qualification::from_delivery(&payload, result));
            }
            Err(e) => {
                warn!(
                    sink = %sink_name,
                    user_id = %payload.user_id,
                    events = payload.event_count(),
                    kind = e.error_kind(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "activity delivery failed"
                );
                if let Some(m) = &metrics {
                    m.counter_inc(
                        "delivery.failed",
                        &[("sink", sink_name), ("kind", e.error_kind())],
                        1,
                    );
                }
            }
        }
    }

    debug!(sink = %sink_name, "delivery worker stopped");
}
