//! Host-facing entry point: gate, decorate, and enqueue each intent.

use std::sync::Arc;
use std::time::Duration;

use engage_core::settings::DeviceSettings;
use engage_core::{EngageSettings, Intent, PipelineError, Properties, SessionState};
use engage_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::decorator::{AutoPropertyDecorator, IntentDecorator};
use crate::gate::{
    GateDecision, IdentityStore, MemoryIdentityStore, SessionGate, SessionPolicy, StartReason,
    StoredIdentityPolicy,
};
use crate::queue::{AdmissionPolicy, BatchQueue, QueueConfig};
use crate::sink::{DeliverySink, Qualification};

#[derive(Clone, Debug)]
pub struct AnalyticsConfig {
    pub account_id: String,
    pub application_id: String,
    pub debounce: Duration,
    pub session_timeout: Duration,
    pub allow_anonymous: bool,
    pub device: DeviceSettings,
}

impl AnalyticsConfig {
    pub fn from_settings(settings: &EngageSettings) -> Self {
        Self {
            account_id: settings.account_id.clone(),
            application_id: settings.application_id.clone(),
            debounce: settings.pipeline.debounce(),
            session_timeout: Duration::from_secs(settings.session.timeout_secs),
            allow_anonymous: settings.session.allow_anonymous,
            device: settings.device.clone(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self::from_settings(&EngageSettings::default())
    }
}

/// Optional overrides for the pieces [`Analytics`] is assembled from.
pub struct AnalyticsBuilder {
    config: AnalyticsConfig,
    sink: Arc<dyn DeliverySink>,
    store: Option<Arc<dyn IdentityStore>>,
    policy: Option<Box<dyn SessionPolicy>>,
    decorator: Option<Box<dyn IntentDecorator>>,
    metrics: Option<Arc<MetricsRecorder>>,
    runtime: Option<Handle>,
}

impl AnalyticsBuilder {
    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_policy(mut self, policy: Box<dyn SessionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn decorator(mut self, decorator: Box<dyn IntentDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Analytics, PipelineError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string()))?,
        };
        let config = self.config;

        let store: Arc<dyn IdentityStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryIdentityStore::new()),
        };
        let policy: Box<dyn SessionPolicy> = match self.policy {
            Some(policy) => policy,
            None => Box::new(StoredIdentityPolicy::new(
                config.account_id.as_str(),
                config.allow_anonymous,
            )),
        };
        let decorator: Box<dyn IntentDecorator> = match self.decorator {
            Some(decorator) => decorator,
            None => Box::new(AutoPropertyDecorator::new(
                config.application_id.as_str(),
                config.device.clone(),
            )),
        };
        let queue = BatchQueue::with_runtime(
            QueueConfig {
                debounce: config.debounce,
            },
            self.sink,
            self.metrics.clone(),
            runtime,
        );

        Ok(Analytics {
            gate: SessionGate::new(store, policy, config.session_timeout),
            decorator,
            queue,
            admission: Mutex::new(()),
            metrics: self.metrics,
        })
    }
}

/// The activity pipeline as seen by a host application.
///
/// Admissions are serialized: gate, decoration, and enqueue for one intent
/// complete before the next intent is gated, so a synthesized session start
/// always precedes the intent that caused it.
pub struct Analytics {
    gate: SessionGate,
    decorator: Box<dyn IntentDecorator>,
    queue: BatchQueue,
    admission: Mutex<()>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Analytics {
    pub fn new(config: AnalyticsConfig, sink: Arc<dyn DeliverySink>) -> Result<Self, PipelineError> {
        Self::builder(config, sink).build()
    }

    pub fn builder(config: AnalyticsConfig, sink: Arc<dyn DeliverySink>) -> AnalyticsBuilder {
        AnalyticsBuilder {
            config,
            sink,
            store: None,
            policy: None,
            decorator: None,
            metrics: None,
            runtime: None,
        }
    }

    /// Attribute activity to `user_id`. Delivered on its own.
    pub fn identify(&self, user_id: impl Into<String>, properties: Properties) {
        self.submit(Intent::identify(user_id, properties), AdmissionPolicy::Separate);
    }

    /// Switch to an anonymous identity. Delivered on its own.
    pub fn anonymous(&self) {
        self.submit(Intent::anonymous(), AdmissionPolicy::Separate);
    }

    /// Associate the user with a group, or clear it with `None`. Delivered on its own.
    pub fn group(&self, group_id: Option<String>, properties: Properties) {
        self.submit(Intent::group(group_id, properties), AdmissionPolicy::Separate);
    }

    pub fn update_profile(&self, properties: Properties) {
        self.submit(Intent::update_profile(properties), AdmissionPolicy::Deferred);
    }

    /// Record an event. Interactive events flush the pending batch with them.
    pub fn track(&self, name: impl Into<String>, attributes: Properties, interactive: bool) {
        let policy = if interactive {
            AdmissionPolicy::Immediate
        } else {
            AdmissionPolicy::Deferred
        };
        self.submit(Intent::event(name, attributes), policy);
    }

    pub fn screen(&self, title: impl Into<String>, attributes: Properties) {
        self.submit(Intent::screen(title, attributes), AdmissionPolicy::Immediate);
    }

    /// Gate, decorate, and enqueue one intent under `policy`.
    pub fn submit(&self, intent: Intent, policy: AdmissionPolicy) {
        let _admission = self.admission.lock();
        match self.gate.admit(&intent) {
            GateDecision::Proceed(session) => self.enqueue(&intent, &session, policy),
            GateDecision::StartSession { session, reason } => {
                if let Some(m) = &self.metrics {
                    m.counter_inc("session.started", &[("reason", reason.as_str())], 1);
                }
                if reason == StartReason::UserChanged {
                    // Pending payloads belong to the previous user.
                    self.queue.flush_all();
                }
                let started = Intent::session_started(intent.created_at);
                self.enqueue(&started, &session, AdmissionPolicy::Deferred);
                self.enqueue(&intent, &session, policy);
            }
            GateDecision::Drop(reason) => {
                warn!(
                    kind = intent.kind_name(),
                    reason = reason.as_str(),
                    "intent dropped"
                );
                if let Some(m) = &self.metrics {
                    m.counter_inc("gate.dropped", &[("reason", reason.as_str())], 1);
                }
            }
        }
    }

    fn enqueue(&self, intent: &Intent, session: &SessionState, policy: AdmissionPolicy) {
        debug!(
            kind = intent.kind_name(),
            event = intent.event_name().unwrap_or_default(),
            internal = intent.is_internal(),
            policy = policy.as_str(),
            "admitting intent"
        );
        self.queue.enqueue(self.decorator.decorate(intent, session), policy);
    }

    /// Deliver whatever is pending now.
    pub fn flush(&self) {
        self.queue.flush_all();
    }

    /// Flush pending activity for the current user, then end the session and
    /// forget the stored identity.
    pub fn reset(&self) {
        let _admission = self.admission.lock();
        self.queue.flush_all();
        self.gate.reset();
    }

    pub fn session(&self) -> Option<SessionState> {
        self.gate.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Qualification> {
        self.queue.subscribe()
    }

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    /// Flush and wait for every handed-off payload to be delivered.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}
