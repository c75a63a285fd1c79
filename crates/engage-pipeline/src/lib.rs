//! Activity pipeline: session gating, decoration, debounced batching, and
//! ordered background delivery of merged activity payloads.

pub mod analytics;
pub mod decorator;
mod dispatcher;
pub mod gate;
pub mod merge;
pub mod queue;
pub mod scheduler;
pub mod sink;

pub use analytics::{Analytics, AnalyticsBuilder, AnalyticsConfig};
pub use decorator::{AutoPropertyDecorator, IntentDecorator, IDENTITY_ATTRIBUTE};
pub use gate::{
    DropReason, GateDecision, IdentityStore, MemoryIdentityStore, SessionGate, SessionPolicy,
    StartReason, StoredIdentityPolicy,
};
pub use merge::merge;
pub use queue::{AdmissionPolicy, BatchQueue, QueueConfig};
pub use scheduler::{Scheduler, TimerId};
pub use sink::{DeliverySink, LogSink, Qualification, QualificationResult, RecordingSink};
