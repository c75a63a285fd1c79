//! Shared types for the engage activity pipeline: intents, property values
//! and their wire sanitize pass, activity payloads, session state, errors
//! and settings.

pub mod errors;
pub mod ids;
pub mod intent;
pub mod payload;
pub mod properties;
pub mod session;
pub mod settings;

pub use errors::{DeliveryError, PipelineError, SettingsError};
pub use ids::SessionId;
pub use intent::{Intent, IntentKind};
pub use payload::{ActivityPayload, EventPayload, WireActivity, WireEvent};
pub use properties::{sanitize, Properties, PropertyValue};
pub use session::{Identity, SessionState};
pub use settings::EngageSettings;
