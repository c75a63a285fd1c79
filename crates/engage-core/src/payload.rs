use serde::Serialize;
use serde_json::{Map, Value};

use crate::properties::{sanitize, Properties};

/// One event inside an activity payload.
#[derive(Clone, Debug, PartialEq)]
pub struct EventPayload {
    pub name: String,
    pub attributes: Properties,
    pub context: Properties,
}

impl EventPayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Properties::new(),
            context: Properties::new(),
        }
    }
}

/// The mergeable wire unit. One intent decorates into exactly one payload;
/// a flush merges many into one.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityPayload {
    pub account_id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub profile_update: Option<Properties>,
    pub group_update: Option<Properties>,
    pub events: Option<Vec<EventPayload>>,
}

impl ActivityPayload {
    pub fn new(account_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            group_id: None,
            profile_update: None,
            group_update: None,
            events: None,
        }
    }

    pub fn with_group(mut self, group_id: Option<String>) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn with_profile_update(mut self, properties: Properties) -> Self {
        self.profile_update = Some(properties);
        self
    }

    pub fn with_group_update(mut self, properties: Properties) -> Self {
        self.group_update = Some(properties);
        self
    }

    pub fn with_event(mut self, event: EventPayload) -> Self {
        self.events.get_or_insert_with(Vec::new).push(event);
        self
    }

    /// Names of the carried events, in order.
    pub fn event_names(&self) -> Vec<&str> {
        self.events
            .iter()
            .flatten()
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.as_ref().map_or(0, Vec::len)
    }

    /// Sanitized activity-ingest body.
    pub fn to_wire(&self) -> WireActivity {
        WireActivity {
            account_id: self.account_id.clone(),
            user_id: self.user_id.clone(),
            group_id: self.group_id.clone(),
            profile_update: self.profile_update.as_ref().map(sanitize),
            group_update: self.group_update.as_ref().map(sanitize),
            events: self.events.as_ref().map(|events| {
                events
                    .iter()
                    .map(|e| WireEvent {
                        name: e.name.clone(),
                        attributes: sanitize(&e.attributes),
                        context: sanitize(&e.context),
                    })
                    .collect()
            }),
        }
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.to_wire())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireActivity {
    pub account_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_update: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_update: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<WireEvent>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireEvent {
    pub name: String,
    pub attributes: Map<String, Value>,
    pub context: Map<String, Value>,
}
