use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::properties::{Properties, PropertyValue};

/// Reserved event name for screen views.
pub const SCREEN_VIEW_EVENT: &str = "engage:screen_view";
/// Reserved event name for the synthesized start of a session.
pub const SESSION_STARTED_EVENT: &str = "engage:session_started";
/// Attribute carrying the screen title on screen-view events.
pub const SCREEN_TITLE_ATTRIBUTE: &str = "screenTitle";
/// Context key carrying the screen title on screen-view events.
pub const SCREEN_TITLE_CONTEXT: &str = "screen_title";

/// A caller-originated event before enrichment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentKind {
    Anonymous,
    Identify {
        user_id: String,
        #[serde(default)]
        properties: Properties,
    },
    UpdateProfile {
        #[serde(default)]
        properties: Properties,
        #[serde(default)]
        is_internal: bool,
    },
    UpdateGroup {
        group_id: Option<String>,
        #[serde(default)]
        properties: Properties,
        #[serde(default)]
        is_internal: bool,
    },
    Event {
        name: String,
        #[serde(default)]
        attributes: Properties,
        #[serde(default)]
        context: Properties,
        #[serde(default)]
        is_internal: bool,
    },
}

/// An immutable intent stamped with its creation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(flatten)]
    pub kind: IntentKind,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(kind: IntentKind) -> Self {
        Self::at(kind, Utc::now())
    }

    pub fn at(kind: IntentKind, created_at: DateTime<Utc>) -> Self {
        Self { kind, created_at }
    }

    pub fn anonymous() -> Self {
        Self::new(IntentKind::Anonymous)
    }

    pub fn identify(user_id: impl Into<String>, properties: Properties) -> Self {
        Self::new(IntentKind::Identify {
            user_id: user_id.into(),
            properties,
        })
    }

    pub fn update_profile(properties: Properties) -> Self {
        Self::new(IntentKind::UpdateProfile {
            properties,
            is_internal: false,
        })
    }

    pub fn group(group_id: Option<String>, properties: Properties) -> Self {
        Self::new(IntentKind::UpdateGroup {
            group_id,
            properties,
            is_internal: false,
        })
    }

    pub fn event(name: impl Into<String>, attributes: Properties) -> Self {
        Self::new(IntentKind::Event {
            name: name.into(),
            attributes,
            context: Properties::new(),
            is_internal: false,
        })
    }

    /// Screen views are plain events with a reserved name and the title
    /// recorded both as an attribute and in the context.
    pub fn screen(title: impl Into<String>, mut attributes: Properties) -> Self {
        let title = title.into();
        attributes.insert(
            SCREEN_TITLE_ATTRIBUTE.to_string(),
            PropertyValue::String(title.clone()),
        );
        let mut context = Properties::new();
        context.insert(SCREEN_TITLE_CONTEXT.to_string(), PropertyValue::String(title));
        Self::new(IntentKind::Event {
            name: SCREEN_VIEW_EVENT.to_string(),
            attributes,
            context,
            is_internal: false,
        })
    }

    /// Internal event marking the start of a session, stamped `created_at`.
    pub fn session_started(created_at: DateTime<Utc>) -> Self {
        Self::at(
            IntentKind::Event {
                name: SESSION_STARTED_EVENT.to_string(),
                attributes: Properties::new(),
                context: Properties::new(),
                is_internal: true,
            },
            created_at,
        )
    }

    pub fn is_internal(&self) -> bool {
        match &self.kind {
            IntentKind::UpdateProfile { is_internal, .. }
            | IntentKind::UpdateGroup { is_internal, .. }
            | IntentKind::Event { is_internal, .. } => *is_internal,
            IntentKind::Anonymous | IntentKind::Identify { .. } => false,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        match &self.kind {
            IntentKind::Event { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_screen_view(&self) -> bool {
        self.event_name() == Some(SCREEN_VIEW_EVENT)
    }

    /// Short label for logs and metrics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            IntentKind::Anonymous => "anonymous",
            IntentKind::Identify { .. } => "identify",
            IntentKind::UpdateProfile { .. } => "update_profile",
            IntentKind::UpdateGroup { .. } => "update_group",
            IntentKind::Event { .. } => "event",
        }
    }
}
