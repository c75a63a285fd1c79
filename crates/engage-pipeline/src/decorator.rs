//! Turns an admitted intent into a wire payload, stamping the automatic
//! identity properties derived from the session and device.

use engage_core::settings::DeviceSettings;
use engage_core::{
    ActivityPayload, EventPayload, Intent, IntentKind, Properties, PropertyValue, SessionState,
};

/// Attribute under which events carry the automatic identity properties.
pub const IDENTITY_ATTRIBUTE: &str = "_identity";

/// Pure intent-to-payload transform. Must be deterministic in its inputs.
pub trait IntentDecorator: Send + Sync {
    fn decorate(&self, intent: &Intent, session: &SessionState) -> ActivityPayload;
}

/// Default decorator: profile updates and events carry the `_`-prefixed
/// automatic properties; caller-supplied keys never override them.
#[derive(Clone, Debug)]
pub struct AutoPropertyDecorator {
    application_id: String,
    device: DeviceSettings,
}

impl AutoPropertyDecorator {
    pub fn new(application_id: impl Into<String>, device: DeviceSettings) -> Self {
        Self {
            application_id: application_id.into(),
            device,
        }
    }

    /// The automatic properties for `intent` within `session`.
    pub fn auto_properties(&self, intent: &Intent, session: &SessionState) -> Properties {
        let mut auto = Properties::new();
        let mut put = |key: &str, value: PropertyValue| {
            auto.insert(key.to_string(), value);
        };
        put("_sessionId", session.session_id.as_str().into());
        put("_userId", session.identity.user_id.as_str().into());
        put("_isAnonymous", session.identity.is_anonymous().into());
        put("_sessionPageviews", i64::from(session.page_views).into());
        put("_sessionRandomizer", i64::from(session.randomizer).into());
        put("_sessionStartedAt", session.started_at.into());
        put("_lastSeenAt", session.last_activity_at.into());
        put("_updatedAt", intent.created_at.into());
        put("_appId", self.application_id.as_str().into());
        put("_appVersion", self.device.app_version.as_str().into());
        put("_sdkVersion", self.device.sdk_version.as_str().into());
        put("_operatingSystem", self.device.operating_system.as_str().into());
        put("_deviceType", self.device.device_type.as_str().into());
        put("_localeId", self.device.locale.as_str().into());
        auto
    }

    fn profile_with_auto(
        &self,
        properties: &Properties,
        intent: &Intent,
        session: &SessionState,
    ) -> Properties {
        let mut profile = properties.clone();
        profile.extend(self.auto_properties(intent, session));
        profile
    }
}

impl IntentDecorator for AutoPropertyDecorator {
    fn decorate(&self, intent: &Intent, session: &SessionState) -> ActivityPayload {
        let identity = &session.identity;
        let base = ActivityPayload::new(identity.account_id.as_str(), identity.user_id.as_str())
            .with_group(identity.group_id.clone());

        match &intent.kind {
            IntentKind::Anonymous => {
                base.with_profile_update(self.profile_with_auto(&Properties::new(), intent, session))
            }
            IntentKind::Identify { properties, .. } | IntentKind::UpdateProfile { properties, .. } => {
                base.with_profile_update(self.profile_with_auto(properties, intent, session))
            }
            IntentKind::UpdateGroup {
                group_id,
                properties,
                ..
            } => base
                .with_group(group_id.clone())
                .with_group_update(properties.clone()),
            IntentKind::Event {
                name,
                attributes,
                context,
                ..
            } => {
                let mut event = EventPayload::new(name.as_str());
                event.attributes = attributes.clone();
                event.attributes.insert(
                    IDENTITY_ATTRIBUTE.to_string(),
                    PropertyValue::Map(self.auto_properties(intent, session)),
                );
                event.context = context.clone();
                base.with_event(event)
            }
        }
    }
}
