//! Session gate: decides, per intent, whether it joins the active session,
//! opens a new one, or is dropped for lack of an identity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use engage_core::ids::anonymous_user_id;
use engage_core::{Identity, Intent, IntentKind, SessionState};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

/// Persistence seam for the last known identity.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Option<Identity>;
    fn save(&self, identity: &Identity);
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: RwLock<Option<Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    fn save(&self, identity: &Identity) {
        *self.identity.write() = Some(identity.clone());
    }

    fn clear(&self) {
        *self.identity.write() = None;
    }
}

/// Derives the identity a new session should be attributed to.
pub trait SessionPolicy: Send + Sync {
    /// `None` means no session can be started for this intent.
    fn derive(&self, intent: &Intent, stored: Option<&Identity>) -> Option<Identity>;
}

/// Identify names the user outright; anonymous intents mint (or reuse) an
/// anonymous id when allowed; anything else falls back to the stored identity.
#[derive(Clone, Debug)]
pub struct StoredIdentityPolicy {
    account_id: String,
    allow_anonymous: bool,
}

impl StoredIdentityPolicy {
    pub fn new(account_id: impl Into<String>, allow_anonymous: bool) -> Self {
        Self {
            account_id: account_id.into(),
            allow_anonymous,
        }
    }
}

impl SessionPolicy for StoredIdentityPolicy {
    fn derive(&self, intent: &Intent, stored: Option<&Identity>) -> Option<Identity> {
        match &intent.kind {
            IntentKind::Identify { user_id, .. } => {
                let mut identity = Identity::new(self.account_id.as_str(), user_id.as_str());
                identity.group_id = stored
                    .filter(|s| s.user_id == *user_id)
                    .and_then(|s| s.group_id.clone());
                Some(identity)
            }
            IntentKind::Anonymous if self.allow_anonymous => match stored {
                Some(s) if s.is_anonymous() => Some(s.clone()),
                _ => Some(Identity::new(self.account_id.as_str(), anonymous_user_id())),
            },
            IntentKind::Anonymous => None,
            _ => stored.cloned(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartReason {
    /// No session was active.
    Fresh,
    /// The intent attributes activity to a different user.
    UserChanged,
    /// The active session sat idle past the timeout.
    Expired,
}

impl StartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::UserChanged => "user_changed",
            Self::Expired => "expired",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    NoIdentity,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoIdentity => "no_identity",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    /// Proceed within the active session, as updated by this intent.
    Proceed(SessionState),
    /// A new session began with this intent. The caller emits the session
    /// start event before the intent itself.
    StartSession {
        session: SessionState,
        reason: StartReason,
    },
    Drop(DropReason),
}

pub struct SessionGate {
    current: Mutex<Option<SessionState>>,
    store: Arc<dyn IdentityStore>,
    policy: Box<dyn SessionPolicy>,
    timeout: Duration,
}

impl SessionGate {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        policy: Box<dyn SessionPolicy>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            current: Mutex::new(None),
            store,
            policy,
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    /// Admit `intent`, starting a session if none applies.
    pub fn admit(&self, intent: &Intent) -> GateDecision {
        let now = intent.created_at;
        let mut current = self.current.lock();

        let reason = match current.as_mut() {
            Some(active) => match self.restart_reason(intent, active, now) {
                None => {
                    self.record(active, intent, now);
                    return GateDecision::Proceed(active.clone());
                }
                Some(reason) => reason,
            },
            None => StartReason::Fresh,
        };

        let stored = self.store.load();
        let Some(identity) = self.policy.derive(intent, stored.as_ref()) else {
            debug!(kind = intent.kind_name(), "no identity for intent, dropping");
            return GateDecision::Drop(DropReason::NoIdentity);
        };
        self.store.save(&identity);

        let mut session = SessionState::start(identity, now);
        self.record(&mut session, intent, now);
        info!(
            session_id = %session.session_id,
            user_id = %session.identity.user_id,
            reason = reason.as_str(),
            "session started"
        );
        *current = Some(session.clone());
        GateDecision::StartSession { session, reason }
    }

    fn restart_reason(
        &self,
        intent: &Intent,
        active: &SessionState,
        now: DateTime<Utc>,
    ) -> Option<StartReason> {
        let changes_user = match &intent.kind {
            IntentKind::Identify { user_id, .. } => *user_id != active.identity.user_id,
            IntentKind::Anonymous => !active.identity.is_anonymous(),
            _ => false,
        };
        if changes_user {
            Some(StartReason::UserChanged)
        } else if active.is_expired(now, self.timeout) {
            Some(StartReason::Expired)
        } else {
            None
        }
    }

    /// Fold the intent's effect into the session.
    fn record(&self, session: &mut SessionState, intent: &Intent, now: DateTime<Utc>) {
        session.touch(now);
        if intent.is_screen_view() {
            session.page_views = session.page_views.saturating_add(1);
        }
        if let IntentKind::UpdateGroup { group_id, .. } = &intent.kind {
            session.identity.group_id = group_id.clone();
            self.store.save(&session.identity);
        }
    }

    pub fn current(&self) -> Option<SessionState> {
        self.current.lock().clone()
    }

    /// End the active session without forgetting the stored identity.
    pub fn end_session(&self) -> Option<SessionState> {
        self.current.lock().take()
    }

    /// End the session and forget the stored identity.
    pub fn reset(&self) {
        let ended = self.current.lock().take();
        self.store.clear();
        if let Some(session) = ended {
            info!(session_id = %session.session_id, "session reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engage_core::Properties;

    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1800);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn gate_with(store: Arc<MemoryIdentityStore>, allow_anonymous: bool) -> SessionGate {
        SessionGate::new(
            store,
            Box::new(StoredIdentityPolicy::new("acct", allow_anonymous)),
            TIMEOUT,
        )
    }

    fn gate() -> SessionGate {
        gate_with(Arc::new(MemoryIdentityStore::new()), true)
    }

    fn event_at(name: &str, secs: i64) -> Intent {
        Intent::at(Intent::event(name, Properties::new()).kind, t(secs))
    }

    fn identify_at(user: &str, secs: i64) -> Intent {
        Intent::at(Intent::identify(user, Properties::new()).kind, t(secs))
    }

    #[test]
    fn event_without_identity_is_dropped() {
        let gate = gate();
        assert_eq!(
            gate.admit(&event_at("e", 0)),
            GateDecision::Drop(DropReason::NoIdentity)
        );
        assert!(gate.current().is_none());
    }

    #[test]
    fn event_with_stored_identity_starts_a_session() {
        let store = Arc::new(MemoryIdentityStore::with_identity(Identity::new("acct", "u-1")));
        let gate = gate_with(store, true);
        let GateDecision::StartSession { session, reason } = gate.admit(&event_at("e", 0)) else {
            panic!("expected a new session");
        };
        assert_eq!(reason, StartReason::Fresh);
        assert_eq!(session.identity.user_id, "u-1");
        assert!(matches!(gate.admit(&event_at("e", 5)), GateDecision::Proceed(_)));
    }

    #[test]
    fn identify_starts_then_proceeds_for_same_user() {
        let gate = gate();
        assert!(matches!(
            gate.admit(&identify_at("u-1", 0)),
            GateDecision::StartSession { reason: StartReason::Fresh, .. }
        ));
        let GateDecision::Proceed(session) = gate.admit(&identify_at("u-1", 10)) else {
            panic!("same user must not restart the session");
        };
        assert_eq!(session.last_activity_at, t(10));
    }

    #[test]
    fn identify_for_another_user_restarts() {
        let gate = gate();
        let GateDecision::StartSession { session: first, .. } = gate.admit(&identify_at("u-1", 0))
        else {
            panic!("expected a new session");
        };
        let GateDecision::StartSession { session, reason } = gate.admit(&identify_at("u-2", 1))
        else {
            panic!("expected a restart");
        };
        assert_eq!(reason, StartReason::UserChanged);
        assert_eq!(session.identity.user_id, "u-2");
        assert_ne!(session.session_id, first.session_id);
    }

    #[test]
    fn idle_past_timeout_expires() {
        let gate = gate();
        let _ = gate.admit(&identify_at("u-1", 0));
        assert!(matches!(gate.admit(&event_at("e", 1800)), GateDecision::Proceed(_)));
        let decision = gate.admit(&event_at("e", 1800 + 1801));
        assert!(matches!(
            decision,
            GateDecision::StartSession { reason: StartReason::Expired, .. }
        ));
    }

    #[test]
    fn screen_views_count_page_views() {
        let gate = gate();
        let _ = gate.admit(&identify_at("u-1", 0));
        for i in 1..=3 {
            let screen = Intent::at(Intent::screen("Home", Properties::new()).kind, t(i));
            let _ = gate.admit(&screen);
        }
        assert_eq!(gate.current().unwrap().page_views, 3);
    }

    #[test]
    fn group_updates_identity_and_store() {
        let store = Arc::new(MemoryIdentityStore::new());
        let gate = gate_with(store.clone(), true);
        let _ = gate.admit(&identify_at("u-1", 0));
        let group = Intent::at(Intent::group(Some("g-1".into()), Properties::new()).kind, t(1));
        let GateDecision::Proceed(session) = gate.admit(&group) else {
            panic!("group must proceed");
        };
        assert_eq!(session.identity.group_id.as_deref(), Some("g-1"));
        assert_eq!(store.load().unwrap().group_id.as_deref(), Some("g-1"));

        // Re-identifying the same user in a later session keeps the stored group.
        let _ = gate.end_session();
        let GateDecision::StartSession { session, .. } = gate.admit(&identify_at("u-1", 2)) else {
            panic!("expected a new session");
        };
        assert_eq!(session.identity.group_id.as_deref(), Some("g-1"));
    }

    #[test]
    fn anonymous_mints_and_reuses_an_anonymous_id() {
        let gate = gate();
        let GateDecision::StartSession { session, .. } =
            gate.admit(&Intent::at(IntentKind::Anonymous, t(0)))
        else {
            panic!("expected a new session");
        };
        assert!(session.identity.is_anonymous());

        let _ = gate.end_session();
        let GateDecision::StartSession { session: again, .. } =
            gate.admit(&Intent::at(IntentKind::Anonymous, t(1)))
        else {
            panic!("expected a new session");
        };
        assert_eq!(again.identity.user_id, session.identity.user_id);
    }

    #[test]
    fn anonymous_disallowed_is_dropped() {
        let gate = gate_with(Arc::new(MemoryIdentityStore::new()), false);
        assert_eq!(
            gate.admit(&Intent::at(IntentKind::Anonymous, t(0))),
            GateDecision::Drop(DropReason::NoIdentity)
        );
    }

    #[test]
    fn reset_forgets_identity() {
        let gate = gate();
        let _ = gate.admit(&identify_at("u-1", 0));
        gate.reset();
        assert!(gate.current().is_none());
        assert_eq!(
            gate.admit(&event_at("e", 1)),
            GateDecision::Drop(DropReason::NoIdentity)
        );
    }
}
