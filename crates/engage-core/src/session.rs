use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Who activity is attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: String,
    pub user_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Identity {
    pub fn new(account_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            group_id: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.starts_with("anon:")
    }
}

/// An active session. Absence of a `SessionState` means no session has started.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub identity: Identity,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Screen views seen in this session.
    pub page_views: u32,
    /// Stable per-session value in 1..=100 used for backend sampling.
    pub randomizer: u8,
}

impl SessionState {
    pub fn start(identity: Identity, now: DateTime<Utc>) -> Self {
        let session_id = SessionId::new();
        let randomizer = randomizer_for(&session_id);
        Self {
            session_id,
            identity,
            started_at: now,
            last_activity_at: now,
            page_views: 0,
            randomizer,
        }
    }

    /// Whether the session has been idle longer than `timeout` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > timeout
    }

    /// Record activity at `now`. Activity is never moved backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// Derives the sampling randomizer from the session id (FNV-1a), so the
/// value is fixed for the lifetime of the session.
fn randomizer_for(session_id: &SessionId) -> u8 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in session_id.as_str().bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash % 100) as u8 + 1
}
