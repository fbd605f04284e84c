//! Continuity session with the external reasoning process
//!
//! A [`Session`] holds the continuity token the external process hands back so
//! a later invocation can resume the same conversation. It is persisted by the
//! [`SessionStore`] and expires after [`SESSION_MAX_AGE_HOURS`] of inactivity.

mod store;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use store::SessionStore;

/// Sessions idle for longer than this are never resumed
pub const SESSION_MAX_AGE_HOURS: i64 = 12;

/// Continuity state for the external process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque token issued by the external process
    #[serde(rename = "session_id")]
    pub continuity_token: Option<String>,
    /// Last time the token was refreshed
    pub last_activity: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::fresh()
    }
}

impl Session {
    /// A session with no token, active now
    pub fn fresh() -> Self {
        Self::fresh_at(Utc::now())
    }

    pub fn fresh_at(now: DateTime<Utc>) -> Self {
        Self {
            continuity_token: None,
            last_activity: now,
        }
    }

    /// Record a token reported by the external process
    pub fn update(&mut self, token: impl Into<String>) {
        self.continuity_token = Some(token.into());
        self.last_activity = Utc::now();
    }

    /// Forget the token so the next invocation starts a new conversation
    pub fn clear(&mut self) {
        self.continuity_token = None;
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > Duration::hours(SESSION_MAX_AGE_HOURS)
    }

    pub fn token(&self) -> Option<&str> {
        self.continuity_token.as_deref()
    }
}
