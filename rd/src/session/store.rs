//! Session persistence
//!
//! The record is a single JSON file rewritten whole on every save: the new
//! contents go to a sibling temp file which is then renamed over the record,
//! so a reader never sees a partial write.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use super::Session;

/// File-backed store for the continuity session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "SessionStore::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session
    ///
    /// Never fails: a missing, unreadable, malformed or expired record yields
    /// a fresh session.
    pub fn load(&self) -> Session {
        self.load_at(Utc::now())
    }

    /// Load the persisted session as of `now`
    pub fn load_at(&self, now: DateTime<Utc>) -> Session {
        debug!(?self.path, "SessionStore::load: called");
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("SessionStore::load: no session record");
                return Session::fresh_at(now);
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read session record, starting fresh");
                return Session::fresh_at(now);
            }
        };

        let session: Session = match serde_json::from_str(&contents) {
            Ok(session) => session,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Malformed session record, starting fresh");
                return Session::fresh_at(now);
            }
        };

        if session.is_expired_at(now) {
            info!(
                age_minutes = session.age_at(now).num_minutes(),
                "Session expired, starting a new conversation"
            );
            return Session::fresh_at(now);
        }

        debug!(token = ?session.continuity_token, "SessionStore::load: resumed session");
        session
    }

    /// Persist the session, replacing any previous record
    pub fn save(&self, session: &Session) -> Result<()> {
        debug!(token = ?session.continuity_token, "SessionStore::save: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create session directory")?;
        }

        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write session record")?;
        fs::rename(&tmp, &self.path).context("Failed to replace session record")?;
        Ok(())
    }

    /// Remove the persisted record
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = ?self.path, "Session record removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session record"),
        }
    }
}
