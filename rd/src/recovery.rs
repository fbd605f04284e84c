//! Recovery controller
//!
//! The single place where execution outcomes become text for the sender.
//! A stale continuity token is recovered by one retry without resumption;
//! timeouts and failures become messages instead of errors.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::session::{Session, SessionStore};

/// Reply sent when the external process exceeded its deadline
pub const TIMEOUT_MESSAGE: &str =
    "Sorry, that took too long and I had to stop. Try again, or split the request into smaller pieces.";

/// Wraps an [`Executor`] and owns the session it runs against
///
/// The session sits behind an async mutex so invocations sharing one
/// continuity token never overlap.
pub struct RecoveryController {
    executor: Arc<dyn Executor>,
    store: SessionStore,
    session: Mutex<Session>,
}

impl RecoveryController {
    pub fn new(executor: Arc<dyn Executor>, store: SessionStore, session: Session) -> Self {
        debug!(token = ?session.continuity_token, "RecoveryController::new: called");
        Self {
            executor,
            store,
            session: Mutex::new(session),
        }
    }

    /// Snapshot of the current session
    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    /// Run a prompt and return user-displayable text; never fails
    pub async fn respond(&self, prompt: &str) -> String {
        let mut session = self.session.lock().await;

        // The relay outlives the load-time expiry check
        let resume = if session.token().is_some() && session.is_expired_at(Utc::now()) {
            info!(last_activity = %session.last_activity, "Session expired, starting fresh");
            self.reset(&mut session);
            false
        } else {
            true
        };

        let request = ExecutionRequest::new(prompt, resume);
        let mut result = self.executor.execute(&request, &mut session).await;

        if matches!(result, ExecutionResult::StaleSession { .. }) {
            info!("Stale session, retrying once without resume");
            self.reset(&mut session);

            let retry = ExecutionRequest::new(prompt, false);
            result = self.executor.execute(&retry, &mut session).await;
        }

        match result {
            ExecutionResult::Success(text) => text,
            ExecutionResult::TimedOut => TIMEOUT_MESSAGE.to_string(),
            ExecutionResult::ProcessFailed { stderr, exit_code } => {
                error!(?exit_code, %stderr, "Request failed");
                failure_message(&stderr, exit_code)
            }
            // Only reachable as the retry's result
            ExecutionResult::StaleSession { stderr } => {
                error!(%stderr, "Session could not be recovered after reset");
                failure_message(&stderr, None)
            }
        }
    }

    /// Drop the token and persist the cleared session
    fn reset(&self, session: &mut Session) {
        session.clear();
        if let Err(e) = self.store.save(session) {
            warn!(error = %e, "Failed to persist cleared session");
        }
    }
}

fn failure_message(stderr: &str, exit_code: Option<i32>) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return format!("Error: {}", stderr);
    }
    match exit_code {
        Some(code) => format!("Error: process exited with code {}", code),
        None => "Error: process failed without output".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockExecutor;
    use tempfile::TempDir;

    fn controller(
        temp: &TempDir,
        results: Vec<ExecutionResult>,
        token: Option<&str>,
    ) -> (RecoveryController, Arc<MockExecutor>) {
        let mock = Arc::new(MockExecutor::new(results));
        let mut session = Session::fresh();
        if let Some(token) = token {
            session.update(token);
        }
        let store = SessionStore::new(temp.path().join("session.json"));
        (RecoveryController::new(mock.clone(), store, session), mock)
    }

    fn stale() -> ExecutionResult {
        ExecutionResult::StaleSession {
            stderr: "Error: No conversation found with session ID: old-token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_expired_session_is_not_resumed() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockExecutor::new(vec![ExecutionResult::Success("fresh start".to_string())]));
        let session = Session {
            continuity_token: Some("old-tok".to_string()),
            last_activity: Utc::now() - chrono::Duration::hours(13),
        };
        let store = SessionStore::new(temp.path().join("session.json"));
        let ctrl = RecoveryController::new(mock.clone(), store.clone(), session);

        assert_eq!(ctrl.respond("hi").await, "fresh start");

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].0.resume);
        assert!(calls[0].1.is_none());
        assert!(ctrl.session().await.token().is_none());
        assert!(store.load().token().is_none());
    }

    #[tokio::test]
    async fn test_recent_session_is_resumed() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockExecutor::new(vec![ExecutionResult::Success("welcome back".to_string())]));
        let session = Session {
            continuity_token: Some("tok".to_string()),
            last_activity: Utc::now() - chrono::Duration::hours(11),
        };
        let ctrl = RecoveryController::new(mock.clone(), SessionStore::new(temp.path().join("session.json")), session);

        ctrl.respond("hi").await;
        let calls = mock.calls();
        assert!(calls[0].0.resume);
        assert_eq!(calls[0].1.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_success_returns_text() {
        let temp = TempDir::new().unwrap();
        let (ctrl, mock) = controller(&temp, vec![ExecutionResult::Success("hello".to_string())], Some("t"));

        assert_eq!(ctrl.respond("hi").await, "hello");
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.resume);
    }

    #[tokio::test]
    async fn test_stale_session_retries_once_without_resume() {
        let temp = TempDir::new().unwrap();
        let (ctrl, mock) = controller(
            &temp,
            vec![stale(), ExecutionResult::Success("ok".to_string())],
            Some("old-token"),
        );

        assert_eq!(ctrl.respond("hi").await, "ok");

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.resume);
        assert_eq!(calls[0].1.as_deref(), Some("old-token"));
        assert!(!calls[1].0.resume);
        assert!(calls[1].1.is_none());

        // Cleared token was persisted before the retry
        let stored = SessionStore::new(temp.path().join("session.json")).load();
        assert!(stored.continuity_token.is_none());
    }

    #[tokio::test]
    async fn test_second_stale_session_is_failure() {
        let temp = TempDir::new().unwrap();
        let (ctrl, mock) = controller(
            &temp,
            vec![
                stale(),
                ExecutionResult::StaleSession {
                    stderr: "No conversation found with session ID: again".to_string(),
                },
            ],
            Some("old-token"),
        );

        let reply = ctrl.respond("hi").await;
        assert_eq!(reply, "Error: No conversation found with session ID: again");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_returns_fallback_without_retry() {
        let temp = TempDir::new().unwrap();
        let (ctrl, mock) = controller(&temp, vec![ExecutionResult::TimedOut], None);

        assert_eq!(ctrl.respond("hi").await, TIMEOUT_MESSAGE);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_stderr() {
        let temp = TempDir::new().unwrap();
        let (ctrl, _) = controller(
            &temp,
            vec![ExecutionResult::ProcessFailed {
                stderr: "quota exhausted\n".to_string(),
                exit_code: Some(1),
            }],
            None,
        );

        assert_eq!(ctrl.respond("hi").await, "Error: quota exhausted");
    }

    #[tokio::test]
    async fn test_failure_without_stderr_surfaces_exit_code() {
        let temp = TempDir::new().unwrap();
        let (ctrl, _) = controller(
            &temp,
            vec![ExecutionResult::ProcessFailed {
                stderr: String::new(),
                exit_code: Some(137),
            }],
            None,
        );

        assert_eq!(ctrl.respond("hi").await, "Error: process exited with code 137");
    }

    #[tokio::test]
    async fn test_session_snapshot_reflects_clear() {
        let temp = TempDir::new().unwrap();
        let (ctrl, _) = controller(
            &temp,
            vec![stale(), ExecutionResult::Success("ok".to_string())],
            Some("old"),
        );
        assert_eq!(ctrl.session().await.token(), Some("old"));
        ctrl.respond("hi").await;
        assert!(ctrl.session().await.token().is_none());
    }

    #[test]
    fn test_failure_message_variants() {
        assert_eq!(failure_message("boom", Some(1)), "Error: boom");
        assert_eq!(failure_message("  ", Some(2)), "Error: process exited with code 2");
        assert_eq!(failure_message("", None), "Error: process failed without output");
    }
}
