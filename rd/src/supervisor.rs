//! Connection supervisor
//!
//! Keeps the inbound listener running across the one startup failure known to
//! be transient: the upstream still holding the previous connection after a
//! fast restart. Every other error ends the loop.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::transport::TransportError;

/// Restarts the listener after conflicts with a fixed backoff
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    backoff: Duration,
}

impl ConnectionSupervisor {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.conflict_backoff())
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `start_listener` until it returns normally
    ///
    /// Conflicts are retried forever; the loop only ends early when the
    /// returned future is dropped (shutdown signal) or a non-conflict error
    /// occurs.
    pub async fn run<F, Fut>(&self, mut start_listener: F) -> Result<(), TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let mut conflicts: u64 = 0;
        loop {
            debug!(conflicts, "ConnectionSupervisor::run: starting listener");
            match start_listener().await {
                Ok(()) => {
                    info!(conflicts, "Listener stopped");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    warn!(
                        error = %e,
                        conflicts,
                        backoff_secs = self.backoff.as_secs(),
                        "Previous connection still held, retrying after backoff"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(error = %e, "Listener failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn conflict() -> TransportError {
        TransportError::Conflict("socket still held".to_string())
    }

    #[test]
    fn test_default_backoff() {
        let supervisor = ConnectionSupervisor::from_config(&SupervisorConfig::default());
        assert_eq!(supervisor.backoff(), Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_conflicts_then_graceful_stop() {
        let supervisor = ConnectionSupervisor::new(Duration::from_secs(35));
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = supervisor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(conflict()) } else { Ok(()) } }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(70), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(71), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_without_backoff() {
        let supervisor = ConnectionSupervisor::new(Duration::from_secs(35));
        let started = Instant::now();

        let result = supervisor.run(|| async { Ok(()) }).await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_propagate_immediately() {
        let supervisor = ConnectionSupervisor::new(Duration::from_secs(35));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = supervisor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::Protocol("bad handshake".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_then_other_error() {
        let supervisor = ConnectionSupervisor::new(Duration::from_secs(35));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = supervisor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(conflict())
                    } else {
                        Err(TransportError::Io(std::io::Error::other("disk full")))
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_cancels_retry_loop() {
        let supervisor = ConnectionSupervisor::new(Duration::from_secs(35));
        let run = supervisor.run(|| async { Err(conflict()) });

        let outcome = tokio::time::timeout(Duration::from_secs(600), run).await;
        assert!(outcome.is_err(), "conflict loop should only end when dropped");
    }
}
