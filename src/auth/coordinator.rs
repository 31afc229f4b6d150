// Refresh coordination: one refresh in flight, everyone else waits for its result

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::{RefreshFailure, SessionError};

/// Result of a refresh, shared with every waiting request
pub type RefreshOutcome = Result<String, RefreshFailure>;

enum RefreshState {
    Idle,
    /// Continuations queued behind the in-flight refresh, in arrival order
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<RefreshOutcome>),
}

/// Refresh coordinator
/// Guarantees at most one refresh call per failure episode and fans its result
/// out to every request that failed authentication while it was running.
pub struct RefreshCoordinator {
    /// Never locked across an await point
    state: Mutex<RefreshState>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of requests queued behind the in-flight refresh
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Get a refreshed access token.
    ///
    /// If no refresh is running, this caller becomes the leader and runs `refresh`
    /// (which is expected to persist or tear down credentials before returning).
    /// Otherwise `refresh` is dropped unused and the caller waits for the leader's
    /// outcome.
    pub async fn refreshed_token<F, Fut>(&self, refresh: F) -> Result<String, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        match self.join_or_lead() {
            Role::Follower(receiver) => {
                tracing::debug!("Refresh already in flight, queueing request");
                match receiver.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(failure)) => Err(SessionError::RefreshFailed(failure)),
                    Err(_) => Err(SessionError::RefreshAborted),
                }
            }
            Role::Leader => {
                let guard = LeaderGuard {
                    coordinator: self,
                    settled: false,
                };
                let outcome = refresh().await;
                guard.settle(&outcome);
                outcome.map_err(SessionError::RefreshFailed)
            }
        }
    }

    /// Check-and-set under one lock acquisition
    fn join_or_lead(&self) -> Role {
        let mut state = self.lock();

        if let RefreshState::Refreshing { waiters } = &mut *state {
            let (sender, receiver) = oneshot::channel();
            waiters.push(sender);
            return Role::Follower(receiver);
        }

        *state = RefreshState::Refreshing {
            waiters: Vec::new(),
        };
        Role::Leader
    }

    /// Back to idle, handing over whatever was queued
    fn take_waiters(&self) -> Vec<oneshot::Sender<RefreshOutcome>> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Idle => Vec::new(),
            RefreshState::Refreshing { waiters } => waiters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        // No code path panics while holding the lock, so poisoned state is still consistent
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns the coordinator to idle even if the leader is dropped mid-refresh
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        let waiters = self.coordinator.take_waiters();

        tracing::debug!(
            queued = waiters.len(),
            success = outcome.is_ok(),
            "Refresh settled, releasing queued requests"
        );

        for waiter in waiters {
            // Receiver gone means that caller was cancelled; nothing to deliver
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.take_waiters();
        tracing::warn!(
            queued = waiters.len(),
            "Token refresh abandoned before completing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_single_caller_runs_refresh() {
        let coordinator = RefreshCoordinator::new();
        let token = coordinator
            .refreshed_token(|| async { RefreshOutcome::Ok("T2".to_string()) })
            .await
            .unwrap();

        assert_eq!(token, "T2");
        assert!(!coordinator.is_refreshing());
    }

    #[test]
    fn test_concurrent_failures_share_one_refresh() {
        let coordinator = RefreshCoordinator::new();
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<RefreshOutcome>();

        let mut leader = task::spawn(coordinator.refreshed_token(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.await.unwrap()
        }));
        assert_pending!(leader.poll());
        assert!(coordinator.is_refreshing());

        let mut followers: Vec<_> = (0..3)
            .map(|_| {
                task::spawn(coordinator.refreshed_token(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    RefreshOutcome::Ok("second refresh".to_string())
                }))
            })
            .collect();
        for follower in followers.iter_mut() {
            assert_pending!(follower.poll());
        }
        assert_eq!(coordinator.pending(), 3);

        release.send(Ok("T2".to_string())).unwrap();

        assert_eq!(assert_ready!(leader.poll()).unwrap(), "T2");
        for follower in followers.iter_mut() {
            assert!(follower.is_woken());
            assert_eq!(assert_ready!(follower.poll()).unwrap(), "T2");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_refresh_failure_rejects_every_waiter() {
        let coordinator = RefreshCoordinator::new();
        let (release, gate) = oneshot::channel::<RefreshOutcome>();

        let mut leader =
            task::spawn(coordinator.refreshed_token(|| async { gate.await.unwrap() }));
        assert_pending!(leader.poll());

        let mut follower = task::spawn(
            coordinator.refreshed_token(|| async { RefreshOutcome::Ok("unused".to_string()) }),
        );
        assert_pending!(follower.poll());

        release
            .send(Err(RefreshFailure::new(Some(401), "refresh token revoked")))
            .unwrap();

        match assert_ready!(leader.poll()) {
            Err(SessionError::RefreshFailed(failure)) => {
                assert_eq!(failure.status, Some(401));
                assert_eq!(failure.message, "refresh token revoked");
            }
            other => panic!("unexpected leader result: {:?}", other),
        }
        match assert_ready!(follower.poll()) {
            Err(SessionError::RefreshFailed(failure)) => {
                assert_eq!(failure.message, "refresh token revoked");
            }
            other => panic!("unexpected follower result: {:?}", other),
        }
    }

    #[test]
    fn test_dropped_leader_releases_waiters() {
        let coordinator = RefreshCoordinator::new();

        let mut leader = task::spawn(
            coordinator.refreshed_token(|| futures::future::pending::<RefreshOutcome>()),
        );
        assert_pending!(leader.poll());

        let mut follower = task::spawn(
            coordinator.refreshed_token(|| async { RefreshOutcome::Ok("unused".to_string()) }),
        );
        assert_pending!(follower.poll());

        drop(leader);

        assert!(!coordinator.is_refreshing());
        assert!(matches!(
            assert_ready!(follower.poll()),
            Err(SessionError::RefreshAborted)
        ));
    }

    #[tokio::test]
    async fn test_new_episode_after_settle_refreshes_again() {
        let coordinator = RefreshCoordinator::new();
        let calls = AtomicUsize::new(0);

        for expected in ["T2", "T3"] {
            let token = coordinator
                .refreshed_token(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    RefreshOutcome::Ok(expected.to_string())
                })
                .await
                .unwrap();
            assert_eq!(token, expected);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiters_released_in_queue_order() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let (release, gate) = oneshot::channel::<RefreshOutcome>();
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .refreshed_token(|| async { gate.await.unwrap() })
                    .await
            })
        };
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for i in 0..4 {
            let waiter = coordinator.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let token = waiter
                    .refreshed_token(|| async { RefreshOutcome::Ok("unused".to_string()) })
                    .await
                    .unwrap();
                log.lock().unwrap().push((i, token));
            }));
            while coordinator.pending() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        release.send(Ok("T2".to_string())).unwrap();
        assert_eq!(leader.await.unwrap().unwrap(), "T2");
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock().unwrap();
        let order: Vec<usize> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(log.iter().all(|(_, token)| token == "T2"));
    }
}
