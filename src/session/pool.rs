//! Bounded, FIFO-fair session pool.
//!
//! The pool caps concurrently open agent sessions at a fixed capacity.
//! Waiters suspend cooperatively on a semaphore whose queue is
//! first-in-first-out, so a release wakes exactly the longest-waiting
//! caller. If session creation itself fails the capacity slot is returned
//! immediately, so the pool cannot deadlock on a creation failure.

use super::{PoolStats, PooledSession, SessionOptions, SessionProvider};
use crate::errors::IssueError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

struct ActiveSession {
    session: PooledSession,
    permit: OwnedSemaphorePermit,
}

/// Bounds concurrently open agent sessions against a fixed capacity.
pub struct SessionPool {
    provider: Arc<dyn SessionProvider>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Mutex<HashMap<Uuid, ActiveSession>>,
}

impl SessionPool {
    pub fn new(provider: Arc<dyn SessionProvider>, capacity: usize) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a session, suspending until capacity is available.
    pub async fn acquire(&self, options: &SessionOptions) -> Result<PooledSession, IssueError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IssueError::Session("session pool is shut down".to_string()))?;

        match self.provider.open(options).await {
            Ok(session) => {
                debug!(
                    session_id = %session.session_id,
                    purpose = %options.purpose,
                    "session opened"
                );
                self.active.lock().unwrap().insert(
                    session.session_id,
                    ActiveSession {
                        session: session.clone(),
                        permit,
                    },
                );
                Ok(session)
            }
            Err(e) => {
                // Dropping the permit here hands the slot to the next
                // queued waiter even though no session was created.
                drop(permit);
                Err(e)
            }
        }
    }

    /// Close a session and wake the longest-waiting queued caller.
    /// Releasing an unknown id is a no-op, logged, never an error.
    pub async fn release(&self, session_id: Uuid) {
        let entry = self.active.lock().unwrap().remove(&session_id);
        match entry {
            Some(active) => {
                self.provider.close(&active.session).await;
                debug!(session_id = %session_id, "session released");
                drop(active.permit);
            }
            None => {
                warn!(session_id = %session_id, "release of unknown session ignored");
            }
        }
    }

    /// Acquire, run `f`, and always release, even when `f` fails; the
    /// failure is propagated after cleanup.
    pub async fn execute_in_session<F, Fut, T>(
        &self,
        options: &SessionOptions,
        f: F,
    ) -> Result<T, IssueError>
    where
        F: FnOnce(PooledSession) -> Fut,
        Fut: Future<Output = Result<T, IssueError>>,
    {
        let session = self.acquire(options).await?;
        let session_id = session.session_id;
        let result = f(session).await;
        self.release(session_id).await;
        result
    }

    /// Release every active session concurrently. Used only at shutdown.
    pub async fn drain_all(&self) {
        let ids: Vec<Uuid> = self.active.lock().unwrap().keys().copied().collect();
        futures::future::join_all(ids.into_iter().map(|id| self.release(id))).await;
    }

    /// Advisory counters; values may be stale by the time they are read.
    pub fn get_stats(&self) -> PoolStats {
        let active = self.active.lock().unwrap().len();
        PoolStats {
            active,
            available: self.capacity.saturating_sub(active),
            total: self.capacity,
        }
    }

    /// Run one prompt exchange through the provider in an already-held session.
    pub async fn run_in(&self, session: &PooledSession, prompt: &str) -> Result<String, IssueError> {
        self.provider.run(session, prompt).await
    }
}
