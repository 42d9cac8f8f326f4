// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-process database server with session-scoped advisory locks.
//!
//! Behaves like a SQL server's `GET_LOCK` / `RELEASE_LOCK` / `IS_FREE_LOCK` /
//! `IS_USED_LOCK` family: a lock belongs to the session that got it, waiting
//! sessions are woken when a lock is released, and closing (or dropping) a
//! session releases everything it held and discards its counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

use crate::{
    codec::InternalIdentifier,
    error::{MutexError, Result},
    session::AdvisorySession,
    types::{AcquireStatus, CounterOp, ReleaseStatus, SessionId, Wait},
};

#[derive(Debug, Default)]
struct Server {
    /// Lock identifier to holding session
    holders: Mutex<HashMap<InternalIdentifier, SessionId>>,
    /// Signalled whenever a lock is released
    released: Notify,
    next_session: AtomicU64,
}

/// Shared lock server; clones refer to the same server
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    server: Arc<Server>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session (the equivalent of a new connection)
    pub fn open_session(&self) -> Arc<MemorySession> {
        let id = SessionId(self.server.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("Opened memory session {}", id);
        Arc::new(MemorySession {
            id,
            server: self.server.clone(),
            counters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Session currently holding the lock, if any
    pub fn holder(&self, identifier: &InternalIdentifier) -> Option<SessionId> {
        self.server.holders.lock().get(identifier).copied()
    }

    /// Number of locks held across all sessions
    pub fn held_locks(&self) -> usize {
        self.server.holders.lock().len()
    }
}

/// A session on a [`MemoryDatabase`]
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    server: Arc<Server>,
    counters: Mutex<HashMap<InternalIdentifier, u64>>,
    closed: AtomicBool,
}

impl MemorySession {
    /// End the session, releasing its locks and dropping its counters
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let released = {
            let mut holders = self.server.holders.lock();
            let before = holders.len();
            holders.retain(|_, owner| *owner != self.id);
            before - holders.len()
        };
        self.counters.lock().clear();

        // Waiters of this session must also wake to see it closed
        self.server.released.notify_waiters();
        debug!("Closed memory session {}, released {} lock(s)", self.id, released);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MutexError::system(format!("{} is closed", self.id)));
        }
        Ok(())
    }

    /// Take the lock if it is free or already ours
    fn grab(&self, identifier: &InternalIdentifier) -> bool {
        let mut holders = self.server.holders.lock();
        match holders.get(identifier) {
            Some(owner) if *owner != self.id => false,
            _ => {
                holders.insert(identifier.clone(), self.id);
                true
            }
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl AdvisorySession for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn try_acquire(&self, identifier: &InternalIdentifier, wait: Wait) -> Result<AcquireStatus> {
        self.ensure_open()?;
        let deadline = match wait {
            Wait::For(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };

        loop {
            // Register interest before checking, so a release in between is not missed
            let notified = self.server.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.ensure_open()?;

            if self.grab(identifier) {
                trace!("{} got {}", self.id, identifier);
                return Ok(AcquireStatus::Acquired);
            }

            if wait == Wait::Immediate {
                return Ok(AcquireStatus::TimedOut);
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        trace!("{} timed out waiting for {}", self.id, identifier);
                        return Ok(AcquireStatus::TimedOut);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn release(&self, identifier: &InternalIdentifier) -> Result<ReleaseStatus> {
        self.ensure_open()?;
        let released = {
            let mut holders = self.server.holders.lock();
            match holders.get(identifier) {
                Some(owner) if *owner == self.id => {
                    holders.remove(identifier);
                    true
                }
                _ => false,
            }
        };

        if released {
            self.server.released.notify_waiters();
            trace!("{} released {}", self.id, identifier);
            Ok(ReleaseStatus::Released)
        } else {
            Ok(ReleaseStatus::NotHeld)
        }
    }

    async fn is_free(&self, identifier: &InternalIdentifier) -> Result<bool> {
        self.ensure_open()?;
        Ok(!self.server.holders.lock().contains_key(identifier))
    }

    async fn is_owned_by_current_session(&self, identifier: &InternalIdentifier) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.server.holders.lock().get(identifier) == Some(&self.id))
    }

    async fn counter(&self, identifier: &InternalIdentifier) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.counters.lock().get(identifier).copied().unwrap_or(0))
    }

    async fn adjust_counter(&self, identifier: &InternalIdentifier, op: CounterOp) -> Result<u64> {
        self.ensure_open()?;
        let mut counters = self.counters.lock();
        let value = match op {
            CounterOp::Increment => {
                let value = counters.entry(identifier.clone()).or_insert(0);
                *value += 1;
                *value
            }
            CounterOp::Decrement => {
                let value = counters.get(identifier).copied().unwrap_or(0).saturating_sub(1);
                if value == 0 {
                    counters.remove(identifier);
                } else {
                    counters.insert(identifier.clone(), value);
                }
                value
            }
            CounterOp::Reset => {
                counters.remove(identifier);
                0
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, LockName};
    use std::time::Duration;

    fn identifier(name: &str) -> InternalIdentifier {
        codec::derive("dbmutex", &LockName::new(name).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let db = MemoryDatabase::new();
        let session = db.open_session();
        let id = identifier("memory-acquire");

        assert!(session.is_free(&id).await.unwrap());
        assert_eq!(session.try_acquire(&id, Wait::Immediate).await.unwrap(), AcquireStatus::Acquired);
        assert!(!session.is_free(&id).await.unwrap());
        assert!(session.is_owned_by_current_session(&id).await.unwrap());
        assert_eq!(db.holder(&id), Some(session.session_id()));

        assert_eq!(session.release(&id).await.unwrap(), ReleaseStatus::Released);
        assert_eq!(session.release(&id).await.unwrap(), ReleaseStatus::NotHeld);
        assert_eq!(db.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_other_session_cannot_acquire() {
        let db = MemoryDatabase::new();
        let first = db.open_session();
        let second = db.open_session();
        let id = identifier("memory-contended");

        assert_eq!(first.try_acquire(&id, Wait::Forever).await.unwrap(), AcquireStatus::Acquired);
        assert_eq!(second.try_acquire(&id, Wait::Immediate).await.unwrap(), AcquireStatus::TimedOut);
        assert!(!second.is_owned_by_current_session(&id).await.unwrap());
        assert_eq!(second.release(&id).await.unwrap(), ReleaseStatus::NotHeld);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_wait_expires() {
        let db = MemoryDatabase::new();
        let first = db.open_session();
        let second = db.open_session();
        let id = identifier("memory-timeout");

        first.try_acquire(&id, Wait::Immediate).await.unwrap();
        let started = Instant::now();
        let status = second.try_acquire(&id, Wait::For(Duration::from_secs(3))).await.unwrap();
        assert_eq!(status, AcquireStatus::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_waiter_woken_by_release() {
        let db = MemoryDatabase::new();
        let first = db.open_session();
        let second = db.open_session();
        let id = identifier("memory-wake");

        first.try_acquire(&id, Wait::Immediate).await.unwrap();

        let waiter = {
            let second = second.clone();
            let id = id.clone();
            tokio::spawn(async move { second.try_acquire(&id, Wait::For(Duration::from_secs(10))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.release(&id).await.unwrap();

        let status = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(status, AcquireStatus::Acquired);
        assert_eq!(db.holder(&id), Some(second.session_id()));
    }

    #[tokio::test]
    async fn test_close_releases_locks_and_counters() {
        let db = MemoryDatabase::new();
        let session = db.open_session();
        let id = identifier("memory-close");

        session.try_acquire(&id, Wait::Immediate).await.unwrap();
        session.adjust_counter(&id, CounterOp::Increment).await.unwrap();
        session.close();

        assert_eq!(db.held_locks(), 0);
        assert!(session.is_closed());
        assert!(matches!(session.counter(&id).await, Err(MutexError::System { .. })));

        let other = db.open_session();
        assert!(other.is_free(&id).await.unwrap());
        assert_eq!(other.counter(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_ends_session() {
        let db = MemoryDatabase::new();
        let id = identifier("memory-drop");
        {
            let session = db.open_session();
            session.try_acquire(&id, Wait::Immediate).await.unwrap();
            assert_eq!(db.held_locks(), 1);
        }
        assert_eq!(db.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_counters_are_session_local() {
        let db = MemoryDatabase::new();
        let first = db.open_session();
        let second = db.open_session();
        let id = identifier("memory-counter");

        assert_eq!(first.adjust_counter(&id, CounterOp::Increment).await.unwrap(), 1);
        assert_eq!(first.adjust_counter(&id, CounterOp::Increment).await.unwrap(), 2);
        assert_eq!(second.counter(&id).await.unwrap(), 0);

        assert_eq!(first.adjust_counter(&id, CounterOp::Decrement).await.unwrap(), 1);
        assert_eq!(first.adjust_counter(&id, CounterOp::Reset).await.unwrap(), 0);
        assert_eq!(first.adjust_counter(&id, CounterOp::Decrement).await.unwrap(), 0);
        assert_eq!(first.counter(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_own_waiter() {
        let db = MemoryDatabase::new();
        let holder = db.open_session();
        let waiter = db.open_session();
        let id = identifier("memory-close-waiter");
        holder.try_acquire(&id, Wait::Immediate).await.unwrap();

        let task = {
            let waiter = waiter.clone();
            let id = id.clone();
            tokio::spawn(async move { waiter.try_acquire(&id, Wait::Forever).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        waiter.close();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(MutexError::System { .. })));
        assert_eq!(db.holder(&id), Some(holder.session_id()));
    }
}
