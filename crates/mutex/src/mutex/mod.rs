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

mod guard;


pub use guard::MutexGuard;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::{
    codec::{self, InternalIdentifier, LockName},
    config::MutexConfig,
    error::{MutexError, Result},
    session::AdvisorySession,
    types::{AcquireStatus, CounterOp, LockOutcome, MutexOptions, ReleaseStatus},
};

/// Named, re-entrant mutex whose state lives in the database.
///
/// The handle itself holds no lock. Ownership belongs to the database session
/// passed to each call, and two handles for the same name (in any process)
/// observe the same state. A lock that is never unlocked stays held until the
/// session ends, regardless of what happens to the handle.
#[derive(Clone)]
pub struct DatabaseMutex {
    name: LockName,
    variant_tag: Arc<str>,
    display_prefix_len: usize,
    identifier: OnceCell<InternalIdentifier>,
}

impl DatabaseMutex {
    /// Create a mutex with the default configuration
    pub fn new<N>(name: N) -> Result<Self>
    where
        N: TryInto<LockName, Error = MutexError>,
    {
        Self::with_config(name, &MutexConfig::default())
    }

    /// Create a mutex using the variant tag and display settings of `config`
    pub fn with_config<N>(name: N, config: &MutexConfig) -> Result<Self>
    where
        N: TryInto<LockName, Error = MutexError>,
    {
        Ok(Self::from_name(name.try_into()?, config))
    }

    pub(crate) fn from_name(name: LockName, config: &MutexConfig) -> Self {
        Self {
            name,
            variant_tag: Arc::from(config.variant_tag.as_str()),
            display_prefix_len: config.display_prefix_len,
            identifier: OnceCell::new(),
        }
    }

    /// Name given at construction
    pub fn name(&self) -> &LockName {
        &self.name
    }

    /// Identifier passed to the database, derived once per handle
    pub fn identifier(&self) -> Result<&InternalIdentifier> {
        self.identifier
            .get_or_try_init(|| codec::derive(&self.variant_tag, &self.name))
    }

    /// Print-safe name for logs and messages
    pub fn display_name(&self) -> String {
        match self.identifier() {
            Ok(identifier) => codec::display_name(&self.name, identifier, self.display_prefix_len),
            Err(_) => self.name.to_string_lossy(),
        }
    }

    /// Acquire the lock, reporting contention as an outcome rather than an error.
    ///
    /// If this session already owns the lock only the reentrancy counter is
    /// bumped; the database is not asked to wait again.
    pub async fn try_lock(&self, session: &dyn AdvisorySession, options: MutexOptions) -> Result<LockOutcome> {
        let identifier = self.identifier()?;

        if session.is_owned_by_current_session(identifier).await? {
            let depth = session.adjust_counter(identifier, CounterOp::Increment).await?;
            debug!("Mutex '{}' re-entered by {}, depth {}", self.display_name(), session.session_id(), depth);
            return Ok(LockOutcome::Acquired { depth });
        }

        let wait = options.wait();
        match session.try_acquire(identifier, wait).await? {
            AcquireStatus::Acquired => match Self::start_counter(session, identifier).await {
                Ok(depth) => {
                    debug!("Mutex '{}' acquired by {}", self.display_name(), session.session_id());
                    Ok(LockOutcome::Acquired { depth })
                }
                Err(err) => {
                    warn!("Mutex '{}' acquired but its counter failed, releasing: {}", self.display_name(), err);
                    match session.release(identifier).await {
                        Ok(ReleaseStatus::Released) => {}
                        Ok(status) => warn!("Release after counter failure on '{}' returned {:?}", self.display_name(), status),
                        Err(release_err) => warn!("Release after counter failure on '{}' failed: {}", self.display_name(), release_err),
                    }
                    Err(err)
                }
            },
            AcquireStatus::TimedOut if !options.block => {
                debug!("Mutex '{}' is held elsewhere, not waiting", self.display_name());
                Ok(LockOutcome::Contended)
            }
            AcquireStatus::TimedOut => {
                debug!("Mutex '{}' still held elsewhere after waiting {}", self.display_name(), wait);
                Ok(LockOutcome::TimedOut)
            }
            AcquireStatus::Unknown => {
                warn!("Lock primitive gave no answer for mutex '{}'", self.display_name());
                Err(MutexError::system(format!(
                    "lock primitive returned no result for mutex '{}'",
                    self.display_name()
                )))
            }
        }
    }

    /// Fresh acquisition: drop any stale counter, then count this one
    async fn start_counter(session: &dyn AdvisorySession, identifier: &InternalIdentifier) -> Result<u64> {
        session.adjust_counter(identifier, CounterOp::Reset).await?;
        session.adjust_counter(identifier, CounterOp::Increment).await
    }

    /// Acquire the lock.
    ///
    /// Returns `Ok(true)` once held. A non-blocking attempt that finds the lock
    /// taken returns `Ok(false)`. A wait that runs out fails with
    /// [`MutexError::Locked`], or returns `Ok(false)` when `raise` is off.
    pub async fn lock(&self, session: &dyn AdvisorySession, options: MutexOptions) -> Result<bool> {
        match self.try_lock(session, options).await? {
            LockOutcome::Acquired { .. } => Ok(true),
            LockOutcome::Contended => Ok(false),
            LockOutcome::TimedOut if options.raise => Err(MutexError::locked(self.display_name(), options.wait())),
            LockOutcome::TimedOut => Ok(false),
        }
    }

    /// Give back one acquisition, or all of them with `force`.
    ///
    /// Returns `Ok(true)` when the database lock was released and `Ok(false)`
    /// when this session still holds it through outer acquisitions. Unlocking
    /// a mutex this session does not own fails with
    /// [`MutexError::UnlockFailed`], or returns `Ok(false)` when `raise` is off.
    pub async fn unlock(&self, session: &dyn AdvisorySession, options: MutexOptions) -> Result<bool> {
        match self.release_once(session, options.force).await {
            Err(MutexError::UnlockFailed { reason, .. }) if !options.raise => {
                debug!("Unlocking mutex '{}' failed quietly: {}", self.display_name(), reason);
                Ok(false)
            }
            result => result,
        }
    }

    /// Unlock and hand back `self`, or `None` if unlocking failed
    pub async fn try_unlock(&self, session: &dyn AdvisorySession, options: MutexOptions) -> Option<&Self> {
        let options = MutexOptions { raise: true, ..options };
        match self.unlock(session, options).await {
            Ok(_) => Some(self),
            Err(err) => {
                debug!("try_unlock on mutex '{}': {}", self.display_name(), err);
                None
            }
        }
    }

    async fn release_once(&self, session: &dyn AdvisorySession, force: bool) -> Result<bool> {
        let identifier = self.identifier()?;

        if !session.is_owned_by_current_session(identifier).await? {
            return Err(MutexError::unlock_failed(self.display_name(), "not owned by this session"));
        }

        let op = if force { CounterOp::Reset } else { CounterOp::Decrement };
        let remaining = session.adjust_counter(identifier, op).await?;
        if remaining > 0 {
            debug!("Mutex '{}' still held by {}, depth {}", self.display_name(), session.session_id(), remaining);
            return Ok(false);
        }

        match session.release(identifier).await {
            Ok(ReleaseStatus::Released) => {
                debug!("Mutex '{}' released by {}", self.display_name(), session.session_id());
                Ok(true)
            }
            Ok(ReleaseStatus::NotHeld) => {
                warn!("Release primitive reported mutex '{}' as not held", self.display_name());
                Err(MutexError::unlock_failed(self.display_name(), "release primitive released nothing"))
            }
            Ok(ReleaseStatus::Unknown) => {
                warn!("Release primitive gave no answer for mutex '{}'", self.display_name());
                Err(MutexError::unlock_failed(self.display_name(), "release primitive returned no result"))
            }
            Err(err) => {
                warn!("Release of mutex '{}' failed: {}", self.display_name(), err);
                Err(MutexError::unlock_failed(self.display_name(), err.to_string()))
            }
        }
    }

    /// Acquire the lock and wrap it in a guard that releases it when dropped.
    ///
    /// Returns `Ok(None)` when the lock could not be had within the wait policy.
    pub async fn guard(&self, session: Arc<dyn AdvisorySession>, options: MutexOptions) -> Result<Option<MutexGuard>> {
        let outcome = self.try_lock(session.as_ref(), options).await?;
        if outcome.is_acquired() {
            Ok(Some(MutexGuard::new(self.clone(), session, options.force)))
        } else {
            Ok(None)
        }
    }

    /// Run `work` while holding the lock.
    ///
    /// The acquisition made here is released on every exit: normal return,
    /// error, panic, or the returned future being dropped. Nested calls on the
    /// same session only free the database lock when the outermost one ends.
    /// Contention yields `Ok(None)` and `work` is not run; errors from `work`
    /// are returned after the release.
    pub async fn synchronize<F, Fut, T, E>(
        &self,
        session: Arc<dyn AdvisorySession>,
        options: MutexOptions,
        work: F,
    ) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<MutexError>,
    {
        let Some(guard) = self.guard(session, options).await? else {
            return Ok(None);
        };

        let result = AssertUnwindSafe(work()).catch_unwind().await;
        let released = guard.release().await;

        match result {
            Ok(Ok(value)) => {
                released?;
                Ok(Some(value))
            }
            Ok(Err(err)) => {
                if let Err(release_err) = released {
                    warn!("Mutex '{}' release after failed work: {}", self.display_name(), release_err);
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(release_err) = released {
                    warn!("Mutex '{}' release after panic: {}", self.display_name(), release_err);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// True when no session holds the lock
    pub async fn is_unlocked(&self, session: &dyn AdvisorySession) -> Result<bool> {
        session.is_free(self.identifier()?).await
    }

    /// True when some session holds the lock
    pub async fn is_locked(&self, session: &dyn AdvisorySession) -> Result<bool> {
        Ok(!self.is_unlocked(session).await?)
    }

    /// True when `session` holds the lock
    pub async fn is_owned(&self, session: &dyn AdvisorySession) -> Result<bool> {
        session.is_owned_by_current_session(self.identifier()?).await
    }

    pub async fn is_not_owned(&self, session: &dyn AdvisorySession) -> Result<bool> {
        Ok(!self.is_owned(session).await?)
    }

    /// Outstanding acquisitions by `session`
    pub async fn counter_value(&self, session: &dyn AdvisorySession) -> Result<u64> {
        session.counter(self.identifier()?).await
    }
}

impl fmt::Debug for DatabaseMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseMutex")
            .field("name", &self.name.to_string_lossy())
            .field("variant_tag", &self.variant_tag)
            .field("identifier", &self.identifier.get())
            .finish()
    }
}

impl fmt::Display for DatabaseMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<DatabaseMutex {}>", self.display_name())
    }
}
