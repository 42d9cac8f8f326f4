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

use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};

use super::DatabaseMutex;
use crate::{
    error::{MutexError, Result},
    session::AdvisorySession,
    types::MutexOptions,
};

/// One pending unlock; runs to completion once started
#[derive(Debug)]
struct UnlockJob {
    mutex: DatabaseMutex,
    session: Arc<dyn AdvisorySession>,
    options: MutexOptions,
    reply: Option<oneshot::Sender<Result<bool>>>,
}

impl UnlockJob {
    async fn run(self) {
        let result = self.mutex.unlock(self.session.as_ref(), self.options).await;
        match self.reply {
            Some(reply) => {
                if let Err(Err(err)) = reply.send(result) {
                    tracing::warn!("Release of '{}' finished after its caller left: {}", self.mutex.display_name(), err);
                }
            }
            None => match result {
                Ok(_) => tracing::debug!("MutexGuard background release of '{}'", self.mutex.display_name()),
                Err(err) => tracing::warn!("MutexGuard background release of '{}' failed: {}", self.mutex.display_name(), err),
            },
        }
    }
}

// Unlock worker on its own thread and current-thread runtime, independent of
// the caller's runtime and its cancellation.
static UNLOCK_TX: Lazy<mpsc::Sender<UnlockJob>> = Lazy::new(|| {
    let (tx, mut rx) = mpsc::channel::<UnlockJob>(1024);

    let spawned = thread::Builder::new().name("dbmutex-unlocker".to_string()).spawn(move || {
        let rt = match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                tracing::error!("Failed to build runtime for mutex unlock worker: {}", err);
                return;
            }
        };
        rt.block_on(async move {
            while let Some(job) = rx.recv().await {
                tokio::spawn(job.run());
            }
        });
    });
    if let Err(err) = spawned {
        tracing::error!("Failed to spawn mutex unlock worker thread: {}", err);
    }

    tx
});

/// Hand `job` to the unlock worker, or to a short-lived thread if the worker is unavailable
fn dispatch(job: UnlockJob) {
    let job = match UNLOCK_TX.try_send(job) {
        Ok(()) => return,
        Err(mpsc::error::TrySendError::Full(job)) | Err(mpsc::error::TrySendError::Closed(job)) => job,
    };

    tracing::warn!(
        "Mutex unlock worker unavailable, spawning fallback unlock thread for '{}'",
        job.mutex.display_name()
    );
    let spawned = thread::Builder::new()
        .name("dbmutex-unlock-fallback".to_string())
        .spawn(move || match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt.block_on(job.run()),
            Err(err) => tracing::error!("Failed to build fallback unlock runtime: {}", err),
        });
    if let Err(err) = spawned {
        tracing::error!("Failed to spawn fallback unlock thread: {}", err);
    }
}

/// A RAII guard for one acquisition of a [`DatabaseMutex`].
///
/// Dropping an armed guard hands the matching unlock to a background worker,
/// so it happens even outside a Tokio runtime. Use [`MutexGuard::release`] to
/// unlock inline and see the result.
#[derive(Debug)]
pub struct MutexGuard {
    mutex: DatabaseMutex,
    session: Arc<dyn AdvisorySession>,
    force: bool,
    /// If false, Drop will not try to release
    armed: bool,
}

impl MutexGuard {
    pub(crate) fn new(mutex: DatabaseMutex, session: Arc<dyn AdvisorySession>, force: bool) -> Self {
        Self {
            mutex,
            session,
            force,
            armed: true,
        }
    }

    pub fn mutex(&self) -> &DatabaseMutex {
        &self.mutex
    }

    pub fn session(&self) -> &Arc<dyn AdvisorySession> {
        &self.session
    }

    /// Unlock now; same return value as [`DatabaseMutex::unlock`].
    ///
    /// The unlock runs as its own task. If this future is dropped midway the
    /// task still finishes, so the acquisition is never half released.
    pub async fn release(mut self) -> Result<bool> {
        self.armed = false;
        let (reply, result) = oneshot::channel();
        let job = self.job(Some(reply));

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(job.run());
            }
            Err(_) => dispatch(job),
        }

        result
            .await
            .map_err(|err| MutexError::system_with_source(format!("release of '{}' was abandoned", self.mutex.display_name()), err))?
    }

    /// Keep the acquisition when the guard is dropped.
    /// Call this if the lock is released elsewhere.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn job(&self, reply: Option<oneshot::Sender<Result<bool>>>) -> UnlockJob {
        UnlockJob {
            mutex: self.mutex.clone(),
            session: self.session.clone(),
            options: MutexOptions {
                force: self.force,
                ..MutexOptions::default()
            },
            reply,
        }
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        dispatch(self.job(None));
    }
}
