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

use crate::{
    codec::InternalIdentifier,
    error::Result,
    types::{AcquireStatus, CounterOp, ReleaseStatus, SessionId, Wait},
};
use async_trait::async_trait;

/// One database session (connection) and the lock primitives it exposes.
///
/// Advisory locks and reentrancy counters belong to the session: they are
/// invisible to other sessions and vanish when the session ends. Driver
/// failures are reported as `MutexError::System`; a primitive that answers
/// without a usable value reports `Unknown` instead.
#[async_trait]
pub trait AdvisorySession: Send + Sync + std::fmt::Debug {
    /// Identity of this session on the server
    fn session_id(&self) -> SessionId;

    /// Acquire the named lock, waiting according to `wait`
    async fn try_acquire(&self, identifier: &InternalIdentifier, wait: Wait) -> Result<AcquireStatus>;

    /// Release the named lock held by this session
    async fn release(&self, identifier: &InternalIdentifier) -> Result<ReleaseStatus>;

    /// True when no session holds the lock
    async fn is_free(&self, identifier: &InternalIdentifier) -> Result<bool>;

    /// True when this very session holds the lock
    async fn is_owned_by_current_session(&self, identifier: &InternalIdentifier) -> Result<bool>;

    /// Current reentrancy counter, zero when absent
    async fn counter(&self, identifier: &InternalIdentifier) -> Result<u64>;

    /// Apply `op` to the reentrancy counter and return its new value
    async fn adjust_counter(&self, identifier: &InternalIdentifier, op: CounterOp) -> Result<u64>;
}
