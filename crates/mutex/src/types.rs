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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Options accepted by `lock`, `unlock`, `synchronize` and `guard`.
///
/// Each operation reads the fields that concern it: acquisition uses `block`,
/// `timeout` and `raise`; release uses `force` and `raise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexOptions {
    /// Wait for the lock. `false` makes a single immediate attempt.
    #[serde(default = "default_block")]
    pub block: bool,
    /// Upper bound on the wait. `None` waits as long as the database does.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Report contention and failed releases as errors instead of `false`.
    #[serde(default = "default_raise")]
    pub raise: bool,
    /// On release, drop every outstanding acquisition of this session at once.
    #[serde(default)]
    pub force: bool,
}

fn default_block() -> bool {
    true
}

fn default_raise() -> bool {
    true
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            block: default_block(),
            timeout: None,
            raise: default_raise(),
            force: false,
        }
    }
}

impl MutexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt once without waiting
    pub fn nonblocking(mut self) -> Self {
        self.block = false;
        self
    }

    /// Set the maximum wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Convert failures into `false` instead of errors
    pub fn without_raise(mut self) -> Self {
        self.raise = false;
        self
    }

    /// Release all nested acquisitions in one call
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Wait policy handed to the acquire primitive
    pub fn wait(&self) -> Wait {
        if !self.block {
            return Wait::Immediate;
        }
        match self.timeout {
            None => Wait::Forever,
            Some(timeout) if timeout.is_zero() => Wait::Immediate,
            Some(timeout) => Wait::For(timeout),
        }
    }
}

/// How long the acquire primitive may wait for a held lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    /// Single attempt, return at once
    Immediate,
    /// Wait at most this long
    For(Duration),
    /// Block until the lock is granted
    Forever,
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::Immediate => write!(f, "immediate"),
            Wait::For(timeout) => write!(f, "{timeout:?}"),
            Wait::Forever => write!(f, "forever"),
        }
    }
}

/// Result of the database's try/get lock primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// Lock granted to the calling session
    Acquired,
    /// Another session kept the lock for the whole wait
    TimedOut,
    /// No usable answer (SQL NULL or an unexpected value)
    Unknown,
}

/// Result of the database's release lock primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Exactly one lock released
    Released,
    /// The session did not hold the lock
    NotHeld,
    /// No usable answer (SQL NULL or an unexpected value)
    Unknown,
}

/// Statement applied to a session-scoped reentrancy counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Increment,
    /// Saturates at zero
    Decrement,
    Reset,
}

/// Outcome of an acquisition attempt, without using errors for contention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock held by this session; `depth` is the reentrancy counter after the call
    Acquired { depth: u64 },
    /// Waited for the configured timeout without getting the lock
    TimedOut,
    /// Non-blocking attempt found the lock held elsewhere
    Contended,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired { .. })
    }

    /// Reentrancy depth, if acquired
    pub fn depth(&self) -> Option<u64> {
        match self {
            LockOutcome::Acquired { depth } => Some(*depth),
            _ => None,
        }
    }
}

/// Identifies one database session (connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MutexOptions::default();
        assert!(options.block);
        assert!(options.raise);
        assert!(!options.force);
        assert_eq!(options.timeout, None);
        assert_eq!(options.wait(), Wait::Forever);
    }

    #[test]
    fn test_wait_policy() {
        assert_eq!(MutexOptions::new().nonblocking().wait(), Wait::Immediate);
        assert_eq!(
            MutexOptions::new().with_timeout(Duration::from_secs(2)).wait(),
            Wait::For(Duration::from_secs(2))
        );
        assert_eq!(MutexOptions::new().with_timeout(Duration::ZERO).wait(), Wait::Immediate);
        // block=false wins over any timeout
        assert_eq!(
            MutexOptions::new().with_timeout(Duration::from_secs(2)).nonblocking().wait(),
            Wait::Immediate
        );
    }

    #[test]
    fn test_options_deserialize_defaults() {
        let options: MutexOptions = serde_json::from_str(r#"{"force": true}"#).unwrap();
        assert!(options.block);
        assert!(options.raise);
        assert!(options.force);
    }

    #[test]
    fn test_lock_outcome() {
        let acquired = LockOutcome::Acquired { depth: 2 };
        assert!(acquired.is_acquired());
        assert_eq!(acquired.depth(), Some(2));
        assert!(!LockOutcome::Contended.is_acquired());
        assert_eq!(LockOutcome::TimedOut.depth(), None);
    }

    #[test]
    fn test_wait_display() {
        assert_eq!(Wait::Immediate.to_string(), "immediate");
        assert_eq!(Wait::Forever.to_string(), "forever");
        assert_eq!(Wait::For(Duration::from_millis(1500)).to_string(), "1.5s");
    }
}
