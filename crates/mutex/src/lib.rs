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

//! Named, re-entrant, cross-process mutex built on the session-scoped
//! advisory locks of a shared database.
//!
//! A [`DatabaseMutex`] is a handle for a name. The lock itself is owned by the
//! database session passed to each operation, so any number of handles in any
//! number of processes agree on who holds it.
//!
//! ```no_run
//! # async fn demo() -> dbmutex::Result<()> {
//! use dbmutex::{DatabaseMutex, MemoryDatabase, MutexOptions};
//!
//! let db = MemoryDatabase::new();
//! let session = db.open_session();
//! let mutex = DatabaseMutex::new("nightly-report")?;
//!
//! let ran = mutex
//!     .synchronize(session.clone(), MutexOptions::default(), || async { Ok::<_, dbmutex::MutexError>(42) })
//!     .await?;
//! assert_eq!(ran, Some(42));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Core Module Declarations
// ============================================================================

// Naming
pub mod codec;

// Core Modules
pub mod config;
pub mod error;
pub mod types;

// Abstraction Layer Modules
pub mod session;

// Backends
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

// Application Layer Modules
pub mod mutex;
pub mod registry;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    codec::{InternalIdentifier, LockName},
    config::MutexConfig,
    error::{MutexError, Result},
    memory::{MemoryDatabase, MemorySession},
    mutex::{DatabaseMutex, MutexGuard},
    registry::MutexRegistry,
    session::AdvisorySession,
    types::{AcquireStatus, CounterOp, LockOutcome, MutexOptions, ReleaseStatus, SessionId, Wait},
};

#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresSession;

/// Current version of the mutex crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
