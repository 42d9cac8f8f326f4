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

use crate::types::Wait;
use thiserror::Error;

/// Mutex operation related error types
#[derive(Error, Debug)]
pub enum MutexError {
    /// Missing or unusable argument, e.g. an empty mutex name
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Internal invariant violated
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Another session holds the lock and the wait policy ran out
    #[error("Mutex '{name}' is already locked (wait: {wait})")]
    Locked { name: String, wait: Wait },

    /// Release attempted without owning the lock, or the release primitive refused
    #[error("Unlocking of mutex '{name}' failed: {reason}")]
    UnlockFailed { name: String, reason: String },

    /// The database primitive gave an answer that is neither success nor a clean refusal
    #[error("Mutex system error: {message}")]
    System {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MutexError {
    /// Create invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create locked error
    pub fn locked(name: impl Into<String>, wait: Wait) -> Self {
        Self::Locked { name: name.into(), wait }
    }

    /// Create unlock failed error
    pub fn unlock_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnlockFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create system error without an underlying cause
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            source: None,
        }
    }

    /// Create system error wrapping a driver error
    pub fn system_with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::System {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Contention and failed releases are expected outcomes the caller can act on
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::UnlockFailed { .. })
    }

    /// Check if it is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::System { .. } | Self::InvalidState { .. } | Self::InvalidArgument { .. }
        )
    }
}

/// Mutex operation Result type
pub type Result<T> = std::result::Result<T, MutexError>;

/// Convert from tokio_postgres::Error
#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for MutexError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::system_with_source("PostgreSQL advisory lock query failed", err)
    }
}
