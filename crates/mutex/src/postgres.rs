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

//! PostgreSQL session using connection-scoped advisory locks.
//!
//! PostgreSQL keys advisory locks by a 64-bit integer; the key is taken from
//! the first eight bytes of the SHA-256 of the internal identifier. Timed waits
//! run `pg_advisory_lock` under a transaction-local `lock_timeout`. Reentrancy counters
//! live in a `TEMPORARY` table, so they disappear with the connection.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_postgres::{Client, NoTls, error::SqlState};
use tracing::{debug, trace, warn};

use crate::{
    codec::InternalIdentifier,
    error::{MutexError, Result},
    session::AdvisorySession,
    types::{AcquireStatus, CounterOp, ReleaseStatus, SessionId, Wait},
};

const CREATE_COUNTER_TABLE: &str =
    "CREATE TEMPORARY TABLE IF NOT EXISTS dbmutex_counters (name text PRIMARY KEY, value bigint NOT NULL)";

const LOCK_HELD_QUERY: &str = "SELECT EXISTS (SELECT 1 FROM pg_locks \
     WHERE locktype = 'advisory' AND granted AND objsubid = 1 \
     AND classid = $1::int8::oid AND objid = $2::int8::oid)";

const LOCK_OWNED_QUERY: &str = "SELECT EXISTS (SELECT 1 FROM pg_locks \
     WHERE locktype = 'advisory' AND granted AND objsubid = 1 \
     AND classid = $1::int8::oid AND objid = $2::int8::oid AND pid = pg_backend_pid())";

/// Advisory lock key for an identifier
pub fn advisory_key(identifier: &InternalIdentifier) -> i64 {
    let digest = Sha256::digest(identifier.as_str().as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

/// `pg_locks` splits a bigint key into (classid, objid) = (high, low) 32 bits
fn key_halves(key: i64) -> (i64, i64) {
    let key = key as u64;
    ((key >> 32) as i64, (key & 0xffff_ffff) as i64)
}

fn lock_timeout_setting(wait: Wait) -> String {
    match wait {
        Wait::Immediate => "1ms".to_string(),
        Wait::For(timeout) => format!("{}ms", timeout.as_millis().max(1)),
        Wait::Forever => "0".to_string(),
    }
}

fn timed_lock_sql(key: i64, wait: Wait) -> String {
    format!(
        "SET LOCAL lock_timeout = '{}'; SELECT pg_advisory_lock({key})",
        lock_timeout_setting(wait)
    )
}

/// Session over an existing `tokio_postgres::Client`
#[derive(Debug)]
pub struct PostgresSession {
    client: Client,
    id: SessionId,
    counters_ready: AtomicBool,
}

impl PostgresSession {
    /// Wrap a connected client; the backend pid becomes the session id
    pub async fn new(client: Client) -> Result<Self> {
        let row = client.query_one("SELECT pg_backend_pid()", &[]).await?;
        let pid: i32 = row.try_get(0)?;
        debug!("PostgreSQL mutex session on backend pid {}", pid);
        Ok(Self {
            client,
            id: SessionId(pid as u64),
            counters_ready: AtomicBool::new(false),
        })
    }

    /// Open a plain-text connection and drive it on the current runtime
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!("PostgreSQL mutex connection closed with error: {}", err);
            }
        });
        Self::new(client).await
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_counter_table(&self) -> Result<()> {
        if !self.counters_ready.load(Ordering::Acquire) {
            self.client.batch_execute(CREATE_COUNTER_TABLE).await?;
            self.counters_ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Runs as one multi-statement query, i.e. one implicit transaction, so
    /// `SET LOCAL` ends with it even if the caller goes away midway.
    async fn lock_with_timeout(&self, key: i64, wait: Wait) -> Result<AcquireStatus> {
        match self.client.batch_execute(&timed_lock_sql(key, wait)).await {
            Ok(()) => Ok(AcquireStatus::Acquired),
            Err(err) if err.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) => Ok(AcquireStatus::TimedOut),
            Err(err) => Err(err.into()),
        }
    }

    async fn held(&self, query: &str, identifier: &InternalIdentifier) -> Result<bool> {
        let (classid, objid) = key_halves(advisory_key(identifier));
        let row = self.client.query_one(query, &[&classid, &objid]).await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl AdvisorySession for PostgresSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn try_acquire(&self, identifier: &InternalIdentifier, wait: Wait) -> Result<AcquireStatus> {
        let key = advisory_key(identifier);
        let status = match wait {
            Wait::Immediate => {
                let row = self.client.query_one("SELECT pg_try_advisory_lock($1)", &[&key]).await?;
                match row.try_get::<_, Option<bool>>(0)? {
                    Some(true) => AcquireStatus::Acquired,
                    Some(false) => AcquireStatus::TimedOut,
                    None => AcquireStatus::Unknown,
                }
            }
            Wait::For(_) | Wait::Forever => self.lock_with_timeout(key, wait).await?,
        };
        trace!("pg advisory lock {} ({}) -> {:?}", identifier, key, status);
        Ok(status)
    }

    async fn release(&self, identifier: &InternalIdentifier) -> Result<ReleaseStatus> {
        let key = advisory_key(identifier);
        let row = self.client.query_one("SELECT pg_advisory_unlock($1)", &[&key]).await?;
        let status = match row.try_get::<_, Option<bool>>(0)? {
            Some(true) => ReleaseStatus::Released,
            Some(false) => ReleaseStatus::NotHeld,
            None => ReleaseStatus::Unknown,
        };
        trace!("pg advisory unlock {} ({}) -> {:?}", identifier, key, status);
        Ok(status)
    }

    async fn is_free(&self, identifier: &InternalIdentifier) -> Result<bool> {
        Ok(!self.held(LOCK_HELD_QUERY, identifier).await?)
    }

    async fn is_owned_by_current_session(&self, identifier: &InternalIdentifier) -> Result<bool> {
        self.held(LOCK_OWNED_QUERY, identifier).await
    }

    async fn counter(&self, identifier: &InternalIdentifier) -> Result<u64> {
        self.ensure_counter_table().await?;
        let row = self
            .client
            .query_opt("SELECT value FROM dbmutex_counters WHERE name = $1", &[&identifier.as_str()])
            .await?;
        match row {
            Some(row) => counter_value(row.try_get(0)?),
            None => Ok(0),
        }
    }

    async fn adjust_counter(&self, identifier: &InternalIdentifier, op: CounterOp) -> Result<u64> {
        self.ensure_counter_table().await?;
        let name = identifier.as_str();
        match op {
            CounterOp::Increment => {
                let row = self
                    .client
                    .query_one(
                        "INSERT INTO dbmutex_counters (name, value) VALUES ($1, 1) \
                         ON CONFLICT (name) DO UPDATE SET value = dbmutex_counters.value + 1 \
                         RETURNING value",
                        &[&name],
                    )
                    .await?;
                counter_value(row.try_get(0)?)
            }
            CounterOp::Decrement => {
                let row = self
                    .client
                    .query_opt(
                        "UPDATE dbmutex_counters SET value = GREATEST(value - 1, 0) WHERE name = $1 RETURNING value",
                        &[&name],
                    )
                    .await?;
                match row {
                    Some(row) => counter_value(row.try_get(0)?),
                    None => Ok(0),
                }
            }
            CounterOp::Reset => {
                self.client
                    .execute("DELETE FROM dbmutex_counters WHERE name = $1", &[&name])
                    .await?;
                Ok(0)
            }
        }
    }
}

fn counter_value(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| MutexError::system(format!("negative reentrancy counter {value}")))
}
