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

//! Two sessions competing for one named mutex.
//!
//! Run with `RUST_LOG=dbmutex=debug cargo run --example two_sessions`.

use std::time::Duration;

use dbmutex::{AdvisorySession, MemoryDatabase, MutexConfig, MutexError, MutexOptions, MutexRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), MutexError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = MutexRegistry::new(MutexConfig::from_env())?;
    let db = MemoryDatabase::new();
    let (first, second) = (db.open_session(), db.open_session());
    let mutex = registry.get("nightly-report")?;
    info!("using {}", mutex);

    mutex.lock(&*first, registry.options()).await?;
    mutex.lock(&*first, registry.options()).await?;
    info!("{} holds it, depth {}", first.session_id(), mutex.counter_value(&*first).await?);

    let got = mutex.lock(&*second, MutexOptions::default().nonblocking()).await?;
    info!("{} tried without waiting: {}", second.session_id(), got);

    let waiter = {
        let mutex = mutex.clone();
        let second = second.clone();
        tokio::spawn(async move {
            mutex
                .synchronize(second, MutexOptions::default().with_timeout(Duration::from_secs(5)), || async {
                    info!("second session is inside the critical section");
                    Ok::<_, MutexError>(())
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    mutex.unlock(&*first, MutexOptions::default()).await?;
    info!("first unlock released the lock: {}", mutex.is_unlocked(&*first).await?);
    mutex.unlock(&*first, MutexOptions::default()).await?;

    match waiter.await {
        Ok(result) => info!("waiter finished: {:?}", result?),
        Err(err) => return Err(MutexError::system_with_source("waiter task failed", err)),
    }
    Ok(())
}
