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

//! Runs against a live server. Set `DBMUTEX_TEST_DATABASE_URL` and run with
//! `--features postgres -- --ignored`.

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::Duration;

use dbmutex::{AdvisorySession, DatabaseMutex, MutexError, MutexOptions, PostgresSession};

const ENV_TEST_DATABASE_URL: &str = "DBMUTEX_TEST_DATABASE_URL";

async fn connect() -> Arc<PostgresSession> {
    let url = std::env::var(ENV_TEST_DATABASE_URL).expect("DBMUTEX_TEST_DATABASE_URL must be set");
    Arc::new(PostgresSession::connect(&url).await.expect("connect to test database"))
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_reentrant_lock_on_postgres() {
    let session = connect().await;
    let mutex = DatabaseMutex::new("dbmutex-test-reentrant").unwrap();

    assert!(mutex.is_unlocked(&*session).await.unwrap());
    assert!(mutex.lock(&*session, MutexOptions::default()).await.unwrap());
    assert!(mutex.lock(&*session, MutexOptions::default()).await.unwrap());
    assert_eq!(mutex.counter_value(&*session).await.unwrap(), 2);
    assert!(mutex.is_owned(&*session).await.unwrap());

    assert!(!mutex.unlock(&*session, MutexOptions::default()).await.unwrap());
    assert!(mutex.unlock(&*session, MutexOptions::default()).await.unwrap());
    assert!(mutex.is_unlocked(&*session).await.unwrap());
    assert!(matches!(
        mutex.unlock(&*session, MutexOptions::default()).await,
        Err(MutexError::UnlockFailed { .. })
    ));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_contention_between_connections() {
    let (first, second) = (connect().await, connect().await);
    assert_ne!(first.session_id(), second.session_id());
    let mutex = DatabaseMutex::new("dbmutex-test-contention").unwrap();

    assert!(mutex.lock(&*first, MutexOptions::default()).await.unwrap());
    assert!(mutex.is_locked(&*second).await.unwrap());
    assert!(!mutex.lock(&*second, MutexOptions::default().nonblocking()).await.unwrap());

    let lock_timeout = "SELECT current_setting('lock_timeout')";
    let before: String = second.client().query_one(lock_timeout, &[]).await.unwrap().get(0);
    let err = mutex
        .lock(&*second, MutexOptions::default().with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, MutexError::Locked { .. }));
    let after: String = second.client().query_one(lock_timeout, &[]).await.unwrap().get(0);
    assert_eq!(before, after);

    assert!(mutex.unlock(&*first, MutexOptions::default()).await.unwrap());
    assert!(mutex.lock(&*second, MutexOptions::default().nonblocking()).await.unwrap());
    assert!(mutex.unlock(&*second, MutexOptions::default()).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_synchronize_on_postgres() {
    let session = connect().await;
    let mutex = DatabaseMutex::new("dbmutex-test-synchronize").unwrap();

    let value = mutex
        .synchronize(session.clone(), MutexOptions::default(), || async { Ok::<_, MutexError>(7) })
        .await
        .unwrap();
    assert_eq!(value, Some(7));
    assert!(mutex.is_unlocked(&*session).await.unwrap());
}
