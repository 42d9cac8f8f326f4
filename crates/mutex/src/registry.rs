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

use std::collections::HashMap;
use std::fmt::Display;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    codec::LockName,
    config::MutexConfig,
    error::{MutexError, Result},
    mutex::DatabaseMutex,
    types::MutexOptions,
};

/// Cache of mutex handles by name.
///
/// Handles are created on first use and kept until evicted. Owned by whoever
/// manages the named resources; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    config: MutexConfig,
    mutexes: RwLock<HashMap<LockName, DatabaseMutex>>,
}

impl MutexRegistry {
    /// Create a registry, validating `config`
    pub fn new(config: MutexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mutexes: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &MutexConfig {
        &self.config
    }

    /// Default options carrying the configured timeout
    pub fn options(&self) -> MutexOptions {
        MutexOptions {
            timeout: self.config.default_timeout,
            ..MutexOptions::default()
        }
    }

    /// Handle for `name`, created on first use
    pub fn get<N>(&self, name: N) -> Result<DatabaseMutex>
    where
        N: TryInto<LockName, Error = MutexError>,
    {
        let name = name.try_into()?;
        if let Some(mutex) = self.mutexes.read().get(&name) {
            return Ok(mutex.clone());
        }

        let mut mutexes = self.mutexes.write();
        let mutex = mutexes
            .entry(name)
            .or_insert_with_key(|name| {
                debug!("Registering mutex '{}'", name.to_string_lossy());
                DatabaseMutex::from_name(name.clone(), &self.config)
            })
            .clone();
        Ok(mutex)
    }

    /// Handle named after the Rust type `T`, suffixed with the environment if configured
    pub fn for_type<T: ?Sized>(&self) -> Result<DatabaseMutex> {
        let type_name = std::any::type_name::<T>();
        match &self.config.environment {
            Some(environment) => self.get(format!("{type_name}@{environment}")),
            None => self.get(type_name),
        }
    }

    /// Handle for one stored record, named `"{id}@{type_name}"`.
    ///
    /// A record without an id has not been stored yet and cannot be locked.
    pub fn for_record<I: Display>(&self, type_name: &str, id: Option<I>) -> Result<DatabaseMutex> {
        match id {
            Some(id) => self.get(format!("{id}@{type_name}")),
            None => Err(MutexError::invalid_state(format!("{type_name} record is not persisted"))),
        }
    }

    /// Forget the handle for `name`. Locks held in the database are unaffected.
    pub fn evict<N>(&self, name: N) -> Result<bool>
    where
        N: TryInto<LockName, Error = MutexError>,
    {
        let name = name.try_into()?;
        Ok(self.mutexes.write().remove(&name).is_some())
    }

    pub fn clear(&self) {
        self.mutexes.write().clear();
    }

    pub fn len(&self) -> usize {
        self.mutexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.read().is_empty()
    }
}
