/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::data_store::{BlockKey, BlockType, DataStore};
use super::open_store::OpenStore;

type BlockMap = Arc<Mutex<HashMap<BlockKey, Vec<u8>>>>;

/// The configuration for opening a [`MemoryStore`].
///
/// Every store opened from clones of the same `MemoryConfig` shares the same blocks, which makes
/// it possible to reopen a memory remote within one process.
///
/// [`MemoryStore`]: crate::store::MemoryStore
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    blocks: BlockMap,
}

impl MemoryConfig {
    /// Create a new config for a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpenStore for MemoryConfig {
    type Store = MemoryStore;

    fn open(&self) -> crate::Result<Self::Store> {
        Ok(MemoryStore {
            blocks: Arc::clone(&self.blocks),
        })
    }
}

/// A `DataStore` which stores data in memory.
///
/// Unlike other `DataStore` implementations, data in a `MemoryStore` is not stored persistently
/// and is only accessible to the current process. This data store is useful for testing.
///
/// None of the methods in this data store will ever return `Err`.
///
/// You can use [`MemoryConfig`] to open a data store of this type.
///
/// [`MemoryConfig`]: crate::store::MemoryConfig
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: BlockMap,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for MemoryStore {
    fn write_block(&mut self, key: BlockKey, data: &[u8]) -> anyhow::Result<()> {
        self.blocks.lock().unwrap().insert(key, data.to_owned());
        Ok(())
    }

    fn read_block(&mut self, key: &BlockKey) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blocks.lock().unwrap().get(key).cloned())
    }

    fn remove_block(&mut self, key: &BlockKey) -> anyhow::Result<()> {
        self.blocks.lock().unwrap().remove(key);
        Ok(())
    }

    fn list_blocks(&mut self, kind: BlockType) -> anyhow::Result<Vec<BlockKey>> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.kind() == Some(kind))
            .cloned()
            .collect())
    }
}
