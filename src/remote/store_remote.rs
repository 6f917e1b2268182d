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

use std::sync::Mutex;

use crate::id::{sha256, ObjectId, PackHandle, HASH_SIZE};
use crate::store::{BlockKey, BlockType, DataStore, OpenStore};

use super::remote::Remote;

/// A [`Remote`] backed by a [`DataStore`].
///
/// Packfiles are verified against their handle when read. Index, keystore, and head blocks are
/// stored behind a SHA-256 checksum of their contents which is verified when they are read.
///
/// [`Remote`]: crate::remote::Remote
/// [`DataStore`]: crate::store::DataStore
#[derive(Debug)]
pub struct StoreRemote {
    name: String,
    download_cost: u32,
    store: Mutex<Box<dyn DataStore>>,
}

impl StoreRemote {
    /// Return a remote named `name` which stores blocks in `store`.
    pub fn new(name: &str, store: impl DataStore + 'static) -> Self {
        StoreRemote {
            name: name.to_owned(),
            download_cost: 1,
            store: Mutex::new(Box::new(store)),
        }
    }

    /// Open the data store described by `config` and return a remote named `name` over it.
    pub fn open(name: &str, config: &impl OpenStore) -> crate::Result<Self> {
        Ok(Self::new(name, config.open()?))
    }

    /// Set the relative cost of downloading from this remote.
    pub fn with_download_cost(mut self, download_cost: u32) -> Self {
        self.download_cost = download_cost;
        self
    }

    fn write(&self, key: BlockKey, data: &[u8]) -> crate::Result<()> {
        self.store
            .lock()
            .unwrap()
            .write_block(key, data)
            .map_err(|error| crate::Error::unavailable(&self.name, error))
    }

    fn read(&self, key: &BlockKey) -> crate::Result<Option<Vec<u8>>> {
        self.store
            .lock()
            .unwrap()
            .read_block(key)
            .map_err(|error| crate::Error::unavailable(&self.name, error))
    }

    fn corrupt(&self, key: &BlockKey) -> crate::Error {
        tracing::warn!(remote = %self.name, ?key, "stored block failed its integrity check");
        crate::Error::RemoteCorrupt {
            remote: self.name.clone(),
        }
    }

    /// Write `data` prefixed by its checksum.
    fn write_checked(&self, key: BlockKey, data: &[u8]) -> crate::Result<()> {
        let mut block = Vec::with_capacity(HASH_SIZE + data.len());
        block.extend_from_slice(&sha256(data));
        block.extend_from_slice(data);
        self.write(key, &block)
    }

    /// Read a block written with `write_checked` and verify its checksum.
    fn read_checked(&self, key: &BlockKey) -> crate::Result<Option<Vec<u8>>> {
        let mut block = match self.read(key)? {
            Some(block) => block,
            None => return Ok(None),
        };
        if block.len() < HASH_SIZE || sha256(&block[HASH_SIZE..]) != block[..HASH_SIZE] {
            return Err(self.corrupt(key));
        }
        Ok(Some(block.split_off(HASH_SIZE)))
    }
}

impl Remote for StoreRemote {
    fn name(&self) -> &str {
        &self.name
    }

    fn download_cost(&self) -> u32 {
        self.download_cost
    }

    fn put_packfile(&self, data: &[u8]) -> crate::Result<PackHandle> {
        let handle = PackHandle::of(data);
        self.write(BlockKey::Pack(handle), data)?;
        tracing::debug!(remote = %self.name, %handle, size = data.len(), "stored packfile");
        Ok(handle)
    }

    fn get_packfile(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        let key = BlockKey::Pack(*handle);
        let data = self.read(&key)?.ok_or(crate::Error::NotFound)?;
        if PackHandle::of(&data) != *handle {
            return Err(self.corrupt(&key));
        }
        Ok(data)
    }

    fn list(&self) -> crate::Result<Vec<PackHandle>> {
        let keys = self
            .store
            .lock()
            .unwrap()
            .list_blocks(BlockType::Pack)
            .map_err(|error| crate::Error::unavailable(&self.name, error))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| match key {
                BlockKey::Pack(handle) => Some(handle),
                _ => None,
            })
            .collect())
    }

    fn put_index(&self, handle: &PackHandle, data: &[u8]) -> crate::Result<()> {
        self.write_checked(BlockKey::Index(*handle), data)
    }

    fn get_index(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        self.read_checked(&BlockKey::Index(*handle))?
            .ok_or(crate::Error::NotFound)
    }

    fn put_keystore(&self, data: &[u8]) -> crate::Result<()> {
        self.write_checked(BlockKey::Keystore, data)
    }

    fn get_keystore(&self) -> crate::Result<Vec<u8>> {
        self.read_checked(&BlockKey::Keystore)?
            .ok_or(crate::Error::NotFound)
    }

    fn set_head(&self, node: &str, version: &ObjectId) -> crate::Result<()> {
        self.write_checked(BlockKey::Head(node.to_owned()), version.as_bytes())?;
        tracing::debug!(remote = %self.name, node, %version, "advanced head");
        Ok(())
    }

    fn head(&self, node: &str) -> crate::Result<Option<ObjectId>> {
        let key = BlockKey::Head(node.to_owned());
        match self.read_checked(&key)? {
            Some(data) => match ObjectId::from_slice(&data) {
                Some(id) => Ok(Some(id)),
                None => Err(self.corrupt(&key)),
            },
            None => Ok(None),
        }
    }
}
