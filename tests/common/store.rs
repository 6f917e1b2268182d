/*
 * Copyright 2019-2020 Wren Powell
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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use rstest::*;

use bkp_store::cas::ContentStore;
use bkp_store::config::{PackConfig, RetryConfig};
use bkp_store::keystore::{Encryption, EncryptionKey};
use bkp_store::remote::{GroupOptions, Remote, RemoteGroup, StoreRemote};
use bkp_store::store::{BlockKey, BlockType, DataStore, MemoryStore};

/// Switches for the faults a `FaultyStore` injects.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    offline: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl Faults {
    /// Make every operation fail until `go_online` is called.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    /// Make every operation wait `delay` before it runs.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
        if self.offline.load(Ordering::SeqCst) {
            bail!("The store is offline.");
        }
        Ok(())
    }
}

/// A `DataStore` which stores blocks in memory and fails on demand.
#[derive(Debug)]
pub struct FaultyStore {
    blocks: MemoryStore,
    faults: Faults,
}

impl DataStore for FaultyStore {
    fn write_block(&mut self, key: BlockKey, data: &[u8]) -> anyhow::Result<()> {
        self.faults.check()?;
        self.blocks.write_block(key, data)
    }

    fn read_block(&mut self, key: &BlockKey) -> anyhow::Result<Option<Vec<u8>>> {
        self.faults.check()?;
        self.blocks.read_block(key)
    }

    fn remove_block(&mut self, key: &BlockKey) -> anyhow::Result<()> {
        self.faults.check()?;
        self.blocks.remove_block(key)
    }

    fn list_blocks(&mut self, kind: BlockType) -> anyhow::Result<Vec<BlockKey>> {
        self.faults.check()?;
        self.blocks.list_blocks(kind)
    }
}

/// A remote whose blocks can be inspected and tampered with, and which can be taken offline.
#[derive(Debug, Clone)]
pub struct TestRemote {
    pub remote: Arc<StoreRemote>,
    pub blocks: MemoryStore,
    pub faults: Faults,
}

impl TestRemote {
    pub fn new(name: &str) -> Self {
        let blocks = MemoryStore::new();
        let faults = Faults::default();
        let store = FaultyStore {
            blocks: blocks.clone(),
            faults: faults.clone(),
        };
        TestRemote {
            remote: Arc::new(StoreRemote::new(name, store)),
            blocks,
            faults,
        }
    }

    /// This remote as a trait object.
    pub fn dyn_remote(&self) -> Arc<dyn Remote> {
        Arc::clone(&self.remote) as Arc<dyn Remote>
    }

    /// Return the keys of every stored block of the given `kind`.
    pub fn keys(&self, kind: BlockType) -> Vec<BlockKey> {
        self.blocks.clone().list_blocks(kind).unwrap()
    }

    /// Flip a byte in every stored packfile.
    pub fn corrupt_packs(&self) {
        let mut blocks = self.blocks.clone();
        for key in blocks.list_blocks(BlockType::Pack).unwrap() {
            let mut data = blocks.read_block(&key).unwrap().unwrap();
            let middle = data.len() / 2;
            data[middle] ^= 0xff;
            blocks.write_block(key, &data).unwrap();
        }
    }

    /// Remove every stored block of the given `kind`.
    pub fn remove_all(&self, kind: BlockType) {
        let mut blocks = self.blocks.clone();
        for key in blocks.list_blocks(kind).unwrap() {
            blocks.remove_block(&key).unwrap();
        }
    }
}

/// A retry policy which gives up quickly.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        retry_delay_ms: 1,
        retry_max_delay_ms: 4,
    }
}

/// Group options suited to tests.
pub fn test_options() -> GroupOptions {
    GroupOptions {
        retry: fast_retry(),
        request_timeout: Duration::from_secs(5),
        io_threads: 4,
        ledger_path: None,
    }
}

/// Return a group named `name` over `members`.
pub fn group_of(name: &str, members: &[&TestRemote]) -> Arc<RemoteGroup> {
    let members = members.iter().map(|member| member.dyn_remote()).collect();
    Arc::new(RemoteGroup::new(name, members, test_options()).unwrap())
}

/// Return a random key for encrypting data.
pub fn data_key() -> EncryptionKey {
    EncryptionKey::generate(Encryption::XChaCha20Poly1305.key_size())
}

/// Return a content store over `remote`.
pub fn content_store(
    remote: Arc<dyn Remote>,
    key: EncryptionKey,
    pack: PackConfig,
) -> ContentStore {
    ContentStore::new(remote, Encryption::XChaCha20Poly1305, key, pack, 4).unwrap()
}

#[fixture]
pub fn test_remote() -> TestRemote {
    TestRemote::new("test")
}

#[fixture]
pub fn members() -> (TestRemote, TestRemote, TestRemote) {
    (TestRemote::new("a"), TestRemote::new("b"), TestRemote::new("c"))
}
