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

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::PackConfig;
use crate::id::{ObjectId, PackHandle};
use crate::keystore::{Encryption, EncryptionKey};
use crate::pack::{PackEntry, Packfile};
use crate::remote::Remote;

/// A content-addressable store of objects and chunks.
///
/// Every blob is addressed by the SHA-256 digest of its bytes, so storing the same bytes twice
/// stores them once. New blobs are held locally as loose objects until [`flush`] packs them into
/// encrypted packfiles on the remote. Each uploaded packfile is followed by an encrypted index
/// listing its IDs, which lets [`load_index`] learn where every blob lives without downloading the
/// packfiles themselves.
///
/// The remote may be a single remote or a remote group; the store behaves the same either way.
///
/// [`flush`]: crate::cas::ContentStore::flush
/// [`load_index`]: crate::cas::ContentStore::load_index
pub struct ContentStore {
    remote: Arc<dyn Remote>,
    encryption: Encryption,
    key: EncryptionKey,
    pack: PackConfig,
    pool: ThreadPool,

    /// Blobs which have not been packed yet.
    loose: RwLock<BTreeMap<ObjectId, Arc<Vec<u8>>>>,

    /// The packfile holding each packed blob.
    index: RwLock<HashMap<ObjectId, PackHandle>>,

    /// The packfiles whose contents are in `index`.
    indexed_packs: RwLock<HashSet<PackHandle>>,

    /// Decoded packfiles which have been downloaded.
    cache: RwLock<HashMap<PackHandle, Arc<Packfile>>>,
}

impl Debug for ContentStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStore")
            .field("remote", &self.remote.name())
            .field("encryption", &self.encryption)
            .field("pack", &self.pack)
            .finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Return a store over `remote` which encrypts packfiles and indexes with `key`.
    ///
    /// At most `concurrency` packfiles are uploaded or downloaded at once.
    pub fn new(
        remote: Arc<dyn Remote>,
        encryption: Encryption,
        key: EncryptionKey,
        pack: PackConfig,
        concurrency: usize,
    ) -> crate::Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .build()
            .map_err(|error| {
                crate::Error::Config(format!("failed to create the fetch pool: {}", error))
            })?;

        Ok(ContentStore {
            remote,
            encryption,
            key,
            pack,
            pool,
            loose: RwLock::new(BTreeMap::new()),
            index: RwLock::new(HashMap::new()),
            indexed_packs: RwLock::new(HashSet::new()),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// The remote this store reads from and writes to.
    pub fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    /// Store `data` and return its ID.
    ///
    /// If a blob with the same ID is already stored, this does nothing.
    ///
    /// # Errors
    /// - `Error::HashCollision`: A different loose blob has the same ID.
    pub fn put(&self, data: &[u8]) -> crate::Result<ObjectId> {
        let id = ObjectId::of(data);

        if self.index.read().unwrap().contains_key(&id) {
            return Ok(id);
        }

        let mut loose = self.loose.write().unwrap();
        match loose.get(&id) {
            Some(existing) if existing.as_slice() != data => Err(crate::Error::HashCollision(id)),
            Some(_) => Ok(id),
            None => {
                loose.insert(id, Arc::new(data.to_vec()));
                tracing::debug!(%id, size = data.len(), "stored loose object");
                Ok(id)
            }
        }
    }

    /// Return whether a blob with the given `id` is stored.
    ///
    /// Packed blobs are only known once [`load_index`] has run or this store packed them itself.
    ///
    /// [`load_index`]: crate::cas::ContentStore::load_index
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.loose.read().unwrap().contains_key(id) || self.index.read().unwrap().contains_key(id)
    }

    /// Return the bytes of the blob with the given `id`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no blob with the given `id`.
    /// - `Error::RemoteCorrupt`: The blob read from the remote does not match its ID.
    pub fn get(&self, id: &ObjectId) -> crate::Result<Vec<u8>> {
        if let Some(data) = self.loose.read().unwrap().get(id) {
            return Ok(data.to_vec());
        }
        let handle = self.locate(id)?;
        let packfile = self.fetch_pack(&handle)?;
        self.extract(&packfile, id)
    }

    /// Return the bytes of each blob in `ids`, in the same order.
    ///
    /// The packfiles holding the blobs are downloaded concurrently, and a remote group spreads
    /// those downloads across its members.
    pub fn get_many(&self, ids: &[ObjectId]) -> crate::Result<Vec<Vec<u8>>> {
        // The first requested blob in each wanted packfile, for error reporting.
        let mut wanted = BTreeMap::new();
        {
            let loose = self.loose.read().unwrap();
            let cache = self.cache.read().unwrap();
            for id in ids {
                if loose.contains_key(id) {
                    continue;
                }
                let handle = self.locate(id).map_err(|error| error.for_object(*id))?;
                if !cache.contains_key(&handle) {
                    wanted.entry(handle).or_insert(*id);
                }
            }
        }

        tracing::debug!(objects = ids.len(), packs = wanted.len(), "fetching objects");
        self.pool.install(|| {
            wanted
                .par_iter()
                .map(|(handle, id)| {
                    self.fetch_pack(handle)
                        .map(|_| ())
                        .map_err(|error| error.for_object(*id))
                })
                .collect::<crate::Result<Vec<_>>>()
        })?;

        ids.iter()
            .map(|id| self.get(id).map_err(|error| error.for_object(*id)))
            .collect()
    }

    /// Pack every loose blob into packfiles and upload them.
    ///
    /// Blobs are grouped by the first `prefix-length` bytes of their ID, and a group is split
    /// across several packfiles when it would exceed `max-pack-size`. This returns the handles of
    /// the uploaded packfiles.
    pub fn flush(&self) -> crate::Result<Vec<PackHandle>> {
        let snapshot: Vec<(ObjectId, Arc<Vec<u8>>)> = self
            .loose
            .read()
            .unwrap()
            .iter()
            .map(|(id, data)| (*id, Arc::clone(data)))
            .collect();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let batches = self.plan_packs(&snapshot);
        let uploaded = self.pool.install(|| {
            batches
                .into_par_iter()
                .map(|batch| self.upload(batch))
                .collect::<crate::Result<Vec<_>>>()
        })?;

        let mut handles = Vec::with_capacity(uploaded.len());
        {
            let mut index = self.index.write().unwrap();
            let mut indexed_packs = self.indexed_packs.write().unwrap();
            let mut loose = self.loose.write().unwrap();
            for (handle, ids) in uploaded {
                for id in ids {
                    index.insert(id, handle);
                    loose.remove(&id);
                }
                indexed_packs.insert(handle);
                handles.push(handle);
            }
        }

        tracing::info!(
            objects = snapshot.len(),
            packs = handles.len(),
            remote = self.remote.name(),
            "flushed loose objects"
        );
        Ok(handles)
    }

    /// Group loose blobs into batches which each become one packfile.
    fn plan_packs(&self, snapshot: &[(ObjectId, Arc<Vec<u8>>)]) -> Vec<Vec<PackEntry>> {
        let prefix_len = self.pack.prefix_length;
        let mut buckets: BTreeMap<&[u8], Vec<&(ObjectId, Arc<Vec<u8>>)>> = BTreeMap::new();
        for entry in snapshot {
            buckets
                .entry(&entry.0.as_bytes()[..prefix_len])
                .or_default()
                .push(entry);
        }

        let mut batches = Vec::new();
        for entries in buckets.into_values() {
            let mut batch = Vec::new();
            let mut batch_size = 0;
            for (id, data) in entries {
                if !batch.is_empty() && batch_size + data.len() > self.pack.max_pack_size {
                    batches.push(std::mem::take(&mut batch));
                    batch_size = 0;
                }
                batch_size += data.len();
                batch.push(PackEntry {
                    id: *id,
                    data: data.to_vec(),
                });
            }
            if !batch.is_empty() {
                batches.push(batch);
            }
        }
        batches
    }

    /// Encode, encrypt, and upload one packfile and its index.
    fn upload(&self, batch: Vec<PackEntry>) -> crate::Result<(PackHandle, Vec<ObjectId>)> {
        let packfile = Packfile::new(self.pack.prefix_length, batch)?;
        let ids: Vec<ObjectId> = packfile.ids().collect();

        let encoded = packfile.encode(self.pack.compression_level)?;
        let ciphertext = self.encryption.encrypt(&encoded, &self.key)?;
        let handle = self.remote.put_packfile(&ciphertext)?;

        let index = rmp_serde::to_vec(&ids).map_err(|_| crate::Error::Serialize)?;
        self.remote
            .put_index(&handle, &self.encryption.encrypt(&index, &self.key)?)?;

        tracing::debug!(%handle, entries = ids.len(), size = ciphertext.len(), "uploaded packfile");
        Ok((handle, ids))
    }

    /// Learn which packfile holds each blob on the remote.
    ///
    /// Packfiles which are already indexed are skipped. When a packfile has no readable index, the
    /// packfile itself is downloaded instead. This returns the number of packfiles newly indexed.
    pub fn load_index(&self) -> crate::Result<usize> {
        let known = self.indexed_packs.read().unwrap().clone();
        let handles: Vec<PackHandle> = self
            .remote
            .list()?
            .into_iter()
            .filter(|handle| !known.contains(handle))
            .collect();

        let indexes = self.pool.install(|| {
            handles
                .par_iter()
                .map(|handle| self.read_index(handle).map(|ids| (*handle, ids)))
                .collect::<crate::Result<Vec<_>>>()
        })?;

        let mut index = self.index.write().unwrap();
        let mut indexed_packs = self.indexed_packs.write().unwrap();
        for (handle, ids) in &indexes {
            for id in ids {
                index.insert(*id, *handle);
            }
            indexed_packs.insert(*handle);
        }

        tracing::debug!(packs = indexes.len(), objects = index.len(), "loaded pack index");
        Ok(indexes.len())
    }

    /// Return the IDs stored in the packfile with the given `handle`.
    fn read_index(&self, handle: &PackHandle) -> crate::Result<Vec<ObjectId>> {
        match self.remote.get_index(handle) {
            Ok(ciphertext) => {
                let ids: Option<Vec<ObjectId>> = self
                    .encryption
                    .decrypt(&ciphertext, &self.key)
                    .ok()
                    .and_then(|plaintext| rmp_serde::from_slice(&plaintext).ok());
                if let Some(ids) = ids {
                    return Ok(ids);
                }
                tracing::warn!(%handle, "pack index is unreadable, reading the packfile instead");
            }
            Err(crate::Error::NotFound) | Err(crate::Error::RemoteCorrupt { .. }) => {
                tracing::debug!(%handle, "pack index is missing, reading the packfile instead");
            }
            Err(error) => return Err(error),
        }
        Ok(self.fetch_pack(handle)?.ids().collect())
    }

    fn locate(&self, id: &ObjectId) -> crate::Result<PackHandle> {
        self.index
            .read()
            .unwrap()
            .get(id)
            .copied()
            .ok_or(crate::Error::NotFound)
    }

    /// Download and decode a packfile, or return it from the cache.
    fn fetch_pack(&self, handle: &PackHandle) -> crate::Result<Arc<Packfile>> {
        if let Some(packfile) = self.cache.read().unwrap().get(handle) {
            return Ok(Arc::clone(packfile));
        }

        let ciphertext = self.remote.get_packfile(handle)?;
        let encoded = self.encryption.decrypt(&ciphertext, &self.key)?;
        let packfile = Arc::new(Packfile::decode(&encoded)?);
        tracing::debug!(%handle, entries = packfile.len(), "downloaded packfile");

        self.cache
            .write()
            .unwrap()
            .insert(*handle, Arc::clone(&packfile));
        Ok(packfile)
    }

    /// Return the blob with the given `id` from `packfile`, verifying its hash.
    fn extract(&self, packfile: &Packfile, id: &ObjectId) -> crate::Result<Vec<u8>> {
        let data = packfile.lookup(id).ok_or_else(|| self.corrupt(id))?;
        if ObjectId::of(data) != *id {
            return Err(self.corrupt(id));
        }
        Ok(data.to_vec())
    }

    /// The index promised a blob the remote cannot produce intact.
    fn corrupt(&self, id: &ObjectId) -> crate::Error {
        tracing::warn!(%id, remote = self.remote.name(), "packed object failed its integrity check");
        crate::Error::RemoteCorrupt {
            remote: self.remote.name().to_owned(),
        }
    }

    /// The number of blobs which have not been packed yet.
    pub fn loose_count(&self) -> usize {
        self.loose.read().unwrap().len()
    }

    /// The number of packed blobs whose packfile is known.
    pub fn indexed_count(&self) -> usize {
        self.index.read().unwrap().len()
    }

    /// Drop every cached packfile.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }
}
