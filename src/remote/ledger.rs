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

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::id::{ObjectId, PackHandle};

use super::remote::Remote;

/// Something a remote group writes to each of its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReplicaItem {
    Pack(PackHandle),
    Index(PackHandle),
    Keystore,
    Head(String),
}

impl ReplicaItem {
    /// Whether a later write of this item replaces an earlier one.
    ///
    /// Packfiles and indexes are addressed by content, so every write of one is identical. The
    /// keystore and heads can change, so a member only holds the current value if it confirmed the
    /// most recent write.
    pub fn is_mutable(&self) -> bool {
        matches!(self, ReplicaItem::Keystore | ReplicaItem::Head(_))
    }

    /// Read this item from `remote` as bytes which can be passed to `store`.
    pub fn fetch(&self, remote: &dyn Remote) -> crate::Result<Vec<u8>> {
        match self {
            ReplicaItem::Pack(handle) => remote.get_packfile(handle),
            ReplicaItem::Index(handle) => remote.get_index(handle),
            ReplicaItem::Keystore => remote.get_keystore(),
            ReplicaItem::Head(node) => remote
                .head(node)?
                .map(|id| id.as_bytes().to_vec())
                .ok_or(crate::Error::NotFound),
        }
    }

    /// Write this item to `remote`.
    pub fn store(&self, remote: &dyn Remote, data: &[u8]) -> crate::Result<()> {
        match self {
            ReplicaItem::Pack(handle) => {
                if remote.put_packfile(data)? != *handle {
                    return Err(crate::Error::RemoteCorrupt {
                        remote: remote.name().to_owned(),
                    });
                }
                Ok(())
            }
            ReplicaItem::Index(handle) => remote.put_index(handle, data),
            ReplicaItem::Keystore => remote.put_keystore(data),
            ReplicaItem::Head(node) => {
                let version = ObjectId::from_slice(data)
                    .ok_or(crate::Error::MalformedObject("a head must be exactly one ID"))?;
                remote.set_head(node, &version)
            }
        }
    }
}

type Confirmations = HashMap<ReplicaItem, BTreeSet<String>>;

/// Tracks which members of a remote group hold which items.
///
/// Only outstanding obligations are kept. Once every member has confirmed an item, its entry is
/// removed, so an item with no entry is held by every member.
#[derive(Debug, Default)]
pub struct ReplicationLedger {
    path: Option<PathBuf>,
    confirmed: Mutex<Confirmations>,
}

impl ReplicationLedger {
    /// Return an empty ledger which is only kept in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the ledger persisted at `path`, or an empty one if the file does not exist.
    pub fn open(path: PathBuf) -> crate::Result<Self> {
        let confirmed = match fs::read(&path) {
            Ok(data) => {
                let entries: Vec<(ReplicaItem, BTreeSet<String>)> =
                    rmp_serde::from_slice(&data).map_err(|_| crate::Error::Deserialize)?;
                entries.into_iter().collect()
            }
            Err(error) if error.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };
        Ok(ReplicationLedger {
            path: Some(path),
            confirmed: Mutex::new(confirmed),
        })
    }

    /// Record that the members in `confirmed` accepted a write of `item`.
    ///
    /// For mutable items this replaces any earlier confirmations.
    pub fn record<'a>(
        &self,
        item: &ReplicaItem,
        confirmed: impl IntoIterator<Item = &'a str>,
        members: &[&str],
    ) {
        let mut ledger = self.confirmed.lock().unwrap();
        let mut set = if item.is_mutable() {
            BTreeSet::new()
        } else {
            ledger.remove(item).unwrap_or_default()
        };
        set.extend(confirmed.into_iter().map(str::to_owned));

        if members.iter().all(|member| set.contains(*member)) {
            ledger.remove(item);
        } else {
            ledger.insert(item.clone(), set);
        }
    }

    /// Record that `member` holds `item`.
    pub fn confirm(&self, item: &ReplicaItem, member: &str, members: &[&str]) {
        let mut ledger = self.confirmed.lock().unwrap();
        let complete = match ledger.get_mut(item) {
            Some(set) => {
                set.insert(member.to_owned());
                members.iter().all(|member| set.contains(*member))
            }
            None => return,
        };
        if complete {
            ledger.remove(item);
        }
    }

    /// The members which hold `item`, or `None` if every member holds it.
    pub fn confirmations(&self, item: &ReplicaItem) -> Option<BTreeSet<String>> {
        self.confirmed.lock().unwrap().get(item).cloned()
    }

    /// The items which some member is missing, with the members which hold each one.
    pub fn pending(&self) -> Vec<(ReplicaItem, BTreeSet<String>)> {
        let mut pending: Vec<_> = self
            .confirmed
            .lock()
            .unwrap()
            .iter()
            .map(|(item, set)| (item.clone(), set.clone()))
            .collect();
        pending.sort();
        pending
    }

    /// The number of items which some member is missing.
    pub fn len(&self) -> usize {
        self.confirmed.lock().unwrap().len()
    }

    /// Whether every member holds every item.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the ledger to its path, if it has one.
    pub fn save(&self) -> crate::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let entries = self.pending();
        let data = rmp_serde::to_vec(&entries).map_err(|_| crate::Error::Serialize)?;

        // Write a temporary file and rename it so a crash never leaves a partial ledger.
        let staging_path = path.with_extension("tmp");
        fs::write(&staging_path, data)?;
        fs::rename(&staging_path, path)?;
        Ok(())
    }
}
