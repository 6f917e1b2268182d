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

use std::convert::TryFrom;

use crate::id::{ObjectId, HASH_SIZE};
use crate::object::ByteReader;

use super::compression::{compress, decompress};

/// The magic bytes at the start of every uncompressed packfile.
pub const MAGIC: &[u8; 4] = b"PACK";

/// One object or chunk stored in a packfile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackEntry {
    /// The ID of the entry, which is the SHA-256 digest of `data`.
    pub id: ObjectId,

    /// The bytes of the entry.
    pub data: Vec<u8>,
}

impl PackEntry {
    /// Create an entry for `data`, computing its ID.
    pub fn new(data: Vec<u8>) -> Self {
        PackEntry {
            id: ObjectId::of(&data),
            data,
        }
    }
}

/// A container of entries whose IDs all begin with the same prefix.
///
/// Entries are kept sorted by ID, which lets [`Packfile::lookup`] use a binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packfile {
    prefix: Vec<u8>,
    entries: Vec<PackEntry>,
}

impl Packfile {
    /// Build a packfile whose entries share their first `prefix_len` bytes of ID.
    ///
    /// Entries are sorted by ID and duplicate IDs are collapsed into one entry.
    ///
    /// # Errors
    /// - `Error::InvalidPackPrefix`: `prefix_len` is longer than an ID, the entries do not all share
    /// a prefix of that length, or there are no entries to take a non-empty prefix from.
    pub fn new(prefix_len: usize, mut entries: Vec<PackEntry>) -> crate::Result<Self> {
        if prefix_len > HASH_SIZE {
            return Err(crate::Error::InvalidPackPrefix);
        }

        let prefix = match entries.first() {
            Some(entry) => entry.id.as_bytes()[..prefix_len].to_vec(),
            None if prefix_len == 0 => Vec::new(),
            None => return Err(crate::Error::InvalidPackPrefix),
        };

        if !entries
            .iter()
            .all(|entry| entry.id.as_bytes().starts_with(&prefix))
        {
            return Err(crate::Error::InvalidPackPrefix);
        }

        entries.sort_by(|left, right| left.id.cmp(&right.id));
        entries.dedup_by(|left, right| left.id == right.id);

        Ok(Packfile { prefix, entries })
    }

    /// The prefix shared by the IDs of every entry.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The entries of this packfile in ascending order of ID.
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Consume this packfile and return its entries in ascending order of ID.
    pub fn into_entries(self) -> Vec<PackEntry> {
        self.entries
    }

    /// The IDs of the entries in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this packfile has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the bytes of the entry with the given `id`.
    pub fn lookup(&self, id: &ObjectId) -> Option<&[u8]> {
        if !id.as_bytes().starts_with(&self.prefix) {
            return None;
        }
        self.entries
            .binary_search_by(|entry| entry.id.cmp(id))
            .ok()
            .map(|index| self.entries[index].data.as_slice())
    }

    /// Serialize this packfile without compressing it.
    fn encode_raw(&self) -> crate::Result<Vec<u8>> {
        let count = u32::try_from(self.entries.len()).map_err(|_| crate::Error::Serialize)?;
        let prefix_len = self.prefix.len();
        let body_size: usize = self
            .entries
            .iter()
            .map(|entry| HASH_SIZE - prefix_len + 4 + entry.data.len())
            .sum();

        let mut buf = Vec::with_capacity(MAGIC.len() + 4 + 1 + prefix_len + body_size);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&count.to_le_bytes());
        buf.push(prefix_len as u8);
        buf.extend_from_slice(&self.prefix);

        for entry in &self.entries {
            let len = u32::try_from(entry.data.len()).map_err(|_| crate::Error::Serialize)?;
            buf.extend_from_slice(&entry.id.as_bytes()[prefix_len..]);
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&entry.data);
        }

        Ok(buf)
    }

    /// Serialize and gzip-compress this packfile at the given `level` in the range 0-9.
    pub fn encode(&self, level: u32) -> crate::Result<Vec<u8>> {
        compress(&self.encode_raw()?, level)
    }

    /// Decompress and parse a packfile.
    ///
    /// # Errors
    /// - `Error::CorruptPackfile`: The data is not a valid gzip stream, the magic bytes are wrong,
    /// the declared entry count does not match the data, or the entries are not in strictly
    /// increasing order of ID.
    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        Self::decode_raw(&decompress(data)?)
    }

    fn decode_raw(data: &[u8]) -> crate::Result<Self> {
        const TRUNCATED: crate::Error =
            crate::Error::CorruptPackfile("an entry extends past the end of the packfile");

        let mut reader = ByteReader::new(data);
        if reader.take(MAGIC.len()) != Some(&MAGIC[..]) {
            return Err(crate::Error::CorruptPackfile("the magic bytes are wrong"));
        }

        let count = reader.read_u32().ok_or(TRUNCATED)? as usize;
        let prefix_len = reader.read_u8().ok_or(TRUNCATED)? as usize;
        if prefix_len > HASH_SIZE {
            return Err(crate::Error::CorruptPackfile("the prefix is longer than an ID"));
        }
        let prefix = reader.take(prefix_len).ok_or(TRUNCATED)?.to_vec();
        let suffix_len = HASH_SIZE - prefix_len;

        // Every entry occupies at least its suffix and its length field.
        if count > reader.remaining() / (suffix_len + 4) {
            return Err(crate::Error::CorruptPackfile(
                "the entry count does not match the packfile size",
            ));
        }

        let mut entries: Vec<PackEntry> = Vec::with_capacity(count);
        let mut id_bytes = [0u8; HASH_SIZE];
        id_bytes[..prefix_len].copy_from_slice(&prefix);

        for _ in 0..count {
            id_bytes[prefix_len..].copy_from_slice(reader.take(suffix_len).ok_or(TRUNCATED)?);
            let id = ObjectId::from_bytes(id_bytes);
            let len = reader.read_u32().ok_or(TRUNCATED)? as usize;
            let data = reader.take(len).ok_or(TRUNCATED)?.to_vec();

            if let Some(previous) = entries.last() {
                if previous.id >= id {
                    return Err(crate::Error::CorruptPackfile(
                        "the entries are not in increasing order",
                    ));
                }
            }

            entries.push(PackEntry { id, data });
        }

        if reader.remaining() != 0 {
            return Err(crate::Error::CorruptPackfile(
                "the entry count does not match the packfile size",
            ));
        }

        Ok(Packfile { prefix, entries })
    }
}

/// Pack `entries` which share their first `prefix_len` bytes of ID into compressed packfile bytes.
pub fn pack(entries: Vec<PackEntry>, prefix_len: usize, level: u32) -> crate::Result<Vec<u8>> {
    Packfile::new(prefix_len, entries)?.encode(level)
}

/// Decode packfile bytes into their entries in ascending order of ID.
pub fn unpack(data: &[u8]) -> crate::Result<Vec<PackEntry>> {
    Ok(Packfile::decode(data)?.into_entries())
}

/// Return the bytes of the entry with the given `id` in `packfile`.
///
/// # Errors
/// - `Error::NotFound`: There is no entry with the given `id`.
pub fn lookup<'a>(packfile: &'a Packfile, id: &ObjectId) -> crate::Result<&'a [u8]> {
    packfile.lookup(id).ok_or(crate::Error::NotFound)
}

/// Return the length of the longest prefix shared by every ID in `ids`.
///
/// This returns 0 if `ids` is empty.
pub fn shared_prefix_len<'a>(ids: impl IntoIterator<Item = &'a ObjectId>) -> usize {
    let mut ids = ids.into_iter();
    let first = match ids.next() {
        Some(id) => id.as_bytes(),
        None => return 0,
    };

    ids.fold(HASH_SIZE, |len, id| {
        first[..len]
            .iter()
            .zip(id.as_bytes().iter())
            .take_while(|(left, right)| left == right)
            .count()
    })
}
