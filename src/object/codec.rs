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

use super::metadata::{FsMetadata, Mode};
use super::object::{File, MetaObject, ObjectKind, ObjectType, Symlink, Tree, Version};

/// A cursor over a byte slice which reads little-endian fields.
///
/// Every method returns `None` if the field would extend past the end of the input.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, position: 0 }
    }

    /// The number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The number of bytes which have not been consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|bytes| bytes[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Some(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Some(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Some(u64::from_le_bytes(buf))
    }

    pub fn read_id(&mut self) -> Option<ObjectId> {
        ObjectId::from_slice(self.take(HASH_SIZE)?)
    }
}

const TRUNCATED: crate::Error = crate::Error::MalformedObject("a field extends past the end of the input");

/// Append a `u16`-length-prefixed byte string.
fn write_name(buf: &mut Vec<u8>, name: &[u8]) -> crate::Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| crate::Error::MalformedObject("the name is longer than 65535 bytes"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(name);
    Ok(())
}

fn write_metadata(buf: &mut Vec<u8>, metadata: &FsMetadata) {
    buf.extend_from_slice(&metadata.mtime.to_le_bytes());
    buf.extend_from_slice(&metadata.atime.to_le_bytes());
    buf.extend_from_slice(&metadata.ctime.to_le_bytes());
    buf.extend_from_slice(&metadata.mode.bits().to_le_bytes());
}

fn write_count(buf: &mut Vec<u8>, count: usize) -> crate::Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| crate::Error::MalformedObject("the list has more than 2^32 - 1 elements"))?;
    buf.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn write_ids(buf: &mut Vec<u8>, ids: &[ObjectId]) -> crate::Result<()> {
    write_count(buf, ids.len())?;
    for id in ids {
        buf.extend_from_slice(id.as_bytes());
    }
    Ok(())
}

fn read_name(reader: &mut ByteReader) -> crate::Result<Vec<u8>> {
    let len = reader.read_u16().ok_or(TRUNCATED)?;
    Ok(reader.take(len as usize).ok_or(TRUNCATED)?.to_vec())
}

fn read_metadata(reader: &mut ByteReader) -> crate::Result<FsMetadata> {
    let mtime = reader.read_u64().ok_or(TRUNCATED)?;
    let atime = reader.read_u64().ok_or(TRUNCATED)?;
    let ctime = reader.read_u64().ok_or(TRUNCATED)?;
    let mode = Mode::from_bits(reader.read_u16().ok_or(TRUNCATED)?)
        .ok_or(crate::Error::MalformedObject("the mode has unknown bits set"))?;
    Ok(FsMetadata {
        mtime,
        atime,
        ctime,
        mode,
    })
}

fn read_ids(reader: &mut ByteReader) -> crate::Result<Vec<ObjectId>> {
    let count = reader.read_u32().ok_or(TRUNCATED)? as usize;

    // Check the declared count against the input before allocating for it.
    if count > reader.remaining() / HASH_SIZE {
        return Err(TRUNCATED);
    }

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(reader.read_id().ok_or(TRUNCATED)?);
    }
    Ok(ids)
}

/// Encode `object` into its canonical binary form.
pub(super) fn encode(object: &MetaObject) -> crate::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&object.created.to_le_bytes());
    buf.push(object.kind.object_type() as u8);

    match &object.kind {
        ObjectKind::Version(Version { root, parent }) => {
            let parent = match parent {
                Some(parent) if parent.is_zero() => {
                    return Err(crate::Error::MalformedObject(
                        "the all-zero ID cannot be used as a parent",
                    ))
                }
                Some(parent) => *parent,
                None => ObjectId::ZERO,
            };
            buf.extend_from_slice(root.as_bytes());
            buf.extend_from_slice(parent.as_bytes());
        }
        ObjectKind::Tree(Tree {
            name,
            metadata,
            children,
        }) => {
            write_name(&mut buf, name)?;
            write_metadata(&mut buf, metadata);
            write_ids(&mut buf, children)?;
        }
        ObjectKind::Symlink(Symlink {
            name,
            metadata,
            target,
        }) => {
            write_name(&mut buf, name)?;
            write_metadata(&mut buf, metadata);
            write_count(&mut buf, target.len())?;
            buf.extend_from_slice(target);
        }
        ObjectKind::File(File {
            name,
            metadata,
            chunks,
        }) => {
            write_name(&mut buf, name)?;
            write_metadata(&mut buf, metadata);
            write_ids(&mut buf, chunks)?;
        }
    }

    Ok(buf)
}

/// Decode one object from the start of `data`.
///
/// This returns the object and the number of bytes it occupied.
pub(super) fn decode_prefix(data: &[u8]) -> crate::Result<(MetaObject, usize)> {
    let mut reader = ByteReader::new(data);
    let created = reader.read_u64().ok_or(TRUNCATED)?;
    let object_type = ObjectType::try_from(reader.read_u8().ok_or(TRUNCATED)?)?;

    let kind = match object_type {
        ObjectType::Version => {
            let root = reader.read_id().ok_or(TRUNCATED)?;
            let parent = reader.read_id().ok_or(TRUNCATED)?;
            ObjectKind::Version(Version {
                root,
                parent: if parent.is_zero() { None } else { Some(parent) },
            })
        }
        ObjectType::Tree => ObjectKind::Tree(Tree {
            name: read_name(&mut reader)?,
            metadata: read_metadata(&mut reader)?,
            children: read_ids(&mut reader)?,
        }),
        ObjectType::Symlink => {
            let name = read_name(&mut reader)?;
            let metadata = read_metadata(&mut reader)?;
            let target_len = reader.read_u32().ok_or(TRUNCATED)?;
            let target = reader.take(target_len as usize).ok_or(TRUNCATED)?.to_vec();
            ObjectKind::Symlink(Symlink {
                name,
                metadata,
                target,
            })
        }
        ObjectType::File => ObjectKind::File(File {
            name: read_name(&mut reader)?,
            metadata: read_metadata(&mut reader)?,
            chunks: read_ids(&mut reader)?,
        }),
    };

    Ok((MetaObject { created, kind }, reader.position()))
}

/// Decode an object which must occupy all of `data`.
pub(super) fn decode(data: &[u8]) -> crate::Result<MetaObject> {
    let (object, len) = decode_prefix(data)?;
    if len != data.len() {
        return Err(crate::Error::MalformedObject(
            "trailing bytes remain after the object",
        ));
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_layout_is_exact() {
        let root = ObjectId::of(b"root");
        let object = MetaObject::version(7, root, None);
        let encoded = object.encode().unwrap();

        assert_eq!(encoded.len(), 8 + 1 + 32 + 32);
        assert_eq!(&encoded[..8], &7u64.to_le_bytes());
        assert_eq!(encoded[8], 0);
        assert_eq!(&encoded[9..41], root.as_bytes());
        assert_eq!(&encoded[41..], &[0u8; 32]);
    }

    #[test]
    fn tree_layout_is_exact() {
        let child = ObjectId::of(b"child");
        let metadata = FsMetadata {
            mtime: 1,
            atime: 2,
            ctime: 3,
            mode: Mode::from_bits(0o755).unwrap(),
        };
        let object = MetaObject::tree(9, b"ab".to_vec(), metadata, vec![child]);
        let encoded = object.encode().unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&9u64.to_le_bytes());
        expected.push(1);
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&3u64.to_le_bytes());
        expected.extend_from_slice(&0o755u16.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(child.as_bytes());

        assert_eq!(encoded, expected);
    }

    #[test]
    fn reader_rejects_reads_past_end() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16(), Some(0x0201));
        assert_eq!(reader.read_u16(), None);
        assert_eq!(reader.read_u8(), Some(3));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn huge_declared_count_is_rejected_without_allocating() {
        let mut encoded = MetaObject::file(0, b"f".to_vec(), FsMetadata::default(), Vec::new())
            .encode()
            .unwrap();
        let count_offset = encoded.len() - 4;
        encoded[count_offset..].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            decode(&encoded),
            Err(crate::Error::MalformedObject(_))
        ));
    }
}
