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

use crate::id::ObjectId;

use super::codec;
use super::metadata::FsMetadata;

/// The one-byte tag which identifies the kind of an encoded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Version = 0,
    Tree = 1,
    Symlink = 2,
    File = 3,
}

impl TryFrom<u8> for ObjectType {
    type Error = crate::Error;

    fn try_from(tag: u8) -> crate::Result<Self> {
        match tag {
            0 => Ok(ObjectType::Version),
            1 => Ok(ObjectType::Tree),
            2 => Ok(ObjectType::Symlink),
            3 => Ok(ObjectType::File),
            _ => Err(crate::Error::MalformedObject("the type tag is unrecognized")),
        }
    }
}

/// A snapshot of the file system of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// The ID of the root tree.
    pub root: ObjectId,

    /// The ID of the previous version of this node, or `None` if this is the first.
    pub parent: Option<ObjectId>,
}

/// A directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tree {
    /// The name of the directory, which is empty for the backup root.
    pub name: Vec<u8>,

    pub metadata: FsMetadata,

    /// The IDs of the trees, symbolic links, and files in this directory.
    pub children: Vec<ObjectId>,
}

/// A symbolic link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symlink {
    pub name: Vec<u8>,

    pub metadata: FsMetadata,

    /// The raw bytes of the link target.
    pub target: Vec<u8>,
}

/// A regular file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct File {
    pub name: Vec<u8>,

    pub metadata: FsMetadata,

    /// The IDs of the chunks whose concatenation is the file contents.
    pub chunks: Vec<ObjectId>,
}

/// The kind-specific contents of a [`MetaObject`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Version(Version),
    Tree(Tree),
    Symlink(Symlink),
    File(File),
}

impl ObjectKind {
    /// The type tag of this kind.
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectKind::Version(_) => ObjectType::Version,
            ObjectKind::Tree(_) => ObjectType::Tree,
            ObjectKind::Symlink(_) => ObjectType::Symlink,
            ObjectKind::File(_) => ObjectType::File,
        }
    }
}

/// An immutable metadata object.
///
/// Objects are addressed by the SHA-256 digest of their encoded bytes. The encoding is canonical,
/// so two equal objects always have the same [`ObjectId`] and two different objects never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaObject {
    /// The time this object was created, in seconds since the Unix epoch.
    pub created: u64,

    /// The contents of this object.
    pub kind: ObjectKind,
}

impl MetaObject {
    pub fn version(created: u64, root: ObjectId, parent: Option<ObjectId>) -> Self {
        MetaObject {
            created,
            kind: ObjectKind::Version(Version { root, parent }),
        }
    }

    pub fn tree(
        created: u64,
        name: Vec<u8>,
        metadata: FsMetadata,
        children: Vec<ObjectId>,
    ) -> Self {
        MetaObject {
            created,
            kind: ObjectKind::Tree(Tree {
                name,
                metadata,
                children,
            }),
        }
    }

    pub fn symlink(created: u64, name: Vec<u8>, metadata: FsMetadata, target: Vec<u8>) -> Self {
        MetaObject {
            created,
            kind: ObjectKind::Symlink(Symlink {
                name,
                metadata,
                target,
            }),
        }
    }

    pub fn file(created: u64, name: Vec<u8>, metadata: FsMetadata, chunks: Vec<ObjectId>) -> Self {
        MetaObject {
            created,
            kind: ObjectKind::File(File {
                name,
                metadata,
                chunks,
            }),
        }
    }

    /// The type tag of this object.
    pub fn object_type(&self) -> ObjectType {
        self.kind.object_type()
    }

    /// The name of this object, or `None` if it is a version.
    pub fn name(&self) -> Option<&[u8]> {
        match &self.kind {
            ObjectKind::Version(_) => None,
            ObjectKind::Tree(tree) => Some(&tree.name),
            ObjectKind::Symlink(symlink) => Some(&symlink.name),
            ObjectKind::File(file) => Some(&file.name),
        }
    }

    /// Encode this object into its canonical binary form.
    ///
    /// # Errors
    /// - `Error::MalformedObject`: A name, target, or list is too long for its length field, or the
    /// parent of a version is the reserved all-zero ID.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Decode an object from `data`, which must contain exactly one encoded object.
    ///
    /// # Errors
    /// - `Error::MalformedObject`: The data is truncated, has an unknown type tag, has unknown mode
    /// bits set, or has trailing bytes.
    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        codec::decode(data)
    }

    /// Decode one object from the start of `data`, returning it and the number of bytes consumed.
    ///
    /// # Errors
    /// - `Error::MalformedObject`: The data is truncated, has an unknown type tag, or has unknown
    /// mode bits set.
    pub fn decode_prefix(data: &[u8]) -> crate::Result<(Self, usize)> {
        codec::decode_prefix(data)
    }

    /// Encode this object and return its ID.
    pub fn id(&self) -> crate::Result<ObjectId> {
        Ok(ObjectId::of(&self.encode()?))
    }
}
