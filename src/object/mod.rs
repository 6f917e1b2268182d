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

//! The metadata objects which describe snapshots of a file system.
//!
//! A [`MetaObject`] is a version, tree, symbolic link, or file. Each one has an exact binary
//! encoding, and its [`ObjectId`] is the SHA-256 digest of that encoding.
//!
//! [`ObjectId`]: crate::ObjectId

pub use self::metadata::{FsMetadata, Mode};
pub use self::object::{File, MetaObject, ObjectKind, ObjectType, Symlink, Tree, Version};

pub(crate) use self::codec::ByteReader;

mod codec;
mod metadata;
mod object;
