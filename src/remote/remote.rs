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

use std::fmt::Debug;
use std::sync::Arc;

use static_assertions::assert_obj_safe;

use crate::id::{ObjectId, PackHandle};

/// A storage endpoint for packfiles, pack indexes, the sealed keystore, and version heads.
///
/// A remote stores opaque bytes; encryption and packing happen above it. Implementations must be
/// safe to call from several threads at once.
///
/// Every method may fail with:
/// - `Error::RemoteUnavailable`: The remote could not be reached. This is transient.
/// - `Error::RemoteCorrupt`: The stored bytes failed their integrity check.
pub trait Remote: Debug + Send + Sync {
    /// The name of this remote.
    fn name(&self) -> &str;

    /// The relative cost of downloading from this remote. Cheaper remotes are read first.
    fn download_cost(&self) -> u32 {
        1
    }

    /// Store an encrypted packfile and return its handle, which is the SHA-256 digest of `data`.
    ///
    /// Storing the same bytes twice is a no-op which returns the same handle.
    fn put_packfile(&self, data: &[u8]) -> crate::Result<PackHandle>;

    /// Return the bytes of the packfile with the given `handle`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no such packfile.
    fn get_packfile(&self, handle: &PackHandle) -> crate::Result<Vec<u8>>;

    /// Return the handles of every packfile on this remote.
    fn list(&self) -> crate::Result<Vec<PackHandle>>;

    /// Store the encrypted index of the packfile with the given `handle`.
    fn put_index(&self, handle: &PackHandle, data: &[u8]) -> crate::Result<()>;

    /// Return the encrypted index of the packfile with the given `handle`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no index for this packfile.
    fn get_index(&self, handle: &PackHandle) -> crate::Result<Vec<u8>>;

    /// Store the sealed keystore, replacing any existing one.
    fn put_keystore(&self, data: &[u8]) -> crate::Result<()>;

    /// Return the sealed keystore.
    ///
    /// # Errors
    /// - `Error::NotFound`: This remote never received a keystore.
    fn get_keystore(&self) -> crate::Result<Vec<u8>>;

    /// Record `version` as the latest version of the node named `node`.
    fn set_head(&self, node: &str, version: &ObjectId) -> crate::Result<()>;

    /// Return the latest version of the node named `node`, or `None` if it has never backed up.
    fn head(&self, node: &str) -> crate::Result<Option<ObjectId>>;
}

assert_obj_safe!(Remote);

impl<R: Remote + ?Sized> Remote for Arc<R> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn download_cost(&self) -> u32 {
        self.as_ref().download_cost()
    }

    fn put_packfile(&self, data: &[u8]) -> crate::Result<PackHandle> {
        self.as_ref().put_packfile(data)
    }

    fn get_packfile(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        self.as_ref().get_packfile(handle)
    }

    fn list(&self) -> crate::Result<Vec<PackHandle>> {
        self.as_ref().list()
    }

    fn put_index(&self, handle: &PackHandle, data: &[u8]) -> crate::Result<()> {
        self.as_ref().put_index(handle, data)
    }

    fn get_index(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        self.as_ref().get_index(handle)
    }

    fn put_keystore(&self, data: &[u8]) -> crate::Result<()> {
        self.as_ref().put_keystore(data)
    }

    fn get_keystore(&self) -> crate::Result<Vec<u8>> {
        self.as_ref().get_keystore()
    }

    fn set_head(&self, node: &str, version: &ObjectId) -> crate::Result<()> {
        self.as_ref().set_head(node, version)
    }

    fn head(&self, node: &str) -> crate::Result<Option<ObjectId>> {
        self.as_ref().head(node)
    }
}
