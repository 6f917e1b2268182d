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

use std::collections::HashSet;

use crate::id::ObjectId;

/// How thoroughly to verify a repository.
///
/// Each mode does everything the previous one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntegrityMode {
    /// Walk the chain of versions from the head.
    Quick,

    /// Also decode every metadata object reachable from those versions.
    Normal,

    /// Also check that every referenced chunk is stored.
    Slow,

    /// Also download every chunk and check its hash.
    Exhaustive,
}

/// A report of the integrity of the data in a `Repository`.
#[derive(Debug)]
pub struct IntegrityReport {
    pub(super) mode: IntegrityMode,

    /// The number of versions which were checked.
    pub(super) versions: usize,

    /// The number of metadata objects which were checked, not counting versions.
    pub(super) objects: usize,

    /// The number of chunks which were checked.
    pub(super) chunks: usize,

    /// The IDs of objects and chunks which are referenced but not stored.
    pub(super) missing: HashSet<ObjectId>,

    /// The IDs of objects and chunks which are stored but can't be read or decoded.
    pub(super) corrupt: HashSet<ObjectId>,
}

impl IntegrityReport {
    pub(super) fn new(mode: IntegrityMode) -> Self {
        IntegrityReport {
            mode,
            versions: 0,
            objects: 0,
            chunks: 0,
            missing: HashSet::new(),
            corrupt: HashSet::new(),
        }
    }

    /// The mode this report was produced with.
    pub fn mode(&self) -> IntegrityMode {
        self.mode
    }

    /// Returns whether any missing or corrupt data was found.
    pub fn is_corrupt(&self) -> bool {
        !self.missing.is_empty() || !self.corrupt.is_empty()
    }

    /// Returns whether the object or chunk with the given `id` passed every check.
    pub fn check(&self, id: &ObjectId) -> bool {
        !self.missing.contains(id) && !self.corrupt.contains(id)
    }

    pub fn versions_checked(&self) -> usize {
        self.versions
    }

    pub fn objects_checked(&self) -> usize {
        self.objects
    }

    pub fn chunks_checked(&self) -> usize {
        self.chunks
    }

    /// The IDs of referenced objects and chunks which could not be found.
    pub fn missing(&self) -> &HashSet<ObjectId> {
        &self.missing
    }

    /// The IDs of objects and chunks which could not be read or decoded.
    pub fn corrupt(&self) -> &HashSet<ObjectId> {
        &self.corrupt
    }
}
