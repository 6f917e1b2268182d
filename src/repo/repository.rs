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
use std::ffi::OsStr;
use std::fs::{self, File as FsFile};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cas::ContentStore;
use crate::id::ObjectId;
use crate::object::{File, MetaObject, ObjectKind, Version};

use super::chunking::Chunking;
use super::platform;
use super::report::{IntegrityMode, IntegrityReport};

/// The size of the buffer used to read files which are being backed up.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// The number of chunks of a file which are fetched at once during a restore.
const RESTORE_BATCH_SIZE: usize = 256;

/// The versions of one node in a content store.
///
/// Each node has its own chain of versions. The newest version of a node is its head, which is
/// stored on the remote under the node's name. Every backup creates a new version whose parent is
/// the previous head.
#[derive(Debug)]
pub struct Repository {
    store: ContentStore,
    node: String,
    chunking: Chunking,
}

impl Repository {
    /// Open the repository of `node` in `store`.
    ///
    /// This loads the pack index from the remote.
    pub fn open(store: ContentStore, node: &str, chunking: Chunking) -> crate::Result<Self> {
        chunking.validate()?;
        let packs = store.load_index()?;
        tracing::debug!(node, packs, "opened repository");

        Ok(Repository {
            store,
            node: node.to_owned(),
            chunking,
        })
    }

    /// The name of the node whose versions this repository tracks.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The content store underlying this repository.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Learn about packfiles written to the remote since this repository was opened.
    ///
    /// This returns the number of newly indexed packfiles.
    pub fn refresh(&self) -> crate::Result<usize> {
        self.store.load_index()
    }

    /// Back up the directory at `root` and return the ID of the new version.
    ///
    /// The new version becomes the head of this node. It is always created strictly after its
    /// parent, even if the clock says otherwise.
    ///
    /// # Errors
    /// - `Error::InvalidRoot`: `root` is not a directory.
    /// - `Error::Io`: An I/O error occurred reading the directory.
    pub fn backup(&self, root: &Path) -> crate::Result<ObjectId> {
        let root_metadata = fs::metadata(root)?;
        if !root_metadata.is_dir() {
            return Err(crate::Error::InvalidRoot);
        }

        let created = platform::now();

        // The IDs of the entries seen at each depth whose parent hasn't been stored yet. Contents
        // come before their directory, so a directory adopts everything one level below it.
        let mut levels: Vec<Vec<ObjectId>> = Vec::new();
        let mut entries = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .contents_first(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let depth = entry.depth();
            let file_type = entry.file_type();

            let object = if depth == 0 {
                let children = take_level(&mut levels, 1);
                let metadata = platform::read_metadata(&root_metadata);
                MetaObject::tree(created, Vec::new(), metadata, children)
            } else {
                let name = platform::os_bytes(entry.file_name());
                let metadata = platform::read_metadata(&entry.metadata().map_err(io::Error::from)?);

                if file_type.is_dir() {
                    let children = take_level(&mut levels, depth + 1);
                    MetaObject::tree(created, name, metadata, children)
                } else if file_type.is_symlink() {
                    let target = fs::read_link(entry.path())?;
                    let target = platform::os_bytes(target.as_os_str());
                    MetaObject::symlink(created, name, metadata, target)
                } else if file_type.is_file() {
                    let chunks = self.store_contents(entry.path())?;
                    MetaObject::file(created, name, metadata, chunks)
                } else {
                    tracing::debug!(path = %entry.path().display(), "skipping special file");
                    continue;
                }
            };

            let id = self.store.put(&object.encode()?)?;
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(id);
            entries += 1;
        }

        let root_id = take_level(&mut levels, 0)
            .pop()
            .ok_or(crate::Error::InvalidRoot)?;

        let parent = self.head()?;
        let version_created = match &parent {
            Some(parent) => created.max(self.created_at(parent)?.saturating_add(1)),
            None => created,
        };
        let version = MetaObject::version(version_created, root_id, parent);
        let version_id = self.store.put(&version.encode()?)?;
        self.store.flush()?;
        self.store.remote().set_head(&self.node, &version_id)?;

        tracing::info!(
            node = %self.node,
            version = %version_id,
            entries,
            "backup complete"
        );
        Ok(version_id)
    }

    /// The creation time of the object `id`, which may have been stored by another client.
    fn created_at(&self, id: &ObjectId) -> crate::Result<u64> {
        if !self.store.contains(id) {
            self.refresh()?;
        }
        Ok(self.object(id)?.created)
    }

    /// Chunk the file at `path` and store its chunks, returning their IDs in order.
    fn store_contents(&self, path: &Path) -> crate::Result<Vec<ObjectId>> {
        let mut file = FsFile::open(path)?;
        let mut chunker = self.chunking.to_chunker();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut ids = Vec::new();

        loop {
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(bytes_read) => bytes_read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            chunker.push(&buffer[..bytes_read]);
            for chunk in chunker.chunks() {
                ids.push(self.store.put(&chunk)?);
            }
        }

        chunker.finish();
        for chunk in chunker.chunks() {
            ids.push(self.store.put(&chunk)?);
        }

        Ok(ids)
    }

    /// The ID of the newest version of this node, or `None` if it has never been backed up.
    pub fn head(&self) -> crate::Result<Option<ObjectId>> {
        self.store.remote().head(&self.node)
    }

    /// Return the decoded metadata object with the given `id`.
    pub fn object(&self, id: &ObjectId) -> crate::Result<MetaObject> {
        let data = self.store.get(id).map_err(|error| error.for_object(*id))?;
        MetaObject::decode(&data).map_err(|error| error.for_object(*id))
    }

    /// Return the version with the given `id`.
    ///
    /// # Errors
    /// - `Error::MalformedObject`: The object is not a version.
    pub fn version(&self, id: &ObjectId) -> crate::Result<Version> {
        match self.object(id)?.kind {
            ObjectKind::Version(version) => Ok(version),
            _ => Err(crate::Error::MalformedObject("the object is not a version").for_object(*id)),
        }
    }

    /// Return the IDs of every version of this node, newest first.
    pub fn history(&self) -> crate::Result<Vec<ObjectId>> {
        match self.head()? {
            Some(head) => self.history_from(&head),
            None => Ok(Vec::new()),
        }
    }

    /// Return the IDs of the version `start` and all of its ancestors, newest first.
    pub fn history_from(&self, start: &ObjectId) -> crate::Result<Vec<ObjectId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(*start);

        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(
                    crate::Error::MalformedObject("the version chain contains a cycle")
                        .for_object(id),
                );
            }
            next = self.version(&id)?.parent;
            chain.push(id);
        }

        Ok(chain)
    }

    /// Restore the version with the given `id` into the directory `target`.
    ///
    /// The directory is created if it doesn't exist. The root tree's metadata is applied to
    /// `target` itself.
    ///
    /// # Errors
    /// - `Error::Object`: An object could not be fetched or decoded, or it has a name which is not
    /// a valid file name (`Error::InvalidPath`).
    /// - `Error::Io`: An I/O error occurred writing to `target`.
    pub fn restore(&self, id: &ObjectId, target: &Path) -> crate::Result<()> {
        let version = self.version(id)?;
        let root = match self.object(&version.root)?.kind {
            ObjectKind::Tree(tree) => tree,
            _ => {
                return Err(
                    crate::Error::MalformedObject("the root of a version is not a tree")
                        .for_object(version.root),
                )
            }
        };

        fs::create_dir_all(target)?;
        let mut directories = vec![(target.to_path_buf(), root.metadata)];
        let mut frontier: Vec<(PathBuf, ObjectId)> = root
            .children
            .iter()
            .map(|child| (target.to_path_buf(), *child))
            .collect();
        let mut files = 0usize;

        // Each level of the tree is fetched at once so its packfiles download concurrently.
        while !frontier.is_empty() {
            let ids: Vec<ObjectId> = frontier.iter().map(|(_, id)| *id).collect();
            let blobs = self.store.get_many(&ids)?;
            let mut next = Vec::new();

            for ((parent, id), data) in frontier.into_iter().zip(blobs) {
                let object = MetaObject::decode(&data).map_err(|error| error.for_object(id))?;
                match object.kind {
                    ObjectKind::Tree(tree) => {
                        let path = child_path(&parent, &tree.name, id)?;
                        fs::create_dir_all(&path)?;
                        next.extend(tree.children.iter().map(|child| (path.clone(), *child)));
                        directories.push((path, tree.metadata));
                    }
                    ObjectKind::Symlink(link) => {
                        let path = child_path(&parent, &link.name, id)?;
                        remove_existing(&path)?;
                        symlink(OsStr::from_bytes(&link.target), &path)?;
                        platform::apply_metadata(&path, &link.metadata, true)?;
                    }
                    ObjectKind::File(file) => {
                        let path = child_path(&parent, &file.name, id)?;
                        self.restore_file(&path, &file)
                            .map_err(|error| error.for_object(id))?;
                        files += 1;
                    }
                    ObjectKind::Version(_) => {
                        return Err(crate::Error::MalformedObject("a version is nested in a tree")
                            .for_object(id))
                    }
                }
            }

            frontier = next;
        }

        // Children first, so a read-only directory doesn't block writing its contents.
        for (path, metadata) in directories.iter().rev() {
            platform::apply_metadata(path, metadata, false)?;
        }

        self.store.clear_cache();
        tracing::info!(
            node = %self.node,
            version = %id,
            target = %target.display(),
            files,
            directories = directories.len(),
            "restore complete"
        );
        Ok(())
    }

    fn restore_file(&self, path: &Path, file: &File) -> crate::Result<()> {
        remove_existing(path)?;
        let mut output = FsFile::create(path)?;
        for batch in file.chunks.chunks(RESTORE_BATCH_SIZE) {
            for chunk in self.store.get_many(batch)? {
                output.write_all(&chunk)?;
            }
        }
        output.flush()?;
        drop(output);

        platform::apply_metadata(path, &file.metadata, false)?;
        Ok(())
    }

    /// Verify the integrity of the versions of this node.
    ///
    /// Missing and corrupt data is recorded in the returned report rather than returned as an
    /// error.
    ///
    /// # Errors
    /// - `Error::RemoteUnavailable`: The remote could not be reached, so some data could not be
    /// checked.
    pub fn check(&self, mode: IntegrityMode) -> crate::Result<IntegrityReport> {
        let mut report = IntegrityReport::new(mode);
        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.head()?;

        while let Some(id) = next.take() {
            if !seen.insert(id) {
                report.corrupt.insert(id);
                break;
            }
            if let Some(object) = self.inspect(&id, &mut report)? {
                match object.kind {
                    ObjectKind::Version(version) => {
                        report.versions += 1;
                        roots.push(version.root);
                        next = version.parent;
                    }
                    _ => {
                        report.corrupt.insert(id);
                    }
                }
            }
        }

        if mode < IntegrityMode::Normal {
            return Ok(finish_check(report));
        }

        let mut chunks = HashSet::new();
        let mut stack = roots;
        seen.clear();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(object) = self.inspect(&id, &mut report)? {
                report.objects += 1;
                match object.kind {
                    ObjectKind::Tree(tree) => stack.extend(tree.children),
                    ObjectKind::File(file) => chunks.extend(file.chunks),
                    ObjectKind::Symlink(_) => {}
                    ObjectKind::Version(_) => {
                        report.corrupt.insert(id);
                    }
                }
            }
        }

        if mode < IntegrityMode::Slow {
            return Ok(finish_check(report));
        }

        for id in chunks {
            report.chunks += 1;
            if mode == IntegrityMode::Slow {
                if !self.store.contains(&id) {
                    report.missing.insert(id);
                }
                continue;
            }
            match self.store.get(&id) {
                Ok(data) if ObjectId::of(&data) == id => {}
                Ok(_) => {
                    report.corrupt.insert(id);
                }
                Err(error) => record_failure(&mut report, id, error)?,
            }
        }

        Ok(finish_check(report))
    }

    /// Fetch and decode an object, recording it in `report` if it is missing or corrupt.
    fn inspect(
        &self,
        id: &ObjectId,
        report: &mut IntegrityReport,
    ) -> crate::Result<Option<MetaObject>> {
        match self
            .store
            .get(id)
            .and_then(|data| MetaObject::decode(&data))
        {
            Ok(object) => Ok(Some(object)),
            Err(error) => {
                record_failure(report, *id, error)?;
                Ok(None)
            }
        }
    }
}

fn take_level(levels: &mut [Vec<ObjectId>], depth: usize) -> Vec<ObjectId> {
    levels.get_mut(depth).map(std::mem::take).unwrap_or_default()
}

fn child_path(parent: &Path, name: &[u8], id: ObjectId) -> crate::Result<PathBuf> {
    let name = platform::file_name(name).map_err(|error| error.for_object(id))?;
    Ok(parent.join(name))
}

/// Remove a file or symbolic link at `path` so it can be replaced.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.is_dir() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

fn record_failure(
    report: &mut IntegrityReport,
    id: ObjectId,
    error: crate::Error,
) -> crate::Result<()> {
    match error {
        error if error.is_transient() => return Err(error.for_object(id)),
        crate::Error::NotFound => {
            report.missing.insert(id);
        }
        error => {
            tracing::warn!(%id, %error, "object failed its integrity check");
            report.corrupt.insert(id);
        }
    }
    Ok(())
}

fn finish_check(report: IntegrityReport) -> IntegrityReport {
    tracing::info!(
        mode = ?report.mode,
        versions = report.versions,
        objects = report.objects,
        chunks = report.chunks,
        missing = report.missing.len(),
        corrupt = report.corrupt.len(),
        "integrity check complete"
    );
    report
}
