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

use std::fs::{self, Permissions};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use filetime::{set_file_mtime, FileTime};
use walkdir::WalkDir;

use super::data::random_bytes;

/// The state of one entry of a directory tree, relative to the tree's root.
#[derive(Debug, PartialEq, Eq)]
pub struct EntryState {
    pub path: PathBuf,
    pub kind: &'static str,
    pub mode: u32,
    pub mtime: Option<i64>,
    pub contents: Vec<u8>,
}

/// Populate `root` with nested directories, files of various sizes, and a symbolic link.
pub fn build_tree(root: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("docs/drafts"))?;
    fs::create_dir_all(root.join("empty"))?;

    fs::write(root.join("readme.txt"), b"Hello, world!")?;
    fs::write(root.join("docs/report.bin"), random_bytes(200_000))?;
    fs::write(root.join("docs/drafts/notes.txt"), random_bytes(3000))?;
    fs::write(root.join("docs/drafts/copy.txt"), b"Hello, world!")?;
    fs::write(root.join("zero.bin"), b"")?;
    symlink("docs/report.bin", root.join("link"))?;

    fs::set_permissions(root.join("readme.txt"), Permissions::from_mode(0o640))?;
    fs::set_permissions(root.join("docs/drafts"), Permissions::from_mode(0o750))?;
    fs::set_permissions(root.join("zero.bin"), Permissions::from_mode(0o600))?;

    set_file_mtime(root.join("readme.txt"), FileTime::from_unix_time(1_500_000_000, 0))?;
    set_file_mtime(root.join("docs/drafts"), FileTime::from_unix_time(1_400_000_000, 0))?;
    Ok(())
}

/// Describe every entry under `root`, sorted by path.
///
/// The root itself is described only by its mode, since its modification time changes when it is
/// used as a restore target.
pub fn tree_state(root: &Path) -> anyhow::Result<Vec<EntryState>> {
    let mut states = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path().strip_prefix(root)?.to_path_buf();
        let metadata = entry.metadata()?;
        let file_type = entry.file_type();

        let (kind, contents, mtime) = if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            ("symlink", target.into_os_string().into_vec(), None)
        } else if file_type.is_dir() {
            let mtime = if entry.depth() == 0 {
                None
            } else {
                Some(metadata.mtime())
            };
            ("directory", Vec::new(), mtime)
        } else {
            ("file", fs::read(entry.path())?, Some(metadata.mtime()))
        };

        states.push(EntryState {
            path,
            kind,
            mode: if file_type.is_symlink() {
                0
            } else {
                metadata.mode() & 0o7777
            },
            mtime,
            contents,
        });
    }

    Ok(states)
}
