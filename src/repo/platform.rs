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

use std::ffi::OsStr;
use std::fs::{set_permissions, Metadata};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::{set_file_times, set_symlink_file_times, FileTime};

use crate::object::{FsMetadata, Mode};

/// The current time in seconds since the Unix epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn clamp(seconds: i64) -> u64 {
    seconds.max(0) as u64
}

/// Read the metadata we back up from the given file `metadata`.
pub fn read_metadata(metadata: &Metadata) -> FsMetadata {
    FsMetadata {
        mtime: clamp(metadata.mtime()),
        atime: clamp(metadata.atime()),
        ctime: clamp(metadata.ctime()),
        mode: Mode::from_raw(metadata.mode()),
    }
}

/// Apply `metadata` to the file at `path`.
///
/// The ctime can't be set, so it is ignored. Permissions are not applied to symbolic links, which
/// don't have their own on Linux.
pub fn apply_metadata(path: &Path, metadata: &FsMetadata, symlink: bool) -> io::Result<()> {
    let atime = FileTime::from_unix_time(metadata.atime as i64, 0);
    let mtime = FileTime::from_unix_time(metadata.mtime as i64, 0);

    if symlink {
        set_symlink_file_times(path, atime, mtime)
    } else {
        set_permissions(path, PermissionsExt::from_mode(metadata.mode.bits() as u32))?;
        set_file_times(path, atime, mtime)
    }
}

/// Return the file name `name` as a path component.
///
/// # Errors
/// - `Error::InvalidPath`: The name is empty, `.` or `..`, or contains a `/` or NUL byte.
pub fn file_name(name: &[u8]) -> crate::Result<&OsStr> {
    if name.is_empty()
        || name == b"."
        || name == b".."
        || name.iter().any(|byte| *byte == b'/' || *byte == 0)
    {
        return Err(crate::Error::InvalidPath);
    }
    Ok(OsStr::from_bytes(name))
}

/// Return the raw bytes of a file name or link target.
pub fn os_bytes(value: &OsStr) -> Vec<u8> {
    value.as_bytes().to_vec()
}
