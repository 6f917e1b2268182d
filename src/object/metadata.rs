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

use bitflags::bitflags;

bitflags! {
    /// The permission bits of a file.
    ///
    /// This covers the nine POSIX permission bits plus the setuid, setgid, and sticky bits. The
    /// file type bits of `st_mode` are not part of the mode; the object kind records the file type.
    #[derive(Default)]
    pub struct Mode: u16 {
        const OTHER_EXECUTE = 0o0001;
        const OTHER_WRITE = 0o0002;
        const OTHER_READ = 0o0004;
        const GROUP_EXECUTE = 0o0010;
        const GROUP_WRITE = 0o0020;
        const GROUP_READ = 0o0040;
        const OWNER_EXECUTE = 0o0100;
        const OWNER_WRITE = 0o0200;
        const OWNER_READ = 0o0400;
        const STICKY = 0o1000;
        const SETGID = 0o2000;
        const SETUID = 0o4000;
    }
}

impl Mode {
    /// Extract the mode from a raw `st_mode` value, discarding the file type bits.
    pub fn from_raw(st_mode: u32) -> Self {
        Mode::from_bits_truncate((st_mode & 0o7777) as u16)
    }
}

/// The file system metadata attached to trees, symbolic links, and files.
///
/// Timestamps are whole seconds since the Unix epoch. Times before the epoch are clamped to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FsMetadata {
    /// The time the file was last modified.
    pub mtime: u64,

    /// The time the file was last accessed.
    pub atime: u64,

    /// The time the file metadata was last changed.
    pub ctime: u64,

    /// The permission bits of the file.
    pub mode: Mode,
}

impl FsMetadata {
    /// Return metadata with all three timestamps set to `time` and the given `mode`.
    pub fn new(time: u64, mode: Mode) -> Self {
        FsMetadata {
            mtime: time,
            atime: time,
            ctime: time,
            mode,
        }
    }
}
