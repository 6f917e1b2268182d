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

//! The packfile container format.
//!
//! A packfile bundles many small objects and chunks whose IDs share a prefix into one compressed
//! blob so that remotes store fewer, larger files.

pub use self::compression::MAX_LEVEL;
pub use self::packfile::{lookup, pack, shared_prefix_len, unpack, PackEntry, Packfile, MAGIC};

mod compression;
mod packfile;
