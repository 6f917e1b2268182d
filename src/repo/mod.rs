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

//! Backing up and restoring directories.
//!
//! A [`Bkp`] opens the remotes and remote groups named in a [`Config`], which are both called
//! targets. A target holds a sealed keystore and the repositories of any number of nodes.
//!
//! A [`Repository`] is the chain of versions of one node. [`Repository::backup`] walks a directory
//! bottom-up, storing each file's chunks, then each file, symbolic link, and directory as a
//! metadata object, and finally a version pointing at the root directory and the previous version.
//! [`Repository::restore`] reverses this, fetching each level of the tree concurrently.
//!
//! # Deduplication
//! File contents are split into chunks before they are stored, and identical chunks are stored
//! once, even across nodes. Chunks are found using either fixed-size chunking or content-defined
//! chunking. See [`Chunking`] for details.
//!
//! # Integrity
//! [`Repository::check`] verifies that the data a node's versions reference is intact, with a
//! choice of how much data to download. See [`IntegrityMode`].
//!
//! [`Config`]: crate::config::Config

pub use self::bkp::Bkp;
pub use self::chunking::Chunking;
pub use self::report::{IntegrityMode, IntegrityReport};
pub use self::repository::Repository;

mod bkp;
mod chunking;
mod platform;
mod report;
mod repository;
