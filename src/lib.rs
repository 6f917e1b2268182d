/*
 * Copyright 2019-2020 Garrett Powell
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

//! `bkp-store` is the storage core of a deduplicating, encrypted backup tool.
//!
//! Backed up directories are stored as a DAG of immutable metadata objects addressed by the
//! SHA-256 digest of their encoding, so identical data is stored once across machines and across
//! time. The crate is layered from the bottom up:
//! - [`object`] encodes the four kinds of metadata object (versions, trees, symbolic links, and
//! files) to and from their exact binary layouts.
//! - [`pack`] groups objects which share an ID prefix into compressed packfiles.
//! - [`cas`] is the content-addressable store which hashes, deduplicates, packs, and encrypts.
//! - [`remote`] provides single remotes and remote groups, which replicate every write to all of
//! their members and spread reads across them.
//! - [`keystore`] seals the keys which encrypt the data with a master password and stores a copy
//! on every remote.
//! - [`repo`] backs up and restores directories.
//!
//! Remotes are built on a [`DataStore`], a small trait which can be implemented to add new storage
//! backends. `DirectoryStore` and `MemoryStore` are provided.
//!
//! # Examples
//! ```
//! use bkp_store::config::{Config, RemoteConfig};
//! use bkp_store::repo::Bkp;
//!
//! fn main() -> bkp_store::Result<()> {
//!     let source = tempfile::tempdir()?;
//!     std::fs::write(source.path().join("hello.txt"), b"Hello, world!")?;
//!
//!     // Configure a client with one remote which stores data in memory.
//!     let mut config = Config::new("laptop");
//!     config.remotes.push(RemoteConfig::memory("local"));
//!     let bkp = Bkp::open(config)?;
//!
//!     // Create a keystore, which is sealed with the password and stored on the remote.
//!     let keystore = bkp.init_keystore("local", b"password")?;
//!     let repository = bkp.repository("local", &keystore)?;
//!
//!     let version = repository.backup(source.path())?;
//!
//!     let target = tempfile::tempdir()?;
//!     repository.restore(&version, target.path())?;
//!     assert_eq!(std::fs::read(target.path().join("hello.txt"))?, b"Hello, world!");
//!
//!     Ok(())
//! }
//! ```
//!
//! [`DataStore`]: crate::store::DataStore

pub use env::init;
pub use error::{Error, Result};
pub use id::{ObjectId, PackHandle, HASH_SIZE};

mod env;
mod error;
mod id;

pub mod cas;
pub mod config;
pub mod keystore;
pub mod object;
pub mod pack;
pub mod remote;
pub mod repo;
pub mod store;
