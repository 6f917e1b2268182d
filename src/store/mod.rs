//! Low-level backends for storing blocks of data.
//!
//! This module contains the [`DataStore`] trait, which is implemented by the storage backends that
//! sit beneath a [`StoreRemote`]. A data store has no knowledge of packfiles, encryption, or
//! integrity checks; it only maps [`BlockKey`]s to bytes.
//!
//! [`OpenStore`] is implemented by the configuration types of each data store and is used to open
//! or create one.
//!
//! [`DataStore`]: crate::store::DataStore
//! [`StoreRemote`]: crate::remote::StoreRemote
//! [`BlockKey`]: crate::store::BlockKey
//! [`OpenStore`]: crate::store::OpenStore

pub use self::data_store::{BlockKey, BlockType, DataStore};
pub use self::directory_store::{DirectoryConfig, DirectoryStore};
pub use self::memory_store::{MemoryConfig, MemoryStore};
pub use self::open_store::OpenStore;

mod data_store;
mod directory_store;
mod memory_store;
mod open_store;
