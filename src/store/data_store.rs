use std::fmt;

use static_assertions::assert_obj_safe;

use crate::id::PackHandle;

/// A key for accessing a block in a [`DataStore`].
///
/// [`DataStore`]: crate::store::DataStore
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKey {
    /// An encrypted packfile.
    Pack(PackHandle),

    /// The encrypted index of the packfile with the same handle.
    Index(PackHandle),

    /// The sealed keystore.
    Keystore,

    /// The latest version of the node with the given name.
    Head(String),
}

impl BlockKey {
    /// The type of this key, or `None` for the keystore, which is a singleton.
    pub fn kind(&self) -> Option<BlockType> {
        match self {
            BlockKey::Pack(_) => Some(BlockType::Pack),
            BlockKey::Index(_) => Some(BlockType::Index),
            BlockKey::Head(_) => Some(BlockType::Head),
            BlockKey::Keystore => None,
        }
    }
}

/// A type of block in a [`DataStore`] which can be listed.
///
/// [`DataStore`]: crate::store::DataStore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Pack,
    Index,
    Head,
}

/// A persistent store for blocks of data.
///
/// A `DataStore` persistently stores blocks of data uniquely identified by [`BlockKey`] values.
/// Data stores are the storage backend beneath a [`StoreRemote`].
///
/// [`BlockKey`]: crate::store::BlockKey
/// [`StoreRemote`]: crate::remote::StoreRemote
pub trait DataStore: fmt::Debug + Send {
    /// Write the given `data` as a new block with the given `key`.
    ///
    /// If this method returns `Ok`, the block is stored persistently until it is removed with
    /// `remove_block`. If this method returns `Err`, the block is not stored persistently and it is
    /// up to the implementation to ensure that any data which may have been written is cleaned up.
    ///
    /// If a block with the given `key` already exists, it is overwritten.
    ///
    /// This is an atomic operation.
    fn write_block(&mut self, key: BlockKey, data: &[u8]) -> anyhow::Result<()>;

    /// Return the bytes of the block with the given `key`.
    ///
    /// If there is no block with the given `key`, this returns `Ok(None)`.
    fn read_block(&mut self, key: &BlockKey) -> anyhow::Result<Option<Vec<u8>>>;

    /// Remove the block with the given `key` from the store.
    ///
    /// Nothing in this crate removes blocks, since pruning old versions is left to tools built on
    /// top of it. Those tools and the test suite rely on every backend supporting this.
    ///
    /// If there is no block with the given `key`, this method does nothing and returns `Ok`.
    ///
    /// This is an atomic operation.
    fn remove_block(&mut self, key: &BlockKey) -> anyhow::Result<()>;

    /// Return the keys of every block of the given `kind` in the store.
    fn list_blocks(&mut self, kind: BlockType) -> anyhow::Result<Vec<BlockKey>>;
}

assert_obj_safe!(DataStore);

impl DataStore for Box<dyn DataStore> {
    fn write_block(&mut self, key: BlockKey, data: &[u8]) -> anyhow::Result<()> {
        self.as_mut().write_block(key, data)
    }

    fn read_block(&mut self, key: &BlockKey) -> anyhow::Result<Option<Vec<u8>>> {
        self.as_mut().read_block(key)
    }

    fn remove_block(&mut self, key: &BlockKey) -> anyhow::Result<()> {
        self.as_mut().remove_block(key)
    }

    fn list_blocks(&mut self, kind: BlockType) -> anyhow::Result<Vec<BlockKey>> {
        self.as_mut().list_blocks(kind)
    }
}
