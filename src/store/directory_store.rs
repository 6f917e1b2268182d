use std::fs::{create_dir_all, read_dir, read_to_string, remove_file, rename, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use uuid::Uuid;

use crate::id::PackHandle;

use super::data_store::{BlockKey, BlockType, DataStore};
use super::open_store::OpenStore;

/// The current version of the directory layout.
const CURRENT_VERSION: &str = "5f0e8a5c-3b4d-4c2e-9a51-7c2d3e1f9b64";

// The names of top-level files in the data store.
const STORE_DIRECTORY: &str = "store";
const STAGING_DIRECTORY: &str = "stage";
const VERSION_FILE: &str = "version";

fn type_path(kind: BlockType) -> PathBuf {
    match kind {
        BlockType::Pack => [STORE_DIRECTORY, "packs"].iter().collect(),
        BlockType::Index => [STORE_DIRECTORY, "index"].iter().collect(),
        BlockType::Head => [STORE_DIRECTORY, "heads"].iter().collect(),
    }
}

fn fan_out_path(kind: BlockType, handle: &PackHandle) -> PathBuf {
    let hex = handle.to_hex();
    type_path(kind).join(&hex[..2]).join(&hex)
}

fn block_path(key: &BlockKey) -> anyhow::Result<PathBuf> {
    Ok(match key {
        BlockKey::Pack(handle) => fan_out_path(BlockType::Pack, handle),
        BlockKey::Index(handle) => fan_out_path(BlockType::Index, handle),
        BlockKey::Keystore => [STORE_DIRECTORY, "keystore"].iter().collect(),
        BlockKey::Head(name) => {
            let separator = |c: char| c == '/' || c == '\\';
            if name.is_empty() || name.starts_with('.') || name.contains(separator) {
                bail!("The head name '{}' is not a valid file name.", name);
            }
            type_path(BlockType::Head).join(name)
        }
    })
}

/// The configuration for opening a [`DirectoryStore`].
///
/// [`DirectoryStore`]: crate::store::DirectoryStore
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DirectoryConfig {
    /// The path of the directory store.
    pub path: PathBuf,
}

impl OpenStore for DirectoryConfig {
    type Store = DirectoryStore;

    fn open(&self) -> crate::Result<Self::Store> {
        create_dir_all(self.path.join(STORE_DIRECTORY))?;
        create_dir_all(self.path.join(STAGING_DIRECTORY))?;
        for kind in [BlockType::Pack, BlockType::Index, BlockType::Head] {
            create_dir_all(self.path.join(type_path(kind)))?;
        }

        let version_path = self.path.join(VERSION_FILE);

        if version_path.exists() {
            if read_to_string(&version_path)? != CURRENT_VERSION {
                return Err(crate::Error::UnsupportedFormat);
            }
        } else {
            let mut version_file = File::create(&version_path)?;
            version_file.write_all(CURRENT_VERSION.as_bytes())?;
        }

        Ok(DirectoryStore {
            path: self.path.clone(),
        })
    }
}

/// A `DataStore` which stores data in a directory in the local file system.
///
/// Packfiles and indexes are spread across sub-directories named after the first byte of their
/// handle.
///
/// You can use [`DirectoryConfig`] to open a data store of this type.
///
/// [`DirectoryConfig`]: crate::store::DirectoryConfig
#[derive(Debug)]
pub struct DirectoryStore {
    /// The path of the store's root directory.
    path: PathBuf,
}

impl DirectoryStore {
    /// The path of the store's root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return a new staging path.
    fn staging_path(&self) -> PathBuf {
        let uuid_str = Uuid::new_v4().as_hyphenated().to_string();
        self.path.join(STAGING_DIRECTORY).join(&uuid_str)
    }

    fn parse_handle(file_name: &std::ffi::OsStr) -> anyhow::Result<PackHandle> {
        file_name
            .to_str()
            .and_then(PackHandle::from_hex)
            .ok_or_else(|| anyhow!("Block file name is invalid."))
    }
}

impl DataStore for DirectoryStore {
    fn write_block(&mut self, key: BlockKey, data: &[u8]) -> anyhow::Result<()> {
        let staging_path = self.staging_path();
        let block_path = self.path.join(block_path(&key)?);

        // If this is the first block its sub-directory, the directory needs to be created.
        if let Some(parent) = block_path.parent() {
            create_dir_all(parent)?;
        }

        // Write to a staging file and then atomically move it to its final destination.
        let mut staging_file = File::create(&staging_path)?;
        staging_file.write_all(data)?;
        staging_file.sync_all()?;
        rename(&staging_path, &block_path)?;

        Ok(())
    }

    fn read_block(&mut self, key: &BlockKey) -> anyhow::Result<Option<Vec<u8>>> {
        let block_path = self.path.join(block_path(key)?);

        let mut file = match File::open(&block_path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let mut buffer = Vec::with_capacity(file.metadata()?.len() as usize);
        file.read_to_end(&mut buffer)?;
        Ok(Some(buffer))
    }

    fn remove_block(&mut self, key: &BlockKey) -> anyhow::Result<()> {
        match remove_file(self.path.join(block_path(key)?)) {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }

    fn list_blocks(&mut self, kind: BlockType) -> anyhow::Result<Vec<BlockKey>> {
        let mut keys = Vec::new();

        match kind {
            BlockType::Pack | BlockType::Index => {
                for directory_entry in read_dir(self.path.join(type_path(kind)))? {
                    for block_entry in read_dir(directory_entry?.path())? {
                        let handle = Self::parse_handle(&block_entry?.file_name())?;
                        keys.push(match kind {
                            BlockType::Pack => BlockKey::Pack(handle),
                            _ => BlockKey::Index(handle),
                        });
                    }
                }
            }
            BlockType::Head => {
                for block_entry in read_dir(self.path.join(type_path(kind)))? {
                    let name = block_entry?
                        .file_name()
                        .into_string()
                        .map_err(|_| anyhow!("Block file name is invalid."))?;
                    keys.push(BlockKey::Head(name));
                }
            }
        }

        Ok(keys)
    }
}
