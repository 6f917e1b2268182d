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

use std::fs;

use spectral::prelude::*;
use tempfile::tempdir;

use bkp_store::store::{BlockKey, BlockType, DataStore, DirectoryConfig, MemoryConfig, OpenStore};
use bkp_store::{Error, PackHandle};
use common::{random_buffer, ErrorVariantAssertions};

mod common;

fn read_block(mut store: impl DataStore) -> anyhow::Result<()> {
    let key = BlockKey::Pack(PackHandle::of(b"pack"));

    assert_eq!(store.read_block(&key)?, None);

    let expected_block = random_buffer();
    store.write_block(key.clone(), expected_block.as_slice())?;

    assert_eq!(store.read_block(&key)?, Some(expected_block));

    Ok(())
}

fn overwrite_block(mut store: impl DataStore) -> anyhow::Result<()> {
    let key = BlockKey::Keystore;

    store.write_block(key.clone(), b"first")?;
    store.write_block(key.clone(), b"second")?;

    assert_eq!(store.read_block(&key)?, Some(b"second".to_vec()));

    Ok(())
}

fn remove_block(mut store: impl DataStore) -> anyhow::Result<()> {
    let key = BlockKey::Head(String::from("laptop"));

    store.write_block(key.clone(), b"head")?;
    store.remove_block(&key)?;
    // Removing a missing block is not an error.
    store.remove_block(&key)?;

    assert_eq!(store.read_block(&key)?, None);

    Ok(())
}

fn list_blocks(mut store: impl DataStore) -> anyhow::Result<()> {
    let packs = vec![
        BlockKey::Pack(PackHandle::of(b"1")),
        BlockKey::Pack(PackHandle::of(b"2")),
        BlockKey::Pack(PackHandle::of(b"3")),
    ];
    let index = BlockKey::Index(PackHandle::of(b"1"));
    let head = BlockKey::Head(String::from("laptop"));

    for key in packs.iter().chain([&index, &head]) {
        store.write_block(key.clone(), b"block")?;
    }
    store.write_block(BlockKey::Keystore, b"keystore")?;

    let mut actual_packs = store.list_blocks(BlockType::Pack)?;
    actual_packs.sort_by_key(|key| format!("{:?}", key));
    let mut expected_packs = packs;
    expected_packs.sort_by_key(|key| format!("{:?}", key));

    assert_eq!(actual_packs, expected_packs);
    assert_eq!(store.list_blocks(BlockType::Index)?, vec![index]);
    assert_eq!(store.list_blocks(BlockType::Head)?, vec![head]);

    Ok(())
}

#[test]
fn memory_read_block() -> anyhow::Result<()> {
    read_block(MemoryConfig::new().open()?)
}

#[test]
fn memory_overwrite_block() -> anyhow::Result<()> {
    overwrite_block(MemoryConfig::new().open()?)
}

#[test]
fn memory_remove_block() -> anyhow::Result<()> {
    remove_block(MemoryConfig::new().open()?)
}

#[test]
fn memory_list_blocks() -> anyhow::Result<()> {
    list_blocks(MemoryConfig::new().open()?)
}

#[test]
fn memory_stores_from_one_config_share_blocks() -> anyhow::Result<()> {
    let config = MemoryConfig::new();
    let mut first = config.open()?;
    let mut second = config.open()?;

    first.write_block(BlockKey::Keystore, b"shared")?;

    assert_eq!(second.read_block(&BlockKey::Keystore)?, Some(b"shared".to_vec()));
    Ok(())
}

#[test]
fn directory_read_block() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    read_block(DirectoryConfig { path: temp_dir.path().join("store") }.open()?)
}

#[test]
fn directory_overwrite_block() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    overwrite_block(DirectoryConfig { path: temp_dir.path().join("store") }.open()?)
}

#[test]
fn directory_remove_block() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    remove_block(DirectoryConfig { path: temp_dir.path().join("store") }.open()?)
}

#[test]
fn directory_list_blocks() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    list_blocks(DirectoryConfig { path: temp_dir.path().join("store") }.open()?)
}

#[test]
fn directory_store_persists_across_opens() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = DirectoryConfig {
        path: temp_dir.path().join("store"),
    };

    config.open()?.write_block(BlockKey::Keystore, b"persisted")?;

    assert_eq!(
        config.open()?.read_block(&BlockKey::Keystore)?,
        Some(b"persisted".to_vec())
    );
    Ok(())
}

#[test]
fn directory_with_other_format_is_unsupported() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = DirectoryConfig {
        path: temp_dir.path().join("store"),
    };
    config.open()?;
    fs::write(config.path.join("version"), "some other format")?;

    assert_that!(config.open()).is_err_variant(Error::UnsupportedFormat);
    Ok(())
}

#[test]
fn directory_rejects_head_names_with_separators() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let mut store = DirectoryConfig {
        path: temp_dir.path().join("store"),
    }
    .open()?;

    assert!(store
        .write_block(BlockKey::Head(String::from("../escape")), b"head")
        .is_err());
    Ok(())
}
