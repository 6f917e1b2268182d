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

use std::path::PathBuf;

use rstest::*;
use spectral::prelude::*;

use bkp_store::config::{Config, GroupConfig, RemoteConfig, RemoteKind};
use bkp_store::keystore::Encryption;
use bkp_store::remote::Remote;
use bkp_store::repo::{Bkp, Chunking};
use bkp_store::Error;
use common::ErrorVariantAssertions;

mod common;

const CONFIG: &str = r#"
node-name = "laptop"
encryption = "xchacha20-poly1305"

[chunking]
method = "fixed"
size = 4096

[pack]
prefix-length = 2
compression-level = 9

[transfer]
request-timeout-ms = 5000

[[remotes]]
name = "home"
type = "directory"
path = "/srv/backup"
download-cost = 2

[[remotes]]
name = "scratch"
type = "memory"

[[groups]]
name = "everywhere"
members = ["home", "scratch"]
"#;

#[fixture]
fn config() -> Config {
    let mut config = Config::new("laptop");
    config.remotes.push(RemoteConfig::memory("a"));
    config.remotes.push(RemoteConfig::memory("b"));
    config
}

#[rstest]
fn config_is_parsed_from_toml() -> anyhow::Result<()> {
    let config = Config::from_toml(CONFIG)?;

    assert_that!(config.node_name.as_str()).is_equal_to("laptop");
    assert_that!(config.encryption).is_equal_to(Encryption::XChaCha20Poly1305);
    assert_that!(config.chunking.clone()).is_equal_to(Chunking::Fixed { size: 4096 });
    assert_that!(config.pack.prefix_length).is_equal_to(2);
    assert_that!(config.pack.compression_level).is_equal_to(9);
    assert_that!(config.transfer.request_timeout_ms).is_equal_to(5000);
    // Unset fields keep their defaults.
    assert_that!(config.transfer.concurrency).is_equal_to(8);

    let home = config.find_remote("home").unwrap();
    assert_that!(home.kind).is_equal_to(RemoteKind::Directory);
    assert_that!(home.path.clone()).is_equal_to(Some(PathBuf::from("/srv/backup")));
    assert_that!(home.download_cost).is_equal_to(2);
    assert_that!(config.find_remote("scratch").unwrap().download_cost).is_equal_to(1);

    let group = config.find_group("everywhere").unwrap();
    assert_that!(group.members.clone()).is_equal_to(vec!["home".to_owned(), "scratch".to_owned()]);
    assert_that!(group.ledger.clone()).is_equal_to(None);
    Ok(())
}

#[rstest]
fn config_survives_toml() -> anyhow::Result<()> {
    let config = Config::from_toml(CONFIG)?;

    assert_that!(Config::from_toml(&config.to_toml()?)?).is_equal_to(config);
    Ok(())
}

#[rstest]
fn config_is_saved_and_loaded() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("bkp.toml");
    let config = Config::from_toml(CONFIG)?;

    config.save(&path)?;

    assert_that!(Config::load(&path)?).is_equal_to(config);
    Ok(())
}

#[rstest]
fn invalid_toml_is_rejected() {
    assert_that!(Config::from_toml("node-name = ")).is_err_variant(Error::Config(String::new()));
    assert_that!(Config::from_toml("encryption = \"none\""))
        .is_err_variant(Error::Config(String::new()));
}

#[rstest]
fn duplicate_names_are_rejected(mut config: Config) {
    config.groups.push(GroupConfig {
        name: "a".into(),
        members: vec!["b".into()],
        ledger: None,
    });

    assert_that!(config.validate()).is_err_variant(Error::Config(String::new()));
}

#[rstest]
fn group_with_unknown_member_is_rejected(mut config: Config) {
    config.groups.push(GroupConfig {
        name: "group".into(),
        members: vec!["a".into(), "c".into()],
        ledger: None,
    });

    assert_that!(config.validate()).is_err_variant(Error::Config(String::new()));
}

#[rstest]
fn empty_group_is_rejected(mut config: Config) {
    config.groups.push(GroupConfig {
        name: "group".into(),
        members: Vec::new(),
        ledger: None,
    });

    assert_that!(config.validate()).is_err_variant(Error::Config(String::new()));
}

#[rstest]
fn out_of_range_parameters_are_rejected(config: Config) {
    let mut long_prefix = config.clone();
    long_prefix.pack.prefix_length = 33;
    let mut empty_chunks = config.clone();
    empty_chunks.chunking = Chunking::Fixed { size: 0 };
    let mut no_concurrency = config;
    no_concurrency.transfer.concurrency = 0;

    for config in [long_prefix, empty_chunks, no_concurrency] {
        assert_that!(config.validate()).is_err_variant(Error::Config(String::new()));
    }
}

#[rstest]
fn directory_remote_without_path_is_rejected(mut config: Config) {
    config.remotes.push(RemoteConfig {
        path: None,
        ..RemoteConfig::directory("disk", "/unused")
    });

    assert_that!(config.validate()).is_err_variant(Error::Config(String::new()));
}

#[rstest]
fn client_opens_every_target() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let mut config = Config::new("laptop");
    config
        .remotes
        .push(RemoteConfig::directory("disk", directory.path()));
    config.remotes.push(RemoteConfig::memory("scratch"));
    config.groups.push(GroupConfig {
        name: "everywhere".into(),
        members: vec!["disk".into(), "scratch".into()],
        ledger: None,
    });

    let bkp = Bkp::open(config)?;

    assert_that!(bkp.target("disk")?.name()).is_equal_to("disk");
    assert_that!(bkp.target("everywhere")?.name()).is_equal_to("everywhere");
    assert_that!(bkp.group("everywhere")?.members().len()).is_equal_to(2);
    assert_that!(bkp.group("disk")).is_err_variant(Error::UnknownTarget(String::new()));
    assert_that!(bkp.target("elsewhere")).is_err_variant(Error::UnknownTarget(String::new()));
    Ok(())
}

#[rstest]
fn targets_can_be_added(config: Config) -> anyhow::Result<()> {
    let mut bkp = Bkp::open(config)?;

    bkp.add_remote(RemoteConfig::memory("c"))?;
    bkp.add_remote_group("group", &["a", "b", "c"])?;

    assert_that!(bkp.group("group")?.members().len()).is_equal_to(3);
    assert!(bkp.config().find_group("group").is_some());
    assert_that!(bkp.config().remotes.len()).is_equal_to(3);
    Ok(())
}

#[rstest]
fn target_names_must_be_unique(config: Config) -> anyhow::Result<()> {
    let mut bkp = Bkp::open(config)?;
    bkp.add_remote_group("group", &["a"])?;

    assert_that!(bkp.add_remote(RemoteConfig::memory("a"))).is_err_variant(Error::AlreadyExists);
    assert_that!(bkp.add_remote(RemoteConfig::memory("group")))
        .is_err_variant(Error::AlreadyExists);
    assert_that!(bkp.add_remote_group("a", &["b"])).is_err_variant(Error::AlreadyExists);
    Ok(())
}

#[rstest]
fn group_members_must_exist(config: Config) -> anyhow::Result<()> {
    let mut bkp = Bkp::open(config)?;

    assert_that!(bkp.add_remote_group("group", &["a", "missing"]))
        .is_err_variant(Error::UnknownTarget(String::new()));
    assert!(bkp.config().groups.is_empty());
    Ok(())
}
