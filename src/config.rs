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

//! The configuration of a backup client.
//!
//! A [`Config`] is stored as TOML. It names this node, picks the encryption, chunking, and packing
//! parameters, and lists the remotes and remote groups which backups can target.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::HASH_SIZE;
use crate::keystore::{Encryption, ResourceLimit};
use crate::pack::MAX_LEVEL;
use crate::repo::Chunking;

fn default_prefix_length() -> usize {
    1
}

fn default_max_pack_size() -> usize {
    8 * 1024 * 1024
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    8
}

fn default_replication_interval_ms() -> u64 {
    60_000
}

fn default_download_cost() -> u32 {
    1
}

/// How loose objects are grouped into packfiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackConfig {
    /// The number of leading ID bytes shared by every entry in a packfile.
    #[serde(default = "default_prefix_length")]
    pub prefix_length: usize,

    /// The uncompressed size in bytes at which a packfile is closed and a new one started.
    #[serde(default = "default_max_pack_size")]
    pub max_pack_size: usize,

    /// The gzip compression level in the range 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            prefix_length: default_prefix_length(),
            max_pack_size: default_max_pack_size(),
            compression_level: default_compression_level(),
        }
    }
}

/// Retry policy for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// Limits on requests to remotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransferConfig {
    /// How long a single request to one remote may take before it is abandoned.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// The maximum number of concurrent requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often remote groups copy data to members which missed it. Zero turns background
    /// replication off.
    #[serde(default = "default_replication_interval_ms")]
    pub replication_interval_ms: u64,
}

impl TransferConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The interval between background replication passes, or `None` if it is turned off.
    pub fn replication_interval(&self) -> Option<Duration> {
        match self.replication_interval_ms {
            0 => None,
            interval => Some(Duration::from_millis(interval)),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            concurrency: default_concurrency(),
            replication_interval_ms: default_replication_interval_ms(),
        }
    }
}

/// The kind of storage behind a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteKind {
    /// A directory in the local file system, which may be a mounted network share.
    Directory,

    /// Process-local memory, which is lost when the process exits.
    Memory,
}

/// A single remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: RemoteKind,

    /// The directory of a `directory` remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// The relative cost of downloading from this remote. Cheaper remotes are read first.
    #[serde(default = "default_download_cost")]
    pub download_cost: u32,
}

impl RemoteConfig {
    /// A directory remote with the default download cost.
    pub fn directory(name: &str, path: impl Into<PathBuf>) -> Self {
        RemoteConfig {
            name: name.to_owned(),
            kind: RemoteKind::Directory,
            path: Some(path.into()),
            download_cost: default_download_cost(),
        }
    }

    /// A memory remote with the default download cost.
    pub fn memory(name: &str) -> Self {
        RemoteConfig {
            name: name.to_owned(),
            kind: RemoteKind::Memory,
            path: None,
            download_cost: default_download_cost(),
        }
    }
}

/// A named set of remotes which are written to together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupConfig {
    pub name: String,

    /// The names of the member remotes.
    pub members: Vec<String>,

    /// Where to persist the replication ledger. This defaults to `<name>.ledger` in the state
    /// directory. Without either, outstanding replication is only tracked until the process exits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<PathBuf>,
}

/// The configuration of a backup client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The name of this machine, which identifies its chain of versions.
    pub node_name: String,

    /// The directory holding local state, such as the replication ledgers of remote groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// How packfiles and pack indexes are encrypted.
    #[serde(default)]
    pub encryption: Encryption,

    /// The memory limit for deriving the key which seals the keystore.
    #[serde(default)]
    pub memory_limit: ResourceLimit,

    /// The operations limit for deriving the key which seals the keystore.
    #[serde(default)]
    pub operations_limit: ResourceLimit,

    #[serde(default)]
    pub chunking: Chunking,

    #[serde(default)]
    pub pack: PackConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl Config {
    /// Return a config with default settings and no remotes.
    pub fn new(node_name: &str) -> Self {
        Config {
            node_name: node_name.to_owned(),
            state_dir: None,
            encryption: Encryption::default(),
            memory_limit: ResourceLimit::default(),
            operations_limit: ResourceLimit::default(),
            chunking: Chunking::default(),
            pack: PackConfig::default(),
            retry: RetryConfig::default(),
            transfer: TransferConfig::default(),
            remotes: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Parse and validate a config from TOML.
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|error| crate::Error::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|_| crate::Error::Serialize)
    }

    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> crate::Result<Self> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    /// Validate this config and write it to `path`.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        self.validate()?;
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check that this config is internally consistent.
    ///
    /// # Errors
    /// - `Error::Config`: The node name is invalid, two remotes or groups share a name, a group is
    /// empty or names an unknown remote, a directory remote has no path, or a tuning parameter is
    /// out of range.
    pub fn validate(&self) -> crate::Result<()> {
        validate_name("node name", &self.node_name)?;

        let mut names = HashSet::new();
        for remote in &self.remotes {
            validate_name("remote name", &remote.name)?;
            if !names.insert(remote.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "the name '{}' is used more than once",
                    remote.name
                )));
            }
            if remote.kind == RemoteKind::Directory && remote.path.is_none() {
                return Err(crate::Error::Config(format!(
                    "the directory remote '{}' has no path",
                    remote.name
                )));
            }
        }

        for group in &self.groups {
            validate_name("group name", &group.name)?;
            if !names.insert(group.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "the name '{}' is used more than once",
                    group.name
                )));
            }
            if group.members.is_empty() {
                return Err(crate::Error::Config(format!(
                    "the group '{}' has no members",
                    group.name
                )));
            }
            for member in &group.members {
                if self.find_remote(member).is_none() {
                    return Err(crate::Error::Config(format!(
                        "the group '{}' names the unknown remote '{}'",
                        group.name, member
                    )));
                }
            }
        }

        if self.pack.prefix_length > HASH_SIZE {
            return Err(crate::Error::Config(format!(
                "the pack prefix length must be at most {}",
                HASH_SIZE
            )));
        }
        if self.pack.max_pack_size == 0 {
            return Err(crate::Error::Config(
                "the maximum pack size must be positive".into(),
            ));
        }
        if self.pack.compression_level > MAX_LEVEL {
            return Err(crate::Error::Config(format!(
                "the compression level must be at most {}",
                MAX_LEVEL
            )));
        }
        if self.transfer.concurrency == 0 {
            return Err(crate::Error::Config(
                "the transfer concurrency must be positive".into(),
            ));
        }
        self.chunking.validate()?;

        Ok(())
    }

    /// Return the remote with the given `name`.
    pub fn find_remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|remote| remote.name == name)
    }

    /// Return the remote group with the given `name`.
    pub fn find_group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// The file the replication ledger of `group` is persisted to, if any.
    pub fn ledger_path(&self, group: &GroupConfig) -> Option<PathBuf> {
        group.ledger.clone().or_else(|| {
            self.state_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}.ledger", group.name)))
        })
    }
}

/// Names may only contain ASCII letters, digits, hyphens, and underscores.
fn validate_name(what: &str, name: &str) -> crate::Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(crate::Error::Config(format!("the {} '{}' is invalid", what, name)))
    }
}
