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

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use crate::cas::ContentStore;
use crate::config::{Config, GroupConfig, RemoteConfig, RemoteKind};
use crate::keystore::{Keystore, KeystoreManager};
use crate::remote::{GroupOptions, Remote, RemoteGroup, Replicator, StoreRemote};
use crate::store::{DirectoryConfig, MemoryConfig};

use super::repository::Repository;

/// A backup client.
///
/// This holds the configured remotes and remote groups, which are both called targets. Any
/// target can hold a keystore and the repositories of any number of nodes.
///
/// Each remote group copies data to members which missed it in the background for as long as the
/// client is open. Data still outstanding when the client is dropped stays in the group's ledger
/// and is copied the next time the client is opened, as long as the ledger is persisted.
#[derive(Debug)]
pub struct Bkp {
    config: Config,
    remotes: HashMap<String, Arc<dyn Remote>>,
    groups: HashMap<String, Arc<RemoteGroup>>,
    replicators: HashMap<String, Replicator>,
}

impl Bkp {
    /// Open every remote and remote group named in `config`.
    ///
    /// # Errors
    /// - `Error::Config`: The config is invalid.
    /// - `Error::UnsupportedFormat`: A directory remote holds an unsupported format.
    /// - `Error::Io`: An I/O error occurred opening a remote.
    pub fn open(config: Config) -> crate::Result<Self> {
        config.validate()?;

        let mut bkp = Bkp {
            config: Config {
                remotes: Vec::new(),
                groups: Vec::new(),
                ..config.clone()
            },
            remotes: HashMap::new(),
            groups: HashMap::new(),
            replicators: HashMap::new(),
        };

        for remote in config.remotes {
            bkp.add_remote(remote)?;
        }
        for group in config.groups {
            bkp.insert_group(group)?;
        }

        Ok(bkp)
    }

    /// The current config, including every remote and group added since opening.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add a new remote.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: There is already a remote or group with the same name.
    /// - `Error::Config`: The remote config is invalid.
    pub fn add_remote(&mut self, config: RemoteConfig) -> crate::Result<()> {
        self.check_unused(&config.name)?;
        self.validated(|candidate| candidate.remotes.push(config.clone()))?;

        let remote = match config.kind {
            RemoteKind::Directory => {
                let path = config.path.clone().ok_or_else(|| {
                    crate::Error::Config(format!(
                        "the directory remote '{}' has no path",
                        config.name
                    ))
                })?;
                StoreRemote::open(&config.name, &DirectoryConfig { path })?
            }
            RemoteKind::Memory => StoreRemote::open(&config.name, &MemoryConfig::new())?,
        }
        .with_download_cost(config.download_cost);

        tracing::debug!(remote = %config.name, kind = ?config.kind, "added remote");
        self.remotes.insert(config.name.clone(), Arc::new(remote));
        self.config.remotes.push(config);
        Ok(())
    }

    /// Add a new remote group named `name` over the existing remotes named in `members`.
    ///
    /// The group's replication ledger is persisted in the state directory, if there is one.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: There is already a remote or group with the same name.
    /// - `Error::UnknownTarget`: A member is not an existing remote.
    /// - `Error::Config`: The group has no members or its name is invalid.
    pub fn add_remote_group(&mut self, name: &str, members: &[&str]) -> crate::Result<()> {
        self.insert_group(GroupConfig {
            name: name.to_owned(),
            members: members.iter().map(|member| (*member).to_owned()).collect(),
            ledger: None,
        })
    }

    fn insert_group(&mut self, config: GroupConfig) -> crate::Result<()> {
        self.check_unused(&config.name)?;
        if let Some(unknown) = config
            .members
            .iter()
            .find(|member| !self.remotes.contains_key(member.as_str()))
        {
            return Err(crate::Error::UnknownTarget(unknown.clone()));
        }
        self.validated(|candidate| candidate.groups.push(config.clone()))?;

        let members = config
            .members
            .iter()
            .map(|member| Arc::clone(&self.remotes[member.as_str()]))
            .collect();
        let ledger_path = self.config.ledger_path(&config);
        if let Some(parent) = ledger_path.as_deref().and_then(|path| path.parent()) {
            fs::create_dir_all(parent)?;
        }
        let options = GroupOptions {
            retry: self.config.retry.clone(),
            request_timeout: self.config.transfer.request_timeout(),
            io_threads: self.config.transfer.concurrency,
            ledger_path,
        };
        let group = Arc::new(RemoteGroup::new(&config.name, members, options)?);

        if let Some(interval) = self.config.transfer.replication_interval() {
            let replicator = group.start_replication(interval)?;
            self.replicators.insert(config.name.clone(), replicator);
        }

        tracing::debug!(group = %config.name, members = ?config.members, "added remote group");
        self.groups.insert(config.name.clone(), group);
        self.config.groups.push(config);
        Ok(())
    }

    fn check_unused(&self, name: &str) -> crate::Result<()> {
        if self.remotes.contains_key(name) || self.groups.contains_key(name) {
            Err(crate::Error::AlreadyExists)
        } else {
            Ok(())
        }
    }

    /// Validate the config which results from applying `change` to the current config.
    fn validated(&self, change: impl FnOnce(&mut Config)) -> crate::Result<()> {
        let mut candidate = self.config.clone();
        change(&mut candidate);
        candidate.validate()
    }

    /// Return the remote or remote group named `name`.
    ///
    /// # Errors
    /// - `Error::UnknownTarget`: There is no remote or group named `name`.
    pub fn target(&self, name: &str) -> crate::Result<Arc<dyn Remote>> {
        if let Some(group) = self.groups.get(name) {
            return Ok(Arc::clone(group) as Arc<dyn Remote>);
        }
        self.remotes
            .get(name)
            .cloned()
            .ok_or_else(|| crate::Error::UnknownTarget(name.to_owned()))
    }

    /// Return the remote group named `name`.
    ///
    /// # Errors
    /// - `Error::UnknownTarget`: There is no group named `name`.
    pub fn group(&self, name: &str) -> crate::Result<Arc<RemoteGroup>> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| crate::Error::UnknownTarget(name.to_owned()))
    }

    fn keystore_manager(&self) -> KeystoreManager {
        KeystoreManager::new(self.config.memory_limit, self.config.operations_limit)
    }

    /// Generate a new keystore, seal it with `password`, and publish it to `target`.
    ///
    /// Publishing to a group stores the keystore on every member, so it can later be recovered
    /// from any one of them.
    pub fn init_keystore(&self, target: &str, password: &[u8]) -> crate::Result<Keystore> {
        let keystore = Keystore::generate();
        self.keystore_manager()
            .publish(self.target(target)?.as_ref(), &keystore, password)?;
        Ok(keystore)
    }

    /// Recover the keystore stored on the remote or group named `remote_ref`.
    ///
    /// # Errors
    /// - `Error::UnknownTarget`: There is no remote or group named `remote_ref`.
    /// - `Error::NotFound`: No keystore was ever published to it.
    /// - `Error::WrongPassword`: The password is wrong.
    pub fn recover_keystore(&self, remote_ref: &str, password: &[u8]) -> crate::Result<Keystore> {
        self.keystore_manager()
            .recover(self.target(remote_ref)?.as_ref(), password)
    }

    /// Open the repository of this node on `target`, using the keys in `keystore`.
    pub fn repository(&self, target: &str, keystore: &Keystore) -> crate::Result<Repository> {
        let store = ContentStore::new(
            self.target(target)?,
            self.config.encryption,
            keystore.data_key()?.clone(),
            self.config.pack.clone(),
            self.config.transfer.concurrency,
        )?;
        Repository::open(store, &self.config.node_name, self.config.chunking.clone())
    }
}
