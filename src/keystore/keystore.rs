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

use std::collections::{BTreeMap, HashMap};

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::remote::Remote;

use super::encryption::{Encryption, EncryptionKey, KeySalt, ResourceLimit};

/// The name of the key which encrypts packfiles and pack indexes.
pub const DATA_KEY: &str = "data";

/// The current version of the sealed keystore format.
const CURRENT_FORMAT: u32 = 1;

/// The cipher which seals every keystore, regardless of how data is encrypted.
const SEAL_ENCRYPTION: Encryption = Encryption::XChaCha20Poly1305;

/// The set of named symmetric keys needed to decrypt a backup.
#[derive(Debug, Clone, Default)]
pub struct Keystore {
    keys: HashMap<String, EncryptionKey>,
}

impl Keystore {
    /// Return a new empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new keystore containing a freshly generated data key.
    pub fn generate() -> Self {
        let mut keystore = Self::new();
        keystore.insert(
            DATA_KEY,
            EncryptionKey::generate(SEAL_ENCRYPTION.key_size()),
        );
        keystore
    }

    /// Add the given `key` under `name`, replacing any existing key with that name.
    pub fn insert(&mut self, name: &str, key: EncryptionKey) -> Option<EncryptionKey> {
        self.keys.insert(name.to_owned(), key)
    }

    /// Return the key with the given `name`.
    pub fn get(&self, name: &str) -> Option<&EncryptionKey> {
        self.keys.get(name)
    }

    /// Return the key which encrypts packfiles and pack indexes.
    ///
    /// # Errors
    /// - `Error::NotFound`: This keystore has no data key.
    pub fn data_key(&self) -> crate::Result<&EncryptionKey> {
        self.get(DATA_KEY).ok_or(crate::Error::NotFound)
    }

    /// The names of the keys in this keystore.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// The number of keys in this keystore.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether this keystore has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        // A sorted map keeps the plaintext identical no matter the hash map's iteration order.
        let record: BTreeMap<&str, &[u8]> = self
            .keys
            .iter()
            .map(|(name, key)| (name.as_str(), key.expose_secret().as_slice()))
            .collect();
        rmp_serde::to_vec(&record).map_err(|_| crate::Error::Serialize)
    }

    fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let record: BTreeMap<String, Vec<u8>> =
            rmp_serde::from_slice(data).map_err(|_| crate::Error::Deserialize)?;
        Ok(Keystore {
            keys: record
                .into_iter()
                .map(|(name, bytes)| (name, EncryptionKey::new(bytes)))
                .collect(),
        })
    }
}

/// The serialized form of a keystore sealed under a master password.
#[derive(Debug, Serialize, Deserialize)]
struct SealedKeystore {
    format: u32,
    salt: KeySalt,
    memory: ResourceLimit,
    operations: ResourceLimit,
    ciphertext: Vec<u8>,
}

/// Seals keystores under a master password and distributes them to remotes.
///
/// A sealed keystore embeds its salt and key derivation limits, so it can be unsealed with only the
/// master password no matter which limits this manager was configured with.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeystoreManager {
    memory: ResourceLimit,
    operations: ResourceLimit,
}

impl KeystoreManager {
    /// Return a manager which derives keys using the given resource limits.
    pub fn new(memory: ResourceLimit, operations: ResourceLimit) -> Self {
        KeystoreManager { memory, operations }
    }

    /// Derive the key which seals a keystore from the master `password` and `salt`.
    pub fn derive_key(&self, password: &[u8], salt: &KeySalt) -> crate::Result<EncryptionKey> {
        EncryptionKey::derive(
            password,
            salt,
            SEAL_ENCRYPTION.key_size(),
            self.memory,
            self.operations,
        )
    }

    /// Serialize `keystore` and encrypt it under a key derived from `password`.
    pub fn seal(&self, keystore: &Keystore, password: &[u8]) -> crate::Result<Vec<u8>> {
        let salt = KeySalt::generate();
        let key = self.derive_key(password, &salt)?;
        let sealed = SealedKeystore {
            format: CURRENT_FORMAT,
            ciphertext: SEAL_ENCRYPTION.encrypt(&keystore.to_bytes()?, &key)?,
            salt,
            memory: self.memory,
            operations: self.operations,
        };
        rmp_serde::to_vec(&sealed).map_err(|_| crate::Error::Serialize)
    }

    /// Decrypt a keystore sealed with [`seal`].
    ///
    /// # Errors
    /// - `Error::WrongPassword`: The password does not match the one the keystore was sealed with.
    /// - `Error::UnsupportedFormat`: The keystore was sealed by an incompatible version.
    /// - `Error::Deserialize`: The blob is not a sealed keystore.
    ///
    /// [`seal`]: crate::keystore::KeystoreManager::seal
    pub fn unseal(&self, blob: &[u8], password: &[u8]) -> crate::Result<Keystore> {
        let sealed: SealedKeystore =
            rmp_serde::from_slice(blob).map_err(|_| crate::Error::Deserialize)?;
        if sealed.format != CURRENT_FORMAT {
            return Err(crate::Error::UnsupportedFormat);
        }

        let key = EncryptionKey::derive(
            password,
            &sealed.salt,
            SEAL_ENCRYPTION.key_size(),
            sealed.memory,
            sealed.operations,
        )?;
        let plaintext = SEAL_ENCRYPTION
            .decrypt(&sealed.ciphertext, &key)
            .map_err(|_| crate::Error::WrongPassword)?;
        Keystore::from_bytes(&plaintext)
    }

    /// Seal `keystore` and store it on `remote`.
    ///
    /// Publishing to a remote group stores the same sealed bytes on every member.
    pub fn publish(
        &self,
        remote: &dyn Remote,
        keystore: &Keystore,
        password: &[u8],
    ) -> crate::Result<()> {
        let blob = self.seal(keystore, password)?;
        remote.put_keystore(&blob)?;
        tracing::info!(remote = remote.name(), "published keystore");
        Ok(())
    }

    /// Fetch the sealed keystore from `remote` and unseal it.
    ///
    /// # Errors
    /// - `Error::NotFound`: The remote never received a keystore.
    /// - `Error::WrongPassword`: The password is wrong.
    pub fn recover(&self, remote: &dyn Remote, password: &[u8]) -> crate::Result<Keystore> {
        let blob = remote.get_keystore()?;
        let keystore = self.unseal(&blob, password)?;
        tracing::info!(remote = remote.name(), "recovered keystore");
        Ok(keystore)
    }
}
