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

use std::fmt::{self, Debug, Formatter};

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{DebugSecret, ExposeSecret, Secret, SecretVec};
use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::aead::xchacha20poly1305_ietf::{
    gen_nonce, open, seal, Key as ChaChaKey, Nonce, KEYBYTES, NONCEBYTES,
};
use sodiumoxide::crypto::pwhash::argon2id13::{
    derive_key, gen_salt, MemLimit, OpsLimit, Salt, MEMLIMIT_INTERACTIVE, MEMLIMIT_MODERATE,
    MEMLIMIT_SENSITIVE, OPSLIMIT_INTERACTIVE, OPSLIMIT_MODERATE, OPSLIMIT_SENSITIVE,
};

use crate::env;

/// A limit on the resources used by a key derivation function.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceLimit {
    /// Suitable for interactive use.
    Interactive,

    /// Suitable for moderately sensitive data.
    Moderate,

    /// Suitable for highly sensitive data.
    Sensitive,
}

impl Default for ResourceLimit {
    fn default() -> Self {
        ResourceLimit::Interactive
    }
}

impl ResourceLimit {
    /// Get a memory limit based on this resource limit.
    fn to_mem_limit(self) -> MemLimit {
        match self {
            ResourceLimit::Interactive => MEMLIMIT_INTERACTIVE,
            ResourceLimit::Moderate => MEMLIMIT_MODERATE,
            ResourceLimit::Sensitive => MEMLIMIT_SENSITIVE,
        }
    }

    /// Get an operations limit based on this resource limit.
    fn to_ops_limit(self) -> OpsLimit {
        match self {
            ResourceLimit::Interactive => OPSLIMIT_INTERACTIVE,
            ResourceLimit::Moderate => OPSLIMIT_MODERATE,
            ResourceLimit::Sensitive => OPSLIMIT_SENSITIVE,
        }
    }
}

/// A data encryption method.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encryption {
    /// Do not encrypt data.
    None,

    /// Encrypt data using the XChaCha20-Poly1305 cipher.
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl Default for Encryption {
    fn default() -> Self {
        Encryption::XChaCha20Poly1305
    }
}

impl Encryption {
    /// Encrypt the given `cleartext` with the given `key`.
    ///
    /// The output is the random nonce followed by the authenticated ciphertext.
    ///
    /// # Errors
    /// - `Error::InvalidCiphertext`: The key is the wrong size for this method.
    pub fn encrypt(&self, cleartext: &[u8], key: &EncryptionKey) -> crate::Result<Vec<u8>> {
        env::init();
        match self {
            Encryption::None => Ok(cleartext.to_vec()),
            Encryption::XChaCha20Poly1305 => {
                let chacha_key = ChaChaKey::from_slice(key.expose_secret())
                    .ok_or(crate::Error::InvalidCiphertext)?;
                let nonce = gen_nonce();
                let mut ciphertext = seal(cleartext, None, &nonce, &chacha_key);
                let mut output = nonce.as_ref().to_vec();
                output.append(&mut ciphertext);
                Ok(output)
            }
        }
    }

    /// Decrypt the given `ciphertext` with the given `key`.
    ///
    /// # Errors
    /// - `Error::InvalidCiphertext`: The ciphertext is truncated, was tampered with, or was
    /// encrypted with a different key.
    pub fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey) -> crate::Result<Vec<u8>> {
        env::init();
        match self {
            Encryption::None => Ok(ciphertext.to_vec()),
            Encryption::XChaCha20Poly1305 => {
                if ciphertext.len() < NONCEBYTES {
                    return Err(crate::Error::InvalidCiphertext);
                }
                let nonce = Nonce::from_slice(&ciphertext[..NONCEBYTES])
                    .ok_or(crate::Error::InvalidCiphertext)?;
                let chacha_key = ChaChaKey::from_slice(key.expose_secret())
                    .ok_or(crate::Error::InvalidCiphertext)?;
                open(&ciphertext[NONCEBYTES..], None, &nonce, &chacha_key)
                    .map_err(|_| crate::Error::InvalidCiphertext)
            }
        }
    }

    /// The key size for this encryption method.
    pub fn key_size(&self) -> usize {
        match self {
            Encryption::None => 0,
            Encryption::XChaCha20Poly1305 => KEYBYTES,
        }
    }
}

/// Salt for deriving an encryption `Key`.
///
/// This type can be serialized to persistently store the salt.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySalt(Vec<u8>);

impl KeySalt {
    /// Generate a new random `KeySalt`.
    pub fn generate() -> Self {
        env::init();
        KeySalt(gen_salt().as_ref().to_vec())
    }
}

/// An secret encryption key.
///
/// The bytes of the key are zeroed in memory when this value is dropped.
pub struct EncryptionKey(SecretVec<u8>);

impl DebugSecret for EncryptionKey {}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Self::debug_secret(f)
    }
}

impl ExposeSecret<Vec<u8>> for EncryptionKey {
    fn expose_secret(&self) -> &Vec<u8> {
        self.0.expose_secret()
    }
}

impl Clone for EncryptionKey {
    fn clone(&self) -> Self {
        EncryptionKey::new(self.expose_secret().clone())
    }
}

impl EncryptionKey {
    /// Create an encryption key containing the given `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        EncryptionKey(Secret::new(bytes))
    }

    /// Generate a new random encryption key of the given `size`.
    ///
    /// This uses bytes retrieved from the operating system's cryptographically secure random number
    /// generator.
    pub fn generate(size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        OsRng.fill_bytes(&mut bytes);
        EncryptionKey::new(bytes)
    }

    /// Derive a new encryption key of the given `size` from the given `password` and `salt`.
    ///
    /// This uses the Argon2id key derivation function.
    ///
    /// # Errors
    /// - `Error::InvalidCiphertext`: The salt is the wrong size or the key could not be derived.
    pub fn derive(
        password: &[u8],
        salt: &KeySalt,
        size: usize,
        memory: ResourceLimit,
        operations: ResourceLimit,
    ) -> crate::Result<Self> {
        env::init();
        let salt = Salt::from_slice(salt.0.as_slice()).ok_or(crate::Error::InvalidCiphertext)?;
        let mut bytes = vec![0u8; size];
        derive_key(
            &mut bytes,
            password,
            &salt,
            operations.to_ops_limit(),
            memory.to_mem_limit(),
        )
        .map_err(|_| crate::Error::InvalidCiphertext)?;
        Ok(EncryptionKey::new(bytes))
    }
}
