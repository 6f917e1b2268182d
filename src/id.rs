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

#![macro_use]

use sha2::{Digest, Sha256};

/// The size in bytes of every hash-derived identifier.
pub const HASH_SIZE: usize = 32;

/// Return the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&Sha256::digest(data));
    digest
}

macro_rules! hash_type {
    {
        $(#[$meta:meta])*
        $name:ident
    } => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name([u8; crate::id::HASH_SIZE]);

        impl $name {
            /// Construct a new instance which wraps the given digest `bytes`.
            pub const fn from_bytes(bytes: [u8; crate::id::HASH_SIZE]) -> Self {
                $name(bytes)
            }

            /// Return the identifier of the given `data`, which is its SHA-256 digest.
            pub fn of(data: &[u8]) -> Self {
                $name(crate::id::sha256(data))
            }

            /// Construct an instance from a slice, which must be exactly 32 bytes long.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let mut array = [0u8; crate::id::HASH_SIZE];
                if bytes.len() != array.len() {
                    return None;
                }
                array.copy_from_slice(bytes);
                Some($name(array))
            }

            /// Parse an identifier from its lowercase hexadecimal form.
            pub fn from_hex(hex_str: &str) -> Option<Self> {
                let mut array = [0u8; crate::id::HASH_SIZE];
                hex::decode_to_slice(hex_str, &mut array).ok()?;
                Some($name(array))
            }

            /// Return the raw digest bytes.
            pub fn as_bytes(&self) -> &[u8; crate::id::HASH_SIZE] {
                &self.0
            }

            /// Return the identifier as a lowercase hexadecimal string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

hash_type! {
    /// The identity of a metadata object or chunk.
    ///
    /// This is the SHA-256 digest of the object's canonical encoded bytes, so two objects with the
    /// same bytes always have the same ID.
    ObjectId
}

hash_type! {
    /// The handle of a packfile stored on a remote.
    ///
    /// This is the SHA-256 digest of the packfile bytes exactly as they are stored, so writing the
    /// same packfile twice always produces the same handle.
    PackHandle
}

impl ObjectId {
    /// The reserved all-zero ID, which encodes the absence of a parent version.
    pub const ZERO: ObjectId = ObjectId([0u8; HASH_SIZE]);

    /// Return whether this is the reserved all-zero ID.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}
