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

//! Encryption and the keystore which holds the keys for a backup.
//!
//! The [`Keystore`] is sealed under a key derived from the master password and a copy is stored on
//! every remote, so it can be recovered from any single remote with only the password.

pub use self::encryption::{Encryption, EncryptionKey, KeySalt, ResourceLimit};
pub use self::keystore::{Keystore, KeystoreManager, DATA_KEY};

mod encryption;
mod keystore;
