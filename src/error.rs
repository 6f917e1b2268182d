/*
 * Copyright 2019 Garrett Powell
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

use std::io;
use std::result;

use thiserror::Error as DeriveError;

use crate::id::ObjectId;

/// The error type for operations on the backup store.
#[derive(Debug, DeriveError)]
pub enum Error {
    /// An encoded metadata object could not be decoded.
    #[error("The object is malformed: {0}.")]
    MalformedObject(&'static str),

    /// A packfile could not be decoded.
    #[error("The packfile is corrupt: {0}.")]
    CorruptPackfile(&'static str),

    /// A resource was not found.
    #[error("A resource was not found.")]
    NotFound,

    /// A remote could not be reached or failed to complete a request.
    ///
    /// This is a transient error; the request may succeed if it is retried.
    #[error("The remote '{remote}' is unavailable: {source}")]
    RemoteUnavailable {
        remote: String,
        #[source]
        source: anyhow::Error,
    },

    /// Data read from a remote failed its integrity check.
    #[error("The data stored on remote '{remote}' is corrupt.")]
    RemoteCorrupt { remote: String },

    /// The provided password was invalid.
    #[error("The provided password was invalid.")]
    WrongPassword,

    /// Two different byte strings hashed to the same ID.
    #[error("Hash collision detected for object {0}.")]
    HashCollision(ObjectId),

    /// Entries passed to the packfile encoder do not share the requested prefix.
    #[error("The packfile entries do not share a common prefix.")]
    InvalidPackPrefix,

    /// Ciphertext could not be decrypted with the provided key.
    #[error("The ciphertext could not be decrypted.")]
    InvalidCiphertext,

    /// A file name stored in a backup is not a valid path component.
    #[error("The provided file path is invalid.")]
    InvalidPath,

    /// The backup root is not a directory.
    #[error("The backup root is not a directory.")]
    InvalidRoot,

    /// No remote or remote group with the given name is configured.
    #[error("There is no remote or remote group named '{0}'.")]
    UnknownTarget(String),

    /// A resource already exists.
    #[error("A resource already exists.")]
    AlreadyExists,

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// This storage format is not supported by this version of the library.
    #[error("This storage format is not supported by this version of the library.")]
    UnsupportedFormat,

    /// A value could not be serialized.
    #[error("A value could not be serialized.")]
    Serialize,

    /// A value could not be deserialized.
    #[error("A value could not be deserialized.")]
    Deserialize,

    /// An operation on a specific object failed.
    #[error("Operation on object {id} failed: {source}")]
    Object {
        id: ObjectId,
        #[source]
        source: Box<Error>,
    },

    /// An I/O error occurred.
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Return whether this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RemoteUnavailable { .. } => true,
            Error::Object { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Return the error with the context of which object it concerns.
    pub(crate) fn for_object(self, id: ObjectId) -> Self {
        match self {
            error @ Error::Object { .. } => error,
            error => Error::Object {
                id,
                source: Box::new(error),
            },
        }
    }

    pub(crate) fn unavailable(remote: &str, source: anyhow::Error) -> Self {
        Error::RemoteUnavailable {
            remote: remote.to_owned(),
            source,
        }
    }
}

/// The result type for operations on the backup store.
pub type Result<T> = result::Result<T, Error>;
