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

//! Remotes and remote groups.
//!
//! A [`Remote`] is a single storage endpoint. A [`StoreRemote`] adapts any [`DataStore`] into a
//! remote, adding integrity checks. A [`RemoteGroup`] composes several remotes into one, replicating
//! writes to every member and serving reads from whichever member can answer.
//!
//! [`DataStore`]: crate::store::DataStore

pub use self::group::{GroupOptions, RemoteGroup, Replicator};
pub use self::ledger::{ReplicaItem, ReplicationLedger};
pub use self::remote::Remote;
pub use self::retry::retry;
pub use self::store_remote::StoreRemote;

mod group;
mod ledger;
mod remote;
mod retry;
mod store_remote;
