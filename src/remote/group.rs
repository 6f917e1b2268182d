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

use std::collections::BTreeSet;
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::RetryConfig;
use crate::id::{ObjectId, PackHandle};

use super::ledger::{ReplicaItem, ReplicationLedger};
use super::remote::Remote;
use super::retry::retry;

/// Tuning for a [`RemoteGroup`].
///
/// [`RemoteGroup`]: crate::remote::RemoteGroup
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// How operations which failed on every member are retried.
    pub retry: RetryConfig,

    /// How long one request to one member may take before it is treated as unavailable.
    pub request_timeout: Duration,

    /// The number of threads which run requests to members.
    pub io_threads: usize,

    /// Where to persist the replication ledger.
    pub ledger_path: Option<PathBuf>,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            io_threads: 8,
            ledger_path: None,
        }
    }
}

type Operation<T> = Arc<dyn Fn(&dyn Remote) -> crate::Result<T> + Send + Sync>;

/// A set of remotes which are written to together and read from interchangeably.
///
/// A write is sent to every member at once and succeeds as soon as one member has stored it.
/// Members which missed a write are tracked in a [`ReplicationLedger`] and brought up to date by
/// [`reconcile`], so that once replication converges any single member can serve a full restore.
///
/// A read is answered by one member. Members are tried cheapest first, with members of equal cost
/// taking turns, and a member which is unavailable, is missing the data, or holds corrupt data is
/// skipped in favor of the next one.
///
/// Every request to a member runs on the group's I/O pool and has its own timeout, so one slow
/// member never blocks a request to another.
///
/// [`ReplicationLedger`]: crate::remote::ReplicationLedger
/// [`reconcile`]: crate::remote::RemoteGroup::reconcile
pub struct RemoteGroup {
    name: String,
    members: Vec<Arc<dyn Remote>>,
    options: GroupOptions,
    pool: ThreadPool,
    ledger: ReplicationLedger,
    cursor: AtomicUsize,
}

impl Debug for RemoteGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteGroup")
            .field("name", &self.name)
            .field("members", &self.member_names())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RemoteGroup {
    /// Return a group named `name` over the given `members`.
    ///
    /// # Errors
    /// - `Error::Config`: There are no members, or the I/O pool could not be created.
    /// - `Error::Deserialize`: The persisted ledger is corrupt.
    pub fn new(
        name: &str,
        members: Vec<Arc<dyn Remote>>,
        options: GroupOptions,
    ) -> crate::Result<Self> {
        if members.is_empty() {
            return Err(crate::Error::Config(format!(
                "the group '{}' has no members",
                name
            )));
        }

        let group_name = name.to_owned();
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.io_threads.max(1))
            .thread_name(move |index| format!("{}-io-{}", group_name, index))
            .build()
            .map_err(|error| {
                crate::Error::Config(format!("failed to create the I/O pool: {}", error))
            })?;

        let ledger = match &options.ledger_path {
            Some(path) => ReplicationLedger::open(path.clone())?,
            None => ReplicationLedger::new(),
        };

        Ok(RemoteGroup {
            name: name.to_owned(),
            members,
            options,
            pool,
            ledger,
            cursor: AtomicUsize::new(0),
        })
    }

    /// The members of this group.
    pub fn members(&self) -> &[Arc<dyn Remote>] {
        &self.members
    }

    /// The ledger of which members hold which items.
    pub fn ledger(&self) -> &ReplicationLedger {
        &self.ledger
    }

    fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.name()).collect()
    }

    /// Run `op` against each of `targets` concurrently and return the results in the same order.
    ///
    /// A member which does not answer before the request timeout is reported as unavailable. Its
    /// request is abandoned rather than cancelled; its result is discarded when it arrives.
    fn dispatch<T: Send + 'static>(
        &self,
        targets: &[Arc<dyn Remote>],
        op: &Operation<T>,
    ) -> Vec<crate::Result<T>> {
        let (sender, receiver) = unbounded();

        for (index, member) in targets.iter().enumerate() {
            let sender = sender.clone();
            let member = Arc::clone(member);
            let op = Arc::clone(op);
            self.pool.spawn(move || {
                let result = op(member.as_ref());
                // The receiver is gone if the request timed out.
                let _ = sender.send((index, result));
            });
        }
        drop(sender);

        let deadline = Instant::now() + self.options.request_timeout;
        let mut results: Vec<Option<crate::Result<T>>> = targets.iter().map(|_| None).collect();
        for _ in 0..targets.len() {
            match receiver.recv_deadline(deadline) {
                Ok((index, result)) => results[index] = Some(result),
                Err(_) => break,
            }
        }

        targets
            .iter()
            .zip(results)
            .map(|(member, result)| {
                result.unwrap_or_else(|| {
                    Err(crate::Error::unavailable(
                        member.name(),
                        anyhow!(
                            "request timed out after {}ms",
                            self.options.request_timeout.as_millis()
                        ),
                    ))
                })
            })
            .collect()
    }

    /// Run `op` against one member with the request timeout.
    fn request<T: Send + 'static>(
        &self,
        member: &Arc<dyn Remote>,
        op: &Operation<T>,
    ) -> crate::Result<T> {
        self.dispatch(std::slice::from_ref(member), op)
            .pop()
            .unwrap_or(Err(crate::Error::NotFound))
    }

    /// The order in which members are tried for a read of `item`.
    ///
    /// Members are sorted by download cost, and members of equal cost are rotated on each call so
    /// reads are spread across them. While some member is missing the latest write of a mutable
    /// item, only members which confirmed that write are used.
    fn read_order(&self, item: Option<&ReplicaItem>) -> Vec<Arc<dyn Remote>> {
        let mut members = self.members.clone();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % members.len();
        members.rotate_left(start);
        members.sort_by_key(|member| member.download_cost());

        if let Some(item) = item.filter(|item| item.is_mutable()) {
            if let Some(confirmed) = self.ledger.confirmations(item) {
                members.retain(|member| confirmed.contains(member.name()));
            }
        }

        members
    }

    /// Whether a member in the read order for `item` not having it means it doesn't exist.
    ///
    /// This holds only while the ledger tracks a pending write of a mutable item, since then only
    /// members which confirmed that write are asked. Without an entry, a member may have missed a
    /// write this ledger never saw, so the read fails over as it would for a packfile.
    fn is_authoritative(&self, item: Option<&ReplicaItem>) -> bool {
        item.filter(|item| item.is_mutable())
            .map_or(false, |item| self.ledger.confirmations(item).is_some())
    }

    /// Read from one member after another until one answers.
    fn read<T: Send + 'static>(
        &self,
        op_name: &str,
        item: Option<&ReplicaItem>,
        op: Operation<T>,
    ) -> crate::Result<T> {
        retry(&self.options.retry, op_name, &self.name, || {
            let authoritative = self.is_authoritative(item);
            let mut transient = None;
            let mut corrupt = None;

            for member in self.read_order(item) {
                match self.request(&member, &op) {
                    Ok(value) => return Ok(value),
                    Err(crate::Error::NotFound) if authoritative => {
                        return Err(crate::Error::NotFound)
                    }
                    Err(crate::Error::NotFound) => {}
                    Err(error @ crate::Error::RemoteCorrupt { .. }) => {
                        tracing::warn!(
                            group = %self.name,
                            member = member.name(),
                            "{op_name}: member holds corrupt data, trying the next member"
                        );
                        corrupt = Some(error);
                    }
                    Err(error) if error.is_transient() => {
                        tracing::warn!(
                            group = %self.name,
                            member = member.name(),
                            "{op_name}: member failed, trying the next member: {error}"
                        );
                        transient = Some(error);
                    }
                    Err(error) => return Err(error),
                }
            }

            // A transient failure means some member might still have the data, so it is preferred
            // so that the whole read is retried. For a head this keeps a backup from starting a
            // new chain while the member holding the current one is unreachable.
            Err(transient.or(corrupt).unwrap_or(crate::Error::NotFound))
        })
    }

    /// Write `item` to every member, succeeding once at least one member has stored it.
    fn replicate(&self, item: ReplicaItem, data: Arc<[u8]>) -> crate::Result<()> {
        let op: Operation<()> = {
            let item = item.clone();
            Arc::new(move |remote: &dyn Remote| item.store(remote, &data))
        };
        let names = self.member_names();

        retry(&self.options.retry, "write", &self.name, || {
            let results = self.dispatch(&self.members, &op);
            let mut confirmed = Vec::new();
            let mut errors = Vec::new();

            for (member, result) in self.members.iter().zip(results) {
                match result {
                    Ok(()) => confirmed.push(member.name()),
                    Err(error) => {
                        tracing::warn!(
                            group = %self.name,
                            member = member.name(),
                            ?item,
                            "write failed, replication is pending: {error}"
                        );
                        errors.push(error);
                    }
                }
            }

            if confirmed.is_empty() {
                let position = errors.iter().position(crate::Error::is_transient).unwrap_or(0);
                return Err(errors.swap_remove(position));
            }

            self.ledger.record(&item, confirmed, &names);
            Ok(())
        })?;

        self.ledger.save()
    }

    /// Copy every item which some member is missing from a member which holds it.
    ///
    /// This returns the number of copies made. Items which cannot be copied now stay pending.
    pub fn reconcile(&self) -> crate::Result<usize> {
        let names = self.member_names();
        let mut copies = 0;

        for (item, confirmed) in self.ledger.pending() {
            let (sources, targets): (Vec<_>, Vec<_>) = self
                .members
                .iter()
                .cloned()
                .partition(|member| confirmed.contains(member.name()));

            let fetch: Operation<Vec<u8>> = {
                let item = item.clone();
                Arc::new(move |remote: &dyn Remote| item.fetch(remote))
            };
            let data = match sources
                .iter()
                .find_map(|source| self.request(source, &fetch).ok())
            {
                Some(data) => Arc::<[u8]>::from(data),
                None => {
                    tracing::warn!(group = %self.name, ?item, "no member can supply pending item");
                    continue;
                }
            };

            let store: Operation<()> = {
                let item = item.clone();
                Arc::new(move |remote: &dyn Remote| item.store(remote, &data))
            };
            for (target, result) in targets.iter().zip(self.dispatch(&targets, &store)) {
                match result {
                    Ok(()) => {
                        self.ledger.confirm(&item, target.name(), &names);
                        copies += 1;
                    }
                    Err(error) => tracing::warn!(
                        group = %self.name,
                        member = target.name(),
                        ?item,
                        "replication failed: {error}"
                    ),
                }
            }
        }

        self.ledger.save()?;
        if copies > 0 {
            tracing::info!(group = %self.name, copies, "reconciled members");
        }
        Ok(copies)
    }

    /// Rebuild replication obligations by comparing what each member holds.
    ///
    /// This finds packfiles, pack indexes, and keystores which some member holds and another lacks,
    /// for example after a member was added to the group or restored from an old copy. Heads are
    /// not compared, since which head is current cannot be told from the members alone.
    ///
    /// This returns the number of items which some member is missing.
    pub fn resync(&self) -> crate::Result<usize> {
        let names = self.member_names();

        let list: Operation<Vec<PackHandle>> = Arc::new(|remote: &dyn Remote| remote.list());
        let listings = self
            .dispatch(&self.members, &list)
            .into_iter()
            .collect::<crate::Result<Vec<_>>>()?;

        let all_handles: BTreeSet<PackHandle> = listings.iter().flatten().copied().collect();
        for handle in all_handles {
            let holders = self
                .members
                .iter()
                .zip(&listings)
                .filter(|(_, listing)| listing.contains(&handle))
                .map(|(member, _)| member.name());
            self.ledger
                .record(&ReplicaItem::Pack(handle), holders, &names);

            let index = ReplicaItem::Index(handle);
            self.probe(&index, &names)?;
        }

        self.probe(&ReplicaItem::Keystore, &names)?;
        self.ledger.save()?;
        Ok(self.ledger.len())
    }

    /// Ask every member whether it holds `item` and record the answer.
    fn probe(&self, item: &ReplicaItem, names: &[&str]) -> crate::Result<()> {
        let fetch: Operation<Vec<u8>> = {
            let item = item.clone();
            Arc::new(move |remote: &dyn Remote| item.fetch(remote))
        };

        let mut holders = Vec::new();
        let mut missing = false;
        for (member, result) in self.members.iter().zip(self.dispatch(&self.members, &fetch)) {
            match result {
                Ok(_) => holders.push(member.name()),
                Err(crate::Error::NotFound) | Err(crate::Error::RemoteCorrupt { .. }) => {
                    missing = true
                }
                Err(error) => return Err(error),
            }
        }

        if missing && !holders.is_empty() {
            self.ledger.record(item, holders, names);
        }
        Ok(())
    }

    /// Run [`reconcile`] every `interval` on a background thread.
    ///
    /// Replication stops when the returned [`Replicator`] is stopped or dropped.
    ///
    /// [`reconcile`]: crate::remote::RemoteGroup::reconcile
    /// [`Replicator`]: crate::remote::Replicator
    pub fn start_replication(self: &Arc<Self>, interval: Duration) -> crate::Result<Replicator> {
        let (stop, stopped) = bounded::<()>(0);
        let group = Arc::clone(self);

        let handle = thread::Builder::new()
            .name(format!("{}-replicator", self.name))
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(error) = group.reconcile() {
                            tracing::warn!(group = %group.name, "background replication failed: {error}");
                        }
                    }
                    _ => break,
                }
            })?;

        Ok(Replicator {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Remote for RemoteGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn download_cost(&self) -> u32 {
        self.members
            .iter()
            .map(|member| member.download_cost())
            .min()
            .unwrap_or(1)
    }

    fn put_packfile(&self, data: &[u8]) -> crate::Result<PackHandle> {
        let handle = PackHandle::of(data);
        self.replicate(ReplicaItem::Pack(handle), Arc::from(data))?;
        Ok(handle)
    }

    fn get_packfile(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        let handle = *handle;
        self.read(
            "get_packfile",
            Some(&ReplicaItem::Pack(handle)),
            Arc::new(move |remote: &dyn Remote| remote.get_packfile(&handle)),
        )
    }

    fn list(&self) -> crate::Result<Vec<PackHandle>> {
        let op: Operation<Vec<PackHandle>> = Arc::new(|remote: &dyn Remote| remote.list());
        retry(&self.options.retry, "list", &self.name, || {
            let mut handles = BTreeSet::new();
            let mut last_error = None;
            let mut answered = false;

            for (member, result) in self.members.iter().zip(self.dispatch(&self.members, &op)) {
                match result {
                    Ok(listing) => {
                        answered = true;
                        handles.extend(listing);
                    }
                    Err(error) => {
                        tracing::warn!(
                            group = %self.name,
                            member = member.name(),
                            "list failed, the listing may be incomplete: {error}"
                        );
                        last_error = Some(error);
                    }
                }
            }

            match last_error {
                Some(error) if !answered => Err(error),
                _ => Ok(handles.into_iter().collect()),
            }
        })
    }

    fn put_index(&self, handle: &PackHandle, data: &[u8]) -> crate::Result<()> {
        self.replicate(ReplicaItem::Index(*handle), Arc::from(data))
    }

    fn get_index(&self, handle: &PackHandle) -> crate::Result<Vec<u8>> {
        let handle = *handle;
        self.read(
            "get_index",
            Some(&ReplicaItem::Index(handle)),
            Arc::new(move |remote: &dyn Remote| remote.get_index(&handle)),
        )
    }

    fn put_keystore(&self, data: &[u8]) -> crate::Result<()> {
        self.replicate(ReplicaItem::Keystore, Arc::from(data))
    }

    fn get_keystore(&self) -> crate::Result<Vec<u8>> {
        self.read(
            "get_keystore",
            Some(&ReplicaItem::Keystore),
            Arc::new(|remote: &dyn Remote| remote.get_keystore()),
        )
    }

    fn set_head(&self, node: &str, version: &ObjectId) -> crate::Result<()> {
        self.replicate(
            ReplicaItem::Head(node.to_owned()),
            Arc::from(&version.as_bytes()[..]),
        )
    }

    fn head(&self, node: &str) -> crate::Result<Option<ObjectId>> {
        let item = ReplicaItem::Head(node.to_owned());
        let owned_node = node.to_owned();
        let result = self.read(
            "head",
            Some(&item),
            Arc::new(move |remote: &dyn Remote| {
                remote.head(&owned_node)?.ok_or(crate::Error::NotFound)
            }),
        );
        match result {
            Ok(version) => Ok(Some(version)),
            Err(crate::Error::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// A handle to background replication started by [`RemoteGroup::start_replication`].
///
/// [`RemoteGroup::start_replication`]: crate::remote::RemoteGroup::start_replication
#[derive(Debug)]
pub struct Replicator {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Replicator {
    /// Stop background replication and wait for the current pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the replication thread.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
