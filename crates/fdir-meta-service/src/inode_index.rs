//! Sharded inode hash index.
//!
//! `capacity` buckets hold singly linked chains sorted by inode. Bucket `b`
//! belongs to shard `b % shards`; each shard owns its buckets, the lock
//! state of the entries in them and a request id counter, all behind one
//! mutex. Entries themselves are owned by the namespace tree; a node only
//! keeps an `Arc` so lookups never see a freed entry.

use std::sync::Arc;

use fdir_types::{make_error_msg, FtaskId, InodeId, MetaCode, RequestTag, Result, StatusCode};
use fdir_utils::{Clock, Shards};
use serde::{Deserialize, Serialize};

use crate::dentry::Dentry;
use crate::flock::{EntryApply, FlockConflict, FlockEntry, FlockOwner, FlockRequest, LockStatus};
use crate::record::{DentryFieldFlags, DentryUpdate, SetSizeParams};

type Link = Option<Box<IndexNode>>;

struct IndexNode {
    dentry: Arc<Dentry>,
    flock: Option<Box<FlockEntry>>,
    next: Link,
}

impl IndexNode {
    fn inode(&self) -> InodeId {
        self.dentry.inode()
    }
}

fn chain_insert(link: &mut Link, dentry: Arc<Dentry>) -> Result<()> {
    let inode = dentry.inode();
    let mut cur = link;
    while cur.as_ref().is_some_and(|node| node.inode() < inode) {
        if let Some(node) = cur {
            cur = &mut node.next;
        }
    }
    if cur.as_ref().is_some_and(|node| node.inode() == inode) {
        return make_error_msg(MetaCode::EXISTS, format!("inode {} already indexed", inode));
    }
    let next = cur.take();
    *cur = Some(Box::new(IndexNode {
        dentry,
        flock: None,
        next,
    }));
    Ok(())
}

fn chain_remove(link: &mut Link, inode: InodeId) -> Option<Box<IndexNode>> {
    let mut cur = link;
    while cur.as_ref().is_some_and(|node| node.inode() < inode) {
        if let Some(node) = cur {
            cur = &mut node.next;
        }
    }
    if cur.as_ref()?.inode() != inode {
        return None;
    }
    let mut removed = cur.take()?;
    *cur = removed.next.take();
    Some(removed)
}

fn chain_find(link: &Link, inode: InodeId) -> Option<&IndexNode> {
    let mut cur = link.as_deref();
    while let Some(node) = cur {
        if node.inode() >= inode {
            return (node.inode() == inode).then_some(node);
        }
        cur = node.next.as_deref();
    }
    None
}

fn chain_find_mut(link: &mut Link, inode: InodeId) -> Option<&mut IndexNode> {
    let mut cur = link.as_deref_mut();
    while let Some(node) = cur {
        if node.inode() >= inode {
            return (node.inode() == inode).then_some(node);
        }
        cur = node.next.as_deref_mut();
    }
    None
}

struct InodeShard {
    buckets: Vec<Link>,
    entries: usize,
    next_ftask_id: u64,
    live_tasks: usize,
}

impl Drop for InodeShard {
    // Unlink chains node by node; the default drop recurses per node.
    fn drop(&mut self) {
        for bucket in &mut self.buckets {
            let mut cur = bucket.take();
            while let Some(mut node) = cur {
                cur = node.next.take();
            }
        }
    }
}

/// Handle to one lock request, valid until released or superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlockHandle {
    pub inode: InodeId,
    pub id: FtaskId,
}

/// A pending request that has just been granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wakeup {
    pub handle: FlockHandle,
    pub tag: RequestTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlockApplied {
    pub handle: FlockHandle,
    pub status: LockStatus,
    /// Other waiters granted by this call (a downgrade can unblock them).
    pub woken: Vec<Wakeup>,
}

#[derive(Debug, Clone)]
pub struct SizeUpdate {
    pub dentry: Arc<Dentry>,
    pub modified: DentryFieldFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SysLockReleased {
    pub woken: Vec<Wakeup>,
    /// Fields changed by the size update carried with the release.
    pub modified: DentryFieldFlags,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InodeIndexStats {
    pub entries: usize,
    pub lock_tasks: usize,
}

pub struct InodeIndex {
    capacity: u64,
    shards: Shards<InodeShard>,
    max_tasks_per_shard: usize,
    clock: Arc<dyn Clock>,
}

impl InodeIndex {
    /// `max_tasks_per_shard == 0` leaves lock requests unbounded.
    pub fn new(
        capacity: u64,
        num_shards: usize,
        max_tasks_per_shard: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = capacity.max(1);
        let num_shards = num_shards.clamp(1, capacity as usize);
        let shards = Shards::new(num_shards, |i| {
            // Buckets i, i + n, i + 2n, ... below capacity.
            let owned = (capacity as usize - i).div_ceil(num_shards);
            InodeShard {
                buckets: (0..owned).map(|_| None).collect(),
                entries: 0,
                next_ftask_id: 0,
                live_tasks: 0,
            }
        });
        Self {
            capacity,
            shards,
            max_tasks_per_shard,
            clock,
        }
    }

    /// (shard index, bucket index within the shard)
    fn locate(&self, inode: InodeId) -> (usize, usize) {
        let bucket = (inode.0 % self.capacity) as usize;
        let n = self.shards.num_shards();
        (bucket % n, bucket / n)
    }

    pub fn add(&self, dentry: Arc<Dentry>) -> Result<()> {
        let inode = dentry.inode();
        let (shard_idx, bucket) = self.locate(inode);
        let mut shard = self.shards.lock(shard_idx);
        chain_insert(&mut shard.buckets[bucket], dentry)?;
        shard.entries += 1;
        tracing::debug!(%inode, shard = shard_idx, "inode index: added");
        Ok(())
    }

    /// Unindex `inode`. Lock state kept with the node goes with it; any
    /// handle into it then reports not found.
    pub fn remove(&self, inode: InodeId) -> Result<Arc<Dentry>> {
        let (shard_idx, bucket) = self.locate(inode);
        let mut shard = self.shards.lock(shard_idx);
        let Some(node) = chain_remove(&mut shard.buckets[bucket], inode) else {
            return make_error_msg(MetaCode::NOT_FOUND, format!("inode {} not indexed", inode));
        };
        shard.entries -= 1;
        if let Some(flock) = node.flock.as_deref() {
            shard.live_tasks -= flock.task_count();
            tracing::warn!(
                %inode,
                tasks = flock.task_count(),
                "inode index: removed entry still holding lock state"
            );
        }
        tracing::debug!(%inode, shard = shard_idx, "inode index: removed");
        Ok(node.dentry)
    }

    pub fn get(&self, inode: InodeId) -> Option<Arc<Dentry>> {
        let (shard_idx, bucket) = self.locate(inode);
        let shard = self.shards.lock(shard_idx);
        chain_find(&shard.buckets[bucket], inode).map(|n| Arc::clone(&n.dentry))
    }

    /// Find `name` under directory `parent`. The shard lock covers only the
    /// parent lookup; the child lookup uses the directory's own lock.
    pub fn get_by_parent_and_name(&self, parent: InodeId, name: &str) -> Option<Arc<Dentry>> {
        self.get(parent)?.find_child(name)
    }

    /// Apply a size report; see [`SetSizeParams`] for the update policy.
    pub fn check_set_size(&self, params: &SetSizeParams) -> Option<SizeUpdate> {
        let now = self.clock.now_secs();
        self.with_node(params.inode, |node| {
            let modified = params.apply_to(&mut node.dentry.stat_mut(), now);
            SizeUpdate {
                dentry: Arc::clone(&node.dentry),
                modified,
            }
        })
    }

    /// Merge a change record into the indexed entry.
    pub fn update(&self, record: &DentryUpdate) -> Option<(Arc<Dentry>, DentryFieldFlags)> {
        self.with_node(record.inode, |node| {
            let modified = record.apply_to(&mut node.dentry.stat_mut());
            (Arc::clone(&node.dentry), modified)
        })
    }

    pub fn flock_apply(
        &self,
        inode: InodeId,
        req: FlockRequest,
        block: bool,
    ) -> Result<FlockApplied> {
        self.apply_with(inode, |flock, id| flock.apply(id, req, block))
    }

    pub fn sys_lock_apply(
        &self,
        inode: InodeId,
        owner: FlockOwner,
        tag: RequestTag,
        block: bool,
    ) -> Result<FlockApplied> {
        self.apply_with(inode, |flock, id| flock.sys_apply(id, owner, tag, block))
    }

    /// Release a granted or pending range lock request and grant what it
    /// unblocked. System lock handles are refused.
    pub fn flock_release(&self, handle: FlockHandle) -> Result<Vec<Wakeup>> {
        self.release_with(handle, false, |_| DentryFieldFlags::NONE)
            .map(|(woken, _)| woken)
    }

    /// Release a system lock, applying `size` under the same shard lock first.
    pub fn sys_lock_release(
        &self,
        handle: FlockHandle,
        size: Option<&SetSizeParams>,
    ) -> Result<SysLockReleased> {
        let now = self.clock.now_secs();
        let (woken, modified) = self.release_with(handle, true, |dentry| {
            size.map(|p| p.apply_to(&mut dentry.stat_mut(), now))
                .unwrap_or_default()
        })?;
        Ok(SysLockReleased { woken, modified })
    }

    pub fn flock_get_conflict(
        &self,
        inode: InodeId,
        query: &FlockRequest,
    ) -> Result<Option<FlockConflict>> {
        match self.with_node(inode, |node| {
            node.flock.as_deref().and_then(|f| f.get_conflict(query))
        }) {
            Some(conflict) => Ok(conflict),
            None => make_error_msg(MetaCode::NOT_FOUND, format!("inode {} not indexed", inode)),
        }
    }

    pub fn stats(&self) -> InodeIndexStats {
        let mut stats = InodeIndexStats::default();
        self.shards.for_each(|_, shard| {
            stats.entries += shard.entries;
            stats.lock_tasks += shard.live_tasks;
        });
        stats
    }

    pub fn len(&self) -> usize {
        self.stats().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_node<R>(
        &self,
        inode: InodeId,
        f: impl FnOnce(&mut IndexNode) -> R,
    ) -> Option<R> {
        let (shard_idx, bucket) = self.locate(inode);
        let mut shard = self.shards.lock(shard_idx);
        chain_find_mut(&mut shard.buckets[bucket], inode).map(f)
    }

    fn apply_with(
        &self,
        inode: InodeId,
        op: impl FnOnce(&mut FlockEntry, FtaskId) -> Result<EntryApply>,
    ) -> Result<FlockApplied> {
        let (shard_idx, bucket) = self.locate(inode);
        let mut guard = self.shards.lock(shard_idx);
        let shard = &mut *guard;

        let Some(node) = chain_find_mut(&mut shard.buckets[bucket], inode) else {
            return make_error_msg(MetaCode::NOT_FOUND, format!("inode {} not indexed", inode));
        };
        if self.max_tasks_per_shard > 0 && shard.live_tasks >= self.max_tasks_per_shard {
            return make_error_msg(
                StatusCode::NOT_ENOUGH_MEMORY,
                format!("lock task limit {} reached", self.max_tasks_per_shard),
            );
        }

        shard.next_ftask_id += 1;
        let id = FtaskId(shard.next_ftask_id);
        let flock: &mut FlockEntry = node.flock.get_or_insert_with(Box::default);
        let before = flock.task_count();
        let result = op(flock, id);
        let after = flock.task_count();
        if flock.is_empty() {
            node.flock = None;
        }
        shard.live_tasks = shard.live_tasks + after - before;

        let applied = result?;
        tracing::debug!(%inode, ftask = %id, status = ?applied.status, "flock: applied");
        Ok(FlockApplied {
            handle: FlockHandle { inode, id },
            status: applied.status,
            woken: to_wakeups(inode, applied.woken),
        })
    }

    fn release_with(
        &self,
        handle: FlockHandle,
        system: bool,
        before_release: impl FnOnce(&Dentry) -> DentryFieldFlags,
    ) -> Result<(Vec<Wakeup>, DentryFieldFlags)> {
        let inode = handle.inode;
        let (shard_idx, bucket) = self.locate(inode);
        let mut guard = self.shards.lock(shard_idx);
        let shard = &mut *guard;

        let Some(node) = chain_find_mut(&mut shard.buckets[bucket], inode) else {
            return make_error_msg(MetaCode::NOT_FOUND, format!("inode {} not indexed", inode));
        };
        let Some(flock) = node.flock.as_deref_mut() else {
            return make_error_msg(
                MetaCode::NO_LOCK,
                format!("inode {} holds no lock state", inode),
            );
        };
        if flock.is_system_request(handle.id) != Some(system) {
            return make_error_msg(
                MetaCode::NO_LOCK,
                format!("inode {} holds no such lock request {}", inode, handle.id),
            );
        }
        let before = flock.task_count();
        let woken = flock.release(handle.id)?;
        let after = flock.task_count();
        if flock.is_empty() {
            node.flock = None;
        }
        shard.live_tasks = shard.live_tasks + after - before;
        let modified = before_release(node.dentry.as_ref());

        tracing::debug!(%inode, ftask = %handle.id, woken = woken.len(), "flock: released");
        Ok((to_wakeups(inode, woken), modified))
    }
}

fn to_wakeups(inode: InodeId, woken: Vec<(FtaskId, RequestTag)>) -> Vec<Wakeup> {
    woken
        .into_iter()
        .map(|(id, tag)| Wakeup {
            handle: FlockHandle { inode, id },
            tag,
        })
        .collect()
}
