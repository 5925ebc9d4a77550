//! Advisory byte-range locks and the whole-entry system lock.
//!
//! A [`FlockEntry`] holds the lock state of one entry. It is created lazily
//! by the inode index on the first request and lives next to the entry's
//! index node, so every call here runs under that entry's shard lock.
//!
//! Requests are granted in arrival order: a request that conflicts with a
//! holder, or with an older waiter, waits. Request ids are handed out from a
//! monotonic counter, so ordering waiters by id is ordering them by arrival.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use fdir_types::{make_error, make_error_msg, FtaskId, MetaCode, RequestTag, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlockOwner {
    pub pid: u32,
    pub tid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// Half-open byte range `[offset, offset + length)`; `length == 0` runs to
/// end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockRange {
    pub offset: u64,
    pub length: u64,
}

impl LockRange {
    pub const WHOLE_FILE: LockRange = LockRange {
        offset: 0,
        length: 0,
    };

    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        if self.length == 0 {
            u64::MAX
        } else {
            self.offset.saturating_add(self.length)
        }
    }

    pub fn overlaps(&self, other: &LockRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    pub fn is_whole_file(&self) -> bool {
        *self == Self::WHOLE_FILE
    }
}

/// Which queue a request currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskQueue {
    NotQueued,
    Locked(LockRange),
    RegionWaiting(LockRange),
    GlobalWaiting,
    SysLocked,
    SysWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Range(LockType),
    System,
}

#[derive(Debug, Clone, Copy)]
struct FlockTask {
    kind: TaskKind,
    owner: FlockOwner,
    range: LockRange,
    queue: TaskQueue,
    tag: RequestTag,
}

impl FlockTask {
    fn conflicts_with(&self, other: &FlockTask) -> bool {
        match (self.kind, other.kind) {
            (TaskKind::System, _) | (_, TaskKind::System) => true,
            (TaskKind::Range(a), TaskKind::Range(b)) => {
                self.owner != other.owner
                    && self.range.overlaps(&other.range)
                    && (a == LockType::Exclusive || b == LockType::Exclusive)
            }
        }
    }
}

/// Holders and waiters of one exact byte range.
#[derive(Debug, Default)]
struct FlockRegion {
    reads: u32,
    writes: u32,
    locked: BTreeSet<FtaskId>,
    waiting: BTreeSet<FtaskId>,
}

impl FlockRegion {
    fn ref_count(&self) -> usize {
        self.locked.len() + self.waiting.len()
    }
}

/// A byte-range lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlockRequest {
    pub range: LockRange,
    pub lock_type: LockType,
    pub owner: FlockOwner,
    /// Opaque caller value handed back when a pending request is granted.
    pub tag: RequestTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Granted,
    Pending,
}

/// The holder reported by a conflict query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlockConflict {
    pub owner: FlockOwner,
    pub lock_type: LockType,
    pub range: LockRange,
    /// True when the holder is the system lock.
    pub system: bool,
}

#[derive(Debug)]
pub(crate) struct EntryApply {
    pub status: LockStatus,
    /// Waiters granted as a side effect, in grant order.
    pub woken: Vec<(FtaskId, RequestTag)>,
}

#[derive(Debug, Default)]
pub struct FlockEntry {
    regions: BTreeMap<LockRange, FlockRegion>,
    tasks: HashMap<FtaskId, FlockTask>,
    global_waiting: BTreeSet<FtaskId>,
    sys_holder: Option<FtaskId>,
    sys_waiting: BTreeSet<FtaskId>,
}

impl FlockEntry {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_sys_locked(&self) -> bool {
        self.sys_holder.is_some()
    }

    pub(crate) fn apply(
        &mut self,
        id: FtaskId,
        req: FlockRequest,
        block: bool,
    ) -> Result<EntryApply> {
        let task = FlockTask {
            kind: TaskKind::Range(req.lock_type),
            owner: req.owner,
            range: req.range,
            queue: TaskQueue::NotQueued,
            tag: req.tag,
        };
        self.submit(id, task, block)
    }

    pub(crate) fn sys_apply(
        &mut self,
        id: FtaskId,
        owner: FlockOwner,
        tag: RequestTag,
        block: bool,
    ) -> Result<EntryApply> {
        let task = FlockTask {
            kind: TaskKind::System,
            owner,
            range: LockRange::WHOLE_FILE,
            queue: TaskQueue::NotQueued,
            tag,
        };
        self.submit(id, task, block)
    }

    fn submit(&mut self, id: FtaskId, mut task: FlockTask, block: bool) -> Result<EntryApply> {
        let upgrade = self.owner_holds_exact(&task);
        let blocked = self.first_conflicting_holder(&task).is_some()
            || (!upgrade && self.has_conflicting_waiter(&task));

        if !blocked {
            let superseded = self.grant(id, task);
            let woken = if superseded > 0 {
                self.wake_waiters()
            } else {
                Vec::new()
            };
            return Ok(EntryApply {
                status: LockStatus::Granted,
                woken,
            });
        }
        if !block {
            return make_error(MetaCode::LOCK_CONFLICT);
        }

        task.queue = match task.kind {
            TaskKind::System => {
                self.sys_waiting.insert(id);
                TaskQueue::SysWaiting
            }
            TaskKind::Range(_) if task.range.is_whole_file() => {
                self.global_waiting.insert(id);
                TaskQueue::GlobalWaiting
            }
            TaskKind::Range(_) => {
                self.regions.entry(task.range).or_default().waiting.insert(id);
                TaskQueue::RegionWaiting(task.range)
            }
        };
        self.tasks.insert(id, task);
        Ok(EntryApply {
            status: LockStatus::Pending,
            woken: Vec::new(),
        })
    }

    /// Drop request `id` from whichever queue holds it, then grant what the
    /// release unblocked.
    pub(crate) fn release(&mut self, id: FtaskId) -> Result<Vec<(FtaskId, RequestTag)>> {
        let Some(task) = self.tasks.remove(&id) else {
            return make_error_msg(
                MetaCode::NO_LOCK,
                format!("lock request {} is not held", id),
            );
        };
        self.unqueue(id, &task);
        Ok(self.wake_waiters())
    }

    /// Whether request `id` is a system lock; `None` if it is not tracked.
    pub(crate) fn is_system_request(&self, id: FtaskId) -> Option<bool> {
        self.tasks
            .get(&id)
            .map(|task| matches!(task.queue, TaskQueue::SysLocked | TaskQueue::SysWaiting))
    }

    /// First holder that would block `req`. Does not touch any queue.
    pub fn get_conflict(&self, req: &FlockRequest) -> Option<FlockConflict> {
        let query = FlockTask {
            kind: TaskKind::Range(req.lock_type),
            owner: req.owner,
            range: req.range,
            queue: TaskQueue::NotQueued,
            tag: req.tag,
        };
        let holder = self.tasks.get(&self.first_conflicting_holder(&query)?)?;
        Some(match holder.kind {
            TaskKind::Range(lock_type) => FlockConflict {
                owner: holder.owner,
                lock_type,
                range: holder.range,
                system: false,
            },
            TaskKind::System => FlockConflict {
                owner: holder.owner,
                lock_type: LockType::Exclusive,
                range: LockRange::WHOLE_FILE,
                system: true,
            },
        })
    }

    fn owner_holds_exact(&self, task: &FlockTask) -> bool {
        let TaskKind::Range(_) = task.kind else {
            return false;
        };
        self.regions.get(&task.range).is_some_and(|region| {
            region
                .locked
                .iter()
                .any(|h| self.tasks.get(h).is_some_and(|t| t.owner == task.owner))
        })
    }

    /// Regions whose range intersects `range`.
    fn overlapping_regions<'a>(
        &'a self,
        range: &'a LockRange,
    ) -> impl Iterator<Item = &'a FlockRegion> + 'a {
        self.regions
            .range(..LockRange::new(range.end(), 0))
            .filter(move |(key, _)| key.overlaps(range))
            .map(|(_, region)| region)
    }

    fn first_conflicting_holder(&self, query: &FlockTask) -> Option<FtaskId> {
        let conflicts = |id: &FtaskId| self.tasks.get(id).is_some_and(|t| query.conflicts_with(t));
        if let Some(holder) = self.sys_holder.filter(|id| conflicts(id)) {
            return Some(holder);
        }
        self.overlapping_regions(&query.range)
            .flat_map(|region| region.locked.iter())
            .find(|id| conflicts(*id))
            .copied()
    }

    fn has_conflicting_waiter(&self, query: &FlockTask) -> bool {
        let conflicts = |id: &FtaskId| self.tasks.get(id).is_some_and(|t| query.conflicts_with(t));
        self.sys_waiting.iter().any(conflicts)
            || self.global_waiting.iter().any(conflicts)
            || self
                .overlapping_regions(&query.range)
                .flat_map(|region| region.waiting.iter())
                .any(conflicts)
    }

    /// Move `task` into its locked queue. Returns how many of the owner's
    /// older holds on the same exact region were replaced.
    fn grant(&mut self, id: FtaskId, mut task: FlockTask) -> usize {
        let lock_type = match task.kind {
            TaskKind::System => {
                task.queue = TaskQueue::SysLocked;
                self.sys_holder = Some(id);
                self.tasks.insert(id, task);
                return 0;
            }
            TaskKind::Range(lock_type) => lock_type,
        };

        let tasks = &mut self.tasks;
        let region = self.regions.entry(task.range).or_default();
        let replaced: Vec<FtaskId> = region
            .locked
            .iter()
            .copied()
            .filter(|h| tasks.get(h).is_some_and(|t| t.owner == task.owner))
            .collect();
        for old in &replaced {
            region.locked.remove(old);
            if let Some(TaskKind::Range(old_type)) = tasks.remove(old).map(|t| t.kind) {
                Self::count(region, old_type, false);
            }
            tracing::debug!(ftask = %old, replaced_by = %id, "flock: superseded by same owner");
        }

        region.locked.insert(id);
        Self::count(region, lock_type, true);
        task.queue = TaskQueue::Locked(task.range);
        tasks.insert(id, task);
        replaced.len()
    }

    fn count(region: &mut FlockRegion, lock_type: LockType, add: bool) {
        let counter = match lock_type {
            LockType::Shared => &mut region.reads,
            LockType::Exclusive => &mut region.writes,
        };
        if add {
            *counter += 1;
        } else {
            *counter = counter.saturating_sub(1);
        }
    }

    fn unqueue(&mut self, id: FtaskId, task: &FlockTask) {
        match task.queue {
            TaskQueue::NotQueued => {}
            TaskQueue::Locked(range) | TaskQueue::RegionWaiting(range) => {
                if let Some(region) = self.regions.get_mut(&range) {
                    if region.locked.remove(&id) {
                        if let TaskKind::Range(lock_type) = task.kind {
                            Self::count(region, lock_type, false);
                        }
                    }
                    region.waiting.remove(&id);
                    if region.ref_count() == 0 {
                        self.regions.remove(&range);
                    }
                }
            }
            TaskQueue::GlobalWaiting => {
                self.global_waiting.remove(&id);
            }
            TaskQueue::SysLocked => {
                if self.sys_holder == Some(id) {
                    self.sys_holder = None;
                }
            }
            TaskQueue::SysWaiting => {
                self.sys_waiting.remove(&id);
            }
        }
    }

    /// Grant every waiter that no holder and no older blocked waiter
    /// conflicts with, oldest first.
    fn wake_waiters(&mut self) -> Vec<(FtaskId, RequestTag)> {
        let mut waiting: Vec<FtaskId> = self
            .regions
            .values()
            .flat_map(|r| r.waiting.iter().copied())
            .chain(self.global_waiting.iter().copied())
            .chain(self.sys_waiting.iter().copied())
            .collect();
        waiting.sort_unstable();

        let mut still_blocked: Vec<FlockTask> = Vec::new();
        let mut woken = Vec::new();
        for id in waiting {
            let Some(task) = self.tasks.get(&id).copied() else {
                continue;
            };
            let upgrade = self.owner_holds_exact(&task);
            let stuck = self.first_conflicting_holder(&task).is_some()
                || (!upgrade && still_blocked.iter().any(|b| b.conflicts_with(&task)));
            if stuck {
                still_blocked.push(task);
                continue;
            }
            self.unqueue(id, &task);
            self.grant(id, task);
            woken.push((id, task.tag));
        }
        woken
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        for (range, region) in &self.regions {
            assert!(region.ref_count() > 0, "empty region {:?} kept", range);
            let (mut reads, mut writes) = (0, 0);
            for id in &region.locked {
                let task = &self.tasks[id];
                assert_eq!(task.queue, TaskQueue::Locked(*range));
                match task.kind {
                    TaskKind::Range(LockType::Shared) => reads += 1,
                    TaskKind::Range(LockType::Exclusive) => writes += 1,
                    TaskKind::System => panic!("system lock in a region"),
                }
            }
            assert_eq!((reads, writes), (region.reads, region.writes));
            assert!(writes == 0 || (writes == 1 && reads == 0));
            for id in &region.waiting {
                assert_eq!(self.tasks[id].queue, TaskQueue::RegionWaiting(*range));
            }
        }
        for (id, task) in &self.tasks {
            match task.queue {
                TaskQueue::NotQueued => panic!("untracked request {}", id),
                TaskQueue::Locked(r) => assert!(self.regions[&r].locked.contains(id)),
                TaskQueue::RegionWaiting(r) => assert!(self.regions[&r].waiting.contains(id)),
                TaskQueue::GlobalWaiting => assert!(self.global_waiting.contains(id)),
                TaskQueue::SysLocked => assert_eq!(self.sys_holder, Some(*id)),
                TaskQueue::SysWaiting => assert!(self.sys_waiting.contains(id)),
            }
        }
    }
}
