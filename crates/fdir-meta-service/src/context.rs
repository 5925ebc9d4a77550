//! Process-scoped metadata engine.
//!
//! [`ServerContext`] owns every namespace tree, the inode index, the name
//! allocator and the reclaim queue. It is built once at startup and shared
//! by reference with request handlers; tests build as many as they like.
//!
//! Tree locks and index shard locks are never held at the same time: every
//! operation here finishes its tree step before touching the index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fdir_types::{
    make_error_msg, Gid, InodeId, ListToken, MetaCode, RequestTag, Result, StatusCode, Uid,
};
use fdir_config::Config;
use fdir_utils::{Clock, SystemClock};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::MetaServerConfig;
use crate::delay_free::{DelayFreeQueue, DelayFreeStats};
use crate::dentry::Dentry;
use crate::flock::{FlockConflict, FlockOwner, FlockRequest};
use crate::inode_index::{
    FlockApplied, FlockHandle, InodeIndex, InodeIndexStats, SizeUpdate, SysLockReleased, Wakeup,
};
use crate::list_cache::{ListCache, ListPage};
use crate::name_alloc::{NameAllocator, NameAllocatorStats};
use crate::namespace::{CreateParams, DentryTree, TreeLimits};
use crate::record::{DentryFieldFlags, DentryUpdate, SetSizeParams};

/// A create request. `inode` is set when replaying a logged create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub inode: Option<InodeId>,
    pub mode: u32,
    pub uid: Uid,
    pub gid: Gid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub namespaces: usize,
    pub names: NameAllocatorStats,
    pub reclaim: DelayFreeStats,
    pub index: InodeIndexStats,
    pub list_sessions: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub freed: usize,
    pub expired_lists: usize,
}

pub struct ServerContext {
    config: RwLock<MetaServerConfig>,
    clock: Arc<dyn Clock>,
    names: Arc<NameAllocator>,
    reclaim: Arc<DelayFreeQueue>,
    namespaces: DashMap<String, Arc<DentryTree>>,
    index: InodeIndex,
    lists: ListCache,
    /// Next identifier to hand out. 0 is never valid.
    next_inode: AtomicU64,
}

impl ServerContext {
    pub fn new(config: &MetaServerConfig, clock: Arc<dyn Clock>) -> Self {
        let index = InodeIndex::new(
            config.inode_hashtable_capacity,
            config.inode_shared_locks_count,
            config.max_lock_tasks_per_shard,
            clock.clone(),
        );
        let lists = ListCache::new(
            config.list_page_size,
            config.list_cache_ttl_secs,
            clock.clone(),
        );
        tracing::info!(
            capacity = config.inode_hashtable_capacity,
            shards = config.inode_shared_locks_count,
            "server context: created"
        );
        Self {
            config: RwLock::new(config.clone()),
            names: Arc::new(NameAllocator::new(
                config.name_allocator_limit,
                config.name_pool_capacity,
            )),
            reclaim: Arc::new(DelayFreeQueue::new(clock.clone())),
            namespaces: DashMap::new(),
            index,
            lists,
            next_inode: AtomicU64::new(1),
            clock,
        }
    }

    pub fn with_system_clock(config: &MetaServerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> MetaServerConfig {
        self.config.read().clone()
    }

    /// Apply the hot-reloadable part of a new configuration.
    ///
    /// The config lock is released before the namespaces are visited:
    /// namespace creation reads the config while holding a map shard.
    pub fn update_config(&self, config: &MetaServerConfig) {
        let (max_entries_per_dir, list_page_size, list_cache_ttl_secs) = {
            let mut current = self.config.write();
            current.hot_update(config);
            (
                current.max_entries_per_dir,
                current.list_page_size,
                current.list_cache_ttl_secs,
            )
        };
        for tree in self.namespaces.iter() {
            tree.set_max_entries_per_dir(max_entries_per_dir);
        }
        self.lists.set_limits(list_page_size, list_cache_ttl_secs);
        tracing::info!(
            max_entries_per_dir,
            list_page_size,
            "server context: config updated"
        );
    }

    fn alloc_inode(&self) -> Result<InodeId> {
        match self
            .next_inode
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
        {
            Ok(inode) => Ok(InodeId(inode)),
            Err(_) => make_error_msg(StatusCode::NOT_ENOUGH_MEMORY, "inode space exhausted"),
        }
    }

    /// Keep the generator ahead of an identifier that came from a replay.
    /// Past `u64::MAX - 1` the generator stops handing out identifiers.
    fn reserve_inode(&self, inode: InodeId) {
        let next = inode.0.checked_add(1).unwrap_or(u64::MAX);
        self.next_inode.fetch_max(next, Ordering::Relaxed);
    }

    fn tree_limits(&self) -> TreeLimits {
        let config = self.config.read();
        TreeLimits {
            max_entries_per_dir: config.max_entries_per_dir,
            max_path_count: config.max_path_count,
            delay_free_secs: config.delay_free_seconds,
        }
    }

    pub fn namespace(&self, ns: &str) -> Result<Arc<DentryTree>> {
        if ns.is_empty() {
            return make_error_msg(StatusCode::INVALID_ARG, "empty namespace");
        }
        match self.namespaces.get(ns) {
            Some(tree) => Ok(Arc::clone(tree.value())),
            None => make_error_msg(MetaCode::NOT_FOUND, format!("namespace {}", ns)),
        }
    }

    fn namespace_or_create(&self, ns: &str) -> Result<Arc<DentryTree>> {
        if ns.is_empty() {
            return make_error_msg(StatusCode::INVALID_ARG, "empty namespace");
        }
        if let Some(tree) = self.namespaces.get(ns) {
            return Ok(Arc::clone(tree.value()));
        }
        let limits = self.tree_limits();
        let tree = match self.namespaces.entry(ns.to_string()) {
            Entry::Occupied(o) => return Ok(Arc::clone(o.get())),
            Entry::Vacant(v) => {
                let tree = Arc::new(DentryTree::new(
                    ns,
                    self.alloc_inode()?,
                    limits,
                    Arc::clone(&self.names),
                    Arc::clone(&self.reclaim),
                    Arc::clone(&self.clock),
                )?);
                self.index.add(Arc::clone(tree.root()))?;
                tracing::info!(ns, root = %tree.root().inode(), "namespace: created");
                Arc::clone(v.insert(tree).value())
            }
        };
        // A config update that ran before the insert did not see this tree.
        tree.set_max_entries_per_dir(self.config.read().max_entries_per_dir);
        Ok(tree)
    }

    pub fn resolve(&self, ns: &str, path: &str) -> Result<Arc<Dentry>> {
        self.namespace(ns)?.resolve(path)
    }

    /// Create an entry. A replayed identifier is checked before the
    /// namespace is touched; the namespace root is allocated before the
    /// replayed identifier is reserved.
    pub fn create(&self, ns: &str, path: &str, req: &CreateRequest) -> Result<Arc<Dentry>> {
        if let Some(inode) = req.inode {
            if !inode.is_valid() {
                return make_error_msg(StatusCode::INVALID_ARG, "inode 0 is reserved");
            }
            if self.index.get(inode).is_some() {
                return make_error_msg(
                    MetaCode::EXISTS,
                    format!("inode {} already in use", inode),
                );
            }
        }
        let tree = self.namespace_or_create(ns)?;
        let inode = match req.inode {
            Some(inode) => {
                self.reserve_inode(inode);
                inode
            }
            None => self.alloc_inode()?,
        };
        let params = CreateParams {
            inode,
            mode: req.mode,
            uid: req.uid,
            gid: req.gid,
        };
        let dentry = tree.create(path, &params)?;
        if let Err(e) = self.index.add(Arc::clone(&dentry)) {
            tracing::warn!(
                ns,
                path,
                %inode,
                error = %e,
                "create: index add failed, rolling back"
            );
            // The tree lock was released in between; only undo our own entry.
            if let Err(e) = tree.unlink_if(path, &dentry) {
                tracing::error!(ns, path, error = %e, "create: rollback failed");
            }
            return Err(e);
        }
        Ok(dentry)
    }

    /// Unlink `path` and drop it from the index. Lock state on the entry is
    /// discarded with it.
    pub fn remove(&self, ns: &str, path: &str) -> Result<Arc<Dentry>> {
        let dentry = self.namespace(ns)?.remove(path)?;
        if let Err(e) = self.index.remove(dentry.inode()) {
            tracing::error!(
                ns,
                path,
                inode = %dentry.inode(),
                error = %e,
                "remove: entry missing from index"
            );
        }
        Ok(dentry)
    }

    pub fn list(&self, ns: &str, path: &str) -> Result<Vec<Arc<Dentry>>> {
        self.namespace(ns)?.list(path)
    }

    pub fn list_start(&self, ns: &str, path: &str) -> Result<ListPage> {
        Ok(self.lists.start(self.list(ns, path)?))
    }

    pub fn list_next(&self, token: ListToken, offset: usize) -> Result<ListPage> {
        self.lists.next(token, offset)
    }

    pub fn lookup(&self, inode: InodeId) -> Option<Arc<Dentry>> {
        self.index.get(inode)
    }

    pub fn lookup_by_parent_and_name(&self, parent: InodeId, name: &str) -> Option<Arc<Dentry>> {
        self.index.get_by_parent_and_name(parent, name)
    }

    pub fn update_size(&self, params: &SetSizeParams) -> Option<SizeUpdate> {
        self.index.check_set_size(params)
    }

    pub fn apply_record(&self, record: &DentryUpdate) -> Option<(Arc<Dentry>, DentryFieldFlags)> {
        self.index.update(record)
    }

    pub fn flock_apply(
        &self,
        inode: InodeId,
        req: FlockRequest,
        block: bool,
    ) -> Result<FlockApplied> {
        self.index.flock_apply(inode, req, block)
    }

    pub fn flock_release(&self, handle: FlockHandle) -> Result<Vec<Wakeup>> {
        self.index.flock_release(handle)
    }

    pub fn flock_get_conflict(
        &self,
        inode: InodeId,
        query: &FlockRequest,
    ) -> Result<Option<FlockConflict>> {
        self.index.flock_get_conflict(inode, query)
    }

    pub fn sys_lock_apply(
        &self,
        inode: InodeId,
        owner: FlockOwner,
        tag: RequestTag,
        block: bool,
    ) -> Result<FlockApplied> {
        self.index.sys_lock_apply(inode, owner, tag, block)
    }

    pub fn sys_lock_release(
        &self,
        handle: FlockHandle,
        size: Option<&SetSizeParams>,
    ) -> Result<SysLockReleased> {
        self.index.sys_lock_release(handle, size)
    }

    /// Periodic housekeeping: free expired unlinked objects and drop stale
    /// listing sessions.
    pub fn reclaim(&self, now: i64) -> ReclaimReport {
        ReclaimReport {
            freed: self.reclaim.sweep(now),
            expired_lists: self.lists.purge(now),
        }
    }

    /// Free everything still parked, regardless of expiry. Shutdown only.
    pub fn drain_reclaim(&self) -> usize {
        self.reclaim.drain()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            namespaces: self.namespaces.len(),
            names: self.names.stats(),
            reclaim: self.reclaim.stats(),
            index: self.index.stats(),
            list_sessions: self.lists.len(),
        }
    }
}
