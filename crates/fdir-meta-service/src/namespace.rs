//! One namespace: a directory tree rooted at `/`.
//!
//! Each directory serializes its own children; no operation holds more than
//! a parent and one child lock, always taken parent first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fdir_types::{make_error_msg, Gid, InodeId, MetaCode, Result, Uid};
use fdir_utils::Clock;

use crate::delay_free::DelayFreeQueue;
use crate::dentry::{Dentry, DentryStat, S_IFDIR, S_IFMT};
use crate::name_alloc::NameAllocator;
use crate::path_resolve::PathResolver;

/// Attributes of an entry to create. The identifier is already allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParams {
    pub inode: InodeId,
    pub mode: u32,
    pub uid: Uid,
    pub gid: Gid,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeLimits {
    pub max_entries_per_dir: usize,
    pub max_path_count: usize,
    pub delay_free_secs: i64,
}

pub struct DentryTree {
    ns: Arc<String>,
    root: Arc<Dentry>,
    names: Arc<NameAllocator>,
    reclaim: Arc<DelayFreeQueue>,
    clock: Arc<dyn Clock>,
    max_entries_per_dir: AtomicUsize,
    max_path_count: usize,
    delay_free_secs: i64,
}

fn free_dentry(ns: &String, dentry: Arc<Dentry>) {
    tracing::trace!(ns = %ns, inode = %dentry.inode(), "reclaim: dropping dentry");
}

impl DentryTree {
    pub fn new(
        ns: &str,
        root_inode: InodeId,
        limits: TreeLimits,
        names: Arc<NameAllocator>,
        reclaim: Arc<DelayFreeQueue>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let stat = DentryStat::new(S_IFDIR | 0o755, Uid(0), Gid(0), clock.now_secs());
        let root = Arc::new(Dentry::new(root_inode, names.alloc_raw("/")?, stat));
        Ok(Self {
            ns: Arc::new(ns.to_string()),
            root,
            names,
            reclaim,
            clock,
            max_entries_per_dir: AtomicUsize::new(limits.max_entries_per_dir),
            max_path_count: limits.max_path_count,
            delay_free_secs: limits.delay_free_secs,
        })
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    pub fn set_max_entries_per_dir(&self, max: usize) {
        self.max_entries_per_dir.store(max, Ordering::Relaxed);
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.root, self.max_path_count)
    }

    pub fn resolve(&self, path: &str) -> Result<Arc<Dentry>> {
        self.resolver().resolve(path)
    }

    pub fn create(&self, path: &str, params: &CreateParams) -> Result<Arc<Dentry>> {
        if params.mode & S_IFMT == 0 {
            return make_error_msg(
                MetaCode::INVALID_MODE,
                format!("mode {:o} has no file type", params.mode),
            );
        }
        let resolved = self.resolver().resolve_parent(path)?;
        let parent = resolved.parent;
        let Some(mut siblings) = parent.children_write() else {
            return make_error_msg(MetaCode::NOT_DIRECTORY, path.to_string());
        };
        // Removed between resolution and locking.
        if siblings.is_unlinked() {
            return make_error_msg(MetaCode::NOT_FOUND, path.to_string());
        }
        if siblings.contains(resolved.name) {
            return make_error_msg(MetaCode::EXISTS, path.to_string());
        }
        let max = self.max_entries_per_dir.load(Ordering::Relaxed);
        if siblings.len() >= max {
            tracing::warn!(
                ns = %self.ns,
                parent = %parent.inode(),
                max,
                "create: directory fanout limit reached"
            );
            return make_error_msg(
                MetaCode::TOO_MANY_ENTRIES,
                format!("{} already holds {} entries", parent.name(), max),
            );
        }

        let name = self.names.alloc(resolved.name)?;
        let stat = DentryStat::new(params.mode, params.uid, params.gid, self.clock.now_secs());
        let dentry = Arc::new(Dentry::new(params.inode, name, stat));
        siblings.insert(Arc::clone(&dentry));
        drop(siblings);

        tracing::debug!(ns = %self.ns, inode = %params.inode, path, "create: created dentry");
        Ok(dentry)
    }

    /// Unlink the entry at `path` and park it on the reclaim queue.
    ///
    /// A directory must be empty; it is marked unlinked under its own lock
    /// so no create can slip into it afterwards.
    pub fn remove(&self, path: &str) -> Result<Arc<Dentry>> {
        self.unlink(path, None)
    }

    /// Unlink `path` only while it still names `expected`. Undoes a create
    /// whose later steps failed without touching an entry created since.
    pub fn unlink_if(&self, path: &str, expected: &Arc<Dentry>) -> Result<Arc<Dentry>> {
        self.unlink(path, Some(expected))
    }

    fn unlink(&self, path: &str, expected: Option<&Arc<Dentry>>) -> Result<Arc<Dentry>> {
        let resolved = self.resolver().resolve_parent(path)?;
        let parent = resolved.parent;
        let Some(mut siblings) = parent.children_write() else {
            return make_error_msg(MetaCode::NOT_DIRECTORY, path.to_string());
        };
        if siblings.is_unlinked() {
            return make_error_msg(MetaCode::NOT_FOUND, path.to_string());
        }
        let Some(target) = siblings.get(resolved.name).cloned() else {
            return make_error_msg(MetaCode::NOT_FOUND, path.to_string());
        };
        if expected.is_some_and(|e| !Arc::ptr_eq(e, &target)) {
            return make_error_msg(
                MetaCode::NOT_FOUND,
                format!("{} now names inode {}", path, target.inode()),
            );
        }
        if let Some(mut children) = target.children_write() {
            if !children.is_empty() {
                return make_error_msg(
                    MetaCode::NOT_EMPTY,
                    format!("{} has {} entries", path, children.len()),
                );
            }
            children.mark_unlinked();
        }
        siblings.remove(resolved.name);
        drop(siblings);

        self.reclaim.schedule_ex(
            free_dentry,
            Arc::clone(&self.ns),
            Arc::clone(&target),
            self.delay_free_secs,
        );
        tracing::debug!(ns = %self.ns, inode = %target.inode(), path, "remove: unlinked dentry");
        Ok(target)
    }

    /// Children of a directory in name order, or the entry itself.
    pub fn list(&self, path: &str) -> Result<Vec<Arc<Dentry>>> {
        let entry = self.resolve(path)?;
        if entry.is_dir() {
            Ok(entry.children_snapshot())
        } else {
            Ok(vec![entry])
        }
    }
}
