//! Namespace entries.
//!
//! A [`Dentry`] is shared through `Arc`: its parent's child collection owns
//! its place in the namespace, the inode index refers to it by identifier,
//! and readers may hold clones past unlink until the reclaim grace period
//! ends.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use fdir_types::{Gid, InodeId, Uid};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::name_alloc::Name;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

pub fn is_dir_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentryStat {
    pub mode: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub alloc: i64,
    pub space_end: u64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

impl DentryStat {
    /// Metadata of a freshly created entry.
    pub fn new(mode: u32, uid: Uid, gid: Gid, now: i64) -> Self {
        Self {
            mode,
            uid,
            gid,
            atime: 0,
            ctime: now,
            mtime: now,
            ..Default::default()
        }
    }
}

pub struct Dentry {
    inode: InodeId,
    name: Name,
    stat: Mutex<DentryStat>,
    children: Option<RwLock<DentryChildren>>,
}

/// Ordered children of a directory.
#[derive(Default)]
pub(crate) struct DentryChildren {
    entries: BTreeSet<ChildRef>,
    /// Set once the directory itself is removed; blocks late inserts.
    unlinked: bool,
}

/// A child held in its parent's ordered set, keyed by name.
struct ChildRef(Arc<Dentry>);

impl PartialEq for ChildRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for ChildRef {}

impl PartialOrd for ChildRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChildRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Borrow<str> for ChildRef {
    fn borrow(&self) -> &str {
        self.0.name.as_str()
    }
}

impl DentryChildren {
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<Dentry>> {
        self.entries.get(name).map(|c| &c.0)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// Insert a child whose name is not present yet.
    pub(crate) fn insert(&mut self, child: Arc<Dentry>) -> bool {
        self.entries.insert(ChildRef(child))
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<Dentry>> {
        self.entries.take(name).map(|c| c.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_unlinked(&self) -> bool {
        self.unlinked
    }

    pub(crate) fn mark_unlinked(&mut self) {
        self.unlinked = true;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Dentry>> {
        self.entries.iter().map(|c| &c.0)
    }
}

impl Dentry {
    /// Build an entry; directories get an empty child collection.
    pub(crate) fn new(inode: InodeId, name: Name, stat: DentryStat) -> Self {
        let children = is_dir_mode(stat.mode).then(|| RwLock::new(DentryChildren::default()));
        Self {
            inode,
            name,
            stat: Mutex::new(stat),
            children,
        }
    }

    pub fn inode(&self) -> InodeId {
        self.inode
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }

    pub fn stat(&self) -> DentryStat {
        *self.stat.lock()
    }

    pub(crate) fn stat_mut(&self) -> parking_lot::MutexGuard<'_, DentryStat> {
        self.stat.lock()
    }

    pub fn child_count(&self) -> usize {
        self.children.as_ref().map_or(0, |c| c.read().len())
    }

    /// Look a child up by name. `None` for non-directories.
    pub fn find_child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.children.as_ref()?.read().get(name).cloned()
    }

    /// Children in name order; a non-directory yields nothing.
    pub fn children_snapshot(&self) -> Vec<Arc<Dentry>> {
        self.children
            .as_ref()
            .map(|c| c.read().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn children_read(&self) -> Option<RwLockReadGuard<'_, DentryChildren>> {
        self.children.as_ref().map(|c| c.read())
    }

    pub(crate) fn children_write(&self) -> Option<RwLockWriteGuard<'_, DentryChildren>> {
        self.children.as_ref().map(|c| c.write())
    }

    pub fn info(&self) -> DentryInfo {
        DentryInfo {
            inode: self.inode,
            name: self.name().to_string(),
            stat: self.stat(),
        }
    }
}

impl std::fmt::Debug for Dentry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dentry")
            .field("inode", &self.inode)
            .field("name", &self.name)
            .field("is_dir", &self.is_dir())
            .finish()
    }
}

/// Detached copy of one entry, as returned to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentryInfo {
    pub inode: InodeId,
    pub name: String,
    pub stat: DentryStat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_alloc::NameAllocator;

    fn entry(alloc: &NameAllocator, inode: u64, name: &str, mode: u32) -> Arc<Dentry> {
        Arc::new(Dentry::new(
            InodeId(inode),
            alloc.alloc(name).unwrap(),
            DentryStat::new(mode, Uid(1), Gid(2), 100),
        ))
    }

    #[test]
    fn test_mode_helpers() {
        assert!(is_dir_mode(S_IFDIR | 0o755));
        assert!(!is_dir_mode(S_IFREG | 0o644));
        assert!(!is_dir_mode(S_IFLNK | 0o777));
        assert!(!is_dir_mode(0o755));
    }

    #[test]
    fn test_initial_stat() {
        let stat = DentryStat::new(S_IFREG | 0o644, Uid(1), Gid(2), 77);
        assert_eq!(stat.atime, 0);
        assert_eq!(stat.ctime, 77);
        assert_eq!(stat.mtime, 77);
        assert_eq!(stat.size, 0);
        assert_eq!(stat.alloc, 0);
    }

    #[test]
    fn test_directory_has_children_file_does_not() {
        let alloc = NameAllocator::new(0, 4);
        let dir = entry(&alloc, 2, "d", S_IFDIR | 0o755);
        let file = entry(&alloc, 3, "f", S_IFREG | 0o644);
        assert!(dir.is_dir());
        assert!(dir.children_read().is_some());
        assert!(!file.is_dir());
        assert!(file.children_read().is_none());
        assert!(file.find_child("x").is_none());
        assert!(file.children_snapshot().is_empty());
    }

    #[test]
    fn test_children_ordered_and_unique() {
        let alloc = NameAllocator::new(0, 4);
        let dir = entry(&alloc, 2, "d", S_IFDIR | 0o755);
        {
            let mut children = dir.children_write().unwrap();
            for (i, name) in ["zeta", "alpha", "Mid", "beta"].iter().enumerate() {
                assert!(children.insert(entry(&alloc, 10 + i as u64, name, S_IFREG)));
            }
            assert!(!children.insert(entry(&alloc, 99, "alpha", S_IFREG)));
            assert!(children.contains("beta"));
        }
        let names: Vec<String> = dir
            .children_snapshot()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["Mid", "alpha", "beta", "zeta"]);
        assert_eq!(dir.child_count(), 4);
        assert_eq!(dir.find_child("alpha").unwrap().inode(), InodeId(11));

        let removed = dir.children_write().unwrap().remove("alpha").unwrap();
        assert_eq!(removed.inode(), InodeId(11));
        assert!(dir.find_child("alpha").is_none());
    }

    #[test]
    fn test_info_serializes() {
        let alloc = NameAllocator::new(0, 4);
        let file = entry(&alloc, 5, "f.txt", S_IFREG | 0o644);
        let info = file.info();
        assert_eq!(info.name, "f.txt");
        let json = serde_json::to_string(&info).unwrap();
        let back: DentryInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
