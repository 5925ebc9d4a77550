//! Size-classed allocator for entry names.
//!
//! Names are at most [`NAME_MAX`] bytes. Each allocation is rounded up to a
//! multiple of [`SIZE_CLASS_STEP`] bytes and served from a per-class pool of
//! recycled `String` buffers, so create/remove churn does not go back to the
//! global allocator for every name.

use std::borrow::Borrow;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use fdir_types::{make_error_msg, MetaCode, Result, StatusCode};
use fdir_utils::{ObjectPool, PoolGuard};
use serde::Serialize;

pub const NAME_MAX: usize = 255;
pub const SIZE_CLASS_STEP: usize = 8;
const NUM_SIZE_CLASSES: usize = (NAME_MAX + SIZE_CLASS_STEP) / SIZE_CLASS_STEP;

#[derive(Default)]
struct AllocCounters {
    used_bytes: AtomicUsize,
    live_names: AtomicUsize,
    total_allocs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NameAllocatorStats {
    pub used_bytes: usize,
    pub live_names: usize,
    pub total_allocs: u64,
    pub pooled_buffers: usize,
}

pub struct NameAllocator {
    classes: Vec<ObjectPool<String>>,
    counters: Arc<AllocCounters>,
    limit: usize,
}

/// Reject names that cannot appear as a single path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return make_error_msg(StatusCode::INVALID_ARG, format!("invalid name {:?}", name));
    }
    if name.len() > NAME_MAX {
        return make_error_msg(
            MetaCode::NAME_TOO_LONG,
            format!("name of {} bytes exceeds {}", name.len(), NAME_MAX),
        );
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return make_error_msg(StatusCode::INVALID_ARG, format!("invalid name {:?}", name));
    }
    Ok(())
}

fn class_index(len: usize) -> usize {
    len.max(1).saturating_sub(1) / SIZE_CLASS_STEP
}

impl NameAllocator {
    /// `limit` caps the bytes of live names, 0 disables the cap.
    pub fn new(limit: usize, pool_capacity: usize) -> Self {
        let classes = (0..NUM_SIZE_CLASSES)
            .map(|i| {
                let bytes = (i + 1) * SIZE_CLASS_STEP;
                ObjectPool::with_recycle(
                    pool_capacity,
                    move || String::with_capacity(bytes),
                    String::clear,
                )
            })
            .collect();
        Self {
            classes,
            counters: Arc::new(AllocCounters::default()),
            limit,
        }
    }

    /// Copy a validated segment into pooled storage.
    pub fn alloc(&self, name: &str) -> Result<Name> {
        validate_name(name)?;
        self.alloc_raw(name)
    }

    /// Copy `name` without segment validation. Used for the root entry.
    pub(crate) fn alloc_raw(&self, name: &str) -> Result<Name> {
        let class = class_index(name.len()).min(NUM_SIZE_CLASSES - 1);
        let class_bytes = (class + 1) * SIZE_CLASS_STEP;
        self.reserve(class_bytes)?;

        let mut buf = self.classes[class].acquire();
        buf.push_str(name);
        self.counters.live_names.fetch_add(1, Ordering::Relaxed);
        self.counters.total_allocs.fetch_add(1, Ordering::Relaxed);
        Ok(Name {
            buf,
            class_bytes,
            counters: Arc::clone(&self.counters),
        })
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let limit = self.limit;
        let reserved = self
            .counters
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used + bytes;
                (limit == 0 || next <= limit).then_some(next)
            });
        match reserved {
            Ok(_) => Ok(()),
            Err(used) => make_error_msg(
                StatusCode::NOT_ENOUGH_MEMORY,
                format!("name allocator exhausted: {} of {} bytes in use", used, limit),
            ),
        }
    }

    pub fn stats(&self) -> NameAllocatorStats {
        NameAllocatorStats {
            used_bytes: self.counters.used_bytes.load(Ordering::Relaxed),
            live_names: self.counters.live_names.load(Ordering::Relaxed),
            total_allocs: self.counters.total_allocs.load(Ordering::Relaxed),
            pooled_buffers: self.classes.iter().map(|p| p.len()).sum(),
        }
    }
}

/// An entry name owned by the allocator; the buffer returns to its pool on drop.
pub struct Name {
    buf: PoolGuard<String>,
    class_bytes: usize,
    counters: Arc<AllocCounters>,
}

impl Name {
    pub fn as_str(&self) -> &str {
        self.buf.as_str()
    }
}

impl Drop for Name {
    fn drop(&mut self) {
        self.counters
            .used_bytes
            .fetch_sub(self.class_bytes, Ordering::AcqRel);
        self.counters.live_names.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::ops::Deref for Name {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
