//! Paged directory listing.
//!
//! A listing snapshots a directory's ordered children once and serves it
//! page by page under a token. The snapshot keeps `Arc`s to the entries, so
//! a concurrent remove only unlinks them; the reclaim grace period outlives
//! any session.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fdir_types::{make_error_msg, ListToken, MetaCode, Result, StatusCode};
use fdir_utils::Clock;
use serde::{Deserialize, Serialize};

use crate::dentry::{Dentry, DentryInfo};

struct ListSession {
    entries: Vec<Arc<Dentry>>,
    expires: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    /// Present while more pages remain.
    pub token: Option<ListToken>,
    pub entries: Vec<DentryInfo>,
    /// Offset of the page following this one.
    pub next_offset: usize,
    pub is_last: bool,
}

pub struct ListCache {
    sessions: DashMap<ListToken, ListSession>,
    next_token: AtomicU64,
    page_size: AtomicUsize,
    ttl_secs: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl ListCache {
    pub fn new(page_size: usize, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            next_token: AtomicU64::new(0),
            page_size: AtomicUsize::new(page_size.max(1)),
            ttl_secs: AtomicI64::new(ttl_secs),
            clock,
        }
    }

    pub fn set_limits(&self, page_size: usize, ttl_secs: i64) {
        self.page_size.store(page_size.max(1), Ordering::Relaxed);
        self.ttl_secs.store(ttl_secs, Ordering::Relaxed);
    }

    /// Serve the first page; a session is kept only if more pages remain.
    pub fn start(&self, entries: Vec<Arc<Dentry>>) -> ListPage {
        let page_size = self.page_size.load(Ordering::Relaxed);
        if entries.len() <= page_size {
            return ListPage {
                token: None,
                next_offset: entries.len(),
                entries: entries.iter().map(|d| d.info()).collect(),
                is_last: true,
            };
        }

        let token = ListToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        let page = page_of(&entries, 0, page_size);
        let expires = self.expiry();
        tracing::debug!(%token, total = entries.len(), "list: session started");
        self.sessions.insert(token, ListSession { entries, expires });
        ListPage {
            token: Some(token),
            next_offset: page_size,
            entries: page,
            is_last: false,
        }
    }

    /// Serve the page starting at `offset`. Serving a page extends the
    /// session; the last page ends it.
    pub fn next(&self, token: ListToken, offset: usize) -> Result<ListPage> {
        let now = self.clock.now_secs();
        let page_size = self.page_size.load(Ordering::Relaxed);
        let Some(mut session) = self.sessions.get_mut(&token) else {
            return make_error_msg(MetaCode::NOT_FOUND, format!("list token {}", token));
        };
        if session.expires <= now {
            drop(session);
            self.sessions.remove(&token);
            return make_error_msg(MetaCode::NOT_FOUND, format!("list token {} expired", token));
        }
        let total = session.entries.len();
        if offset > total {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("offset {} beyond {} entries", offset, total),
            );
        }

        let entries = page_of(&session.entries, offset, page_size);
        let next_offset = offset + entries.len();
        let is_last = next_offset >= total;
        session.expires = self.expiry();
        drop(session);
        if is_last {
            self.sessions.remove(&token);
        }
        Ok(ListPage {
            token: (!is_last).then_some(token),
            entries,
            next_offset,
            is_last,
        })
    }

    /// Drop sessions expired at `now`.
    pub fn purge(&self, now: i64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn expiry(&self) -> i64 {
        self.clock
            .now_secs()
            .saturating_add(self.ttl_secs.load(Ordering::Relaxed))
    }
}

fn page_of(entries: &[Arc<Dentry>], offset: usize, page_size: usize) -> Vec<DentryInfo> {
    entries
        .iter()
        .skip(offset)
        .take(page_size)
        .map(|d| d.info())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::{DentryStat, S_IFREG};
    use crate::name_alloc::NameAllocator;
    use fdir_types::{Gid, InodeId, Uid};
    use fdir_utils::ManualClock;

    fn entries(alloc: &NameAllocator, n: u64) -> Vec<Arc<Dentry>> {
        (0..n)
            .map(|i| {
                Arc::new(Dentry::new(
                    InodeId(10 + i),
                    alloc.alloc(&format!("e{:03}", i)).unwrap(),
                    DentryStat::new(S_IFREG, Uid(0), Gid(0), 1),
                ))
            })
            .collect()
    }

    fn names(page: &ListPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_small_listing_has_no_session() {
        let alloc = NameAllocator::new(0, 4);
        let cache = ListCache::new(4, 60, Arc::new(ManualClock::new(0)));
        let page = cache.start(entries(&alloc, 3));
        assert!(page.is_last);
        assert!(page.token.is_none());
        assert_eq!(names(&page), vec!["e000", "e001", "e002"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_paging_until_last() {
        let alloc = NameAllocator::new(0, 4);
        let cache = ListCache::new(2, 60, Arc::new(ManualClock::new(0)));
        let first = cache.start(entries(&alloc, 5));
        let token = first.token.unwrap();
        assert_eq!(names(&first), vec!["e000", "e001"]);
        assert_eq!(cache.len(), 1);

        let second = cache.next(token, first.next_offset).unwrap();
        assert_eq!(names(&second), vec!["e002", "e003"]);
        // Re-requesting a page is allowed.
        let again = cache.next(token, first.next_offset).unwrap();
        assert_eq!(again, second);

        let last = cache.next(token, second.next_offset).unwrap();
        assert_eq!(names(&last), vec!["e004"]);
        assert!(last.is_last);
        assert!(last.token.is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.next(token, 4).unwrap_err().code(), MetaCode::NOT_FOUND);
    }

    #[test]
    fn test_offset_out_of_range() {
        let alloc = NameAllocator::new(0, 4);
        let cache = ListCache::new(2, 60, Arc::new(ManualClock::new(0)));
        let token = cache.start(entries(&alloc, 3)).token.unwrap();
        assert_eq!(cache.next(token, 9).unwrap_err().code(), StatusCode::INVALID_ARG);
    }

    #[test]
    fn test_expiry_and_purge() {
        let alloc = NameAllocator::new(0, 4);
        let clock = Arc::new(ManualClock::new(100));
        let cache = ListCache::new(1, 10, clock.clone());
        let a = cache.start(entries(&alloc, 3)).token.unwrap();
        let b = cache.start(entries(&alloc, 3)).token.unwrap();
        assert_ne!(a, b);

        clock.advance(5);
        cache.next(b, 1).unwrap();
        clock.advance(5);
        assert_eq!(cache.next(a, 1).unwrap_err().code(), MetaCode::NOT_FOUND);
        // b was refreshed at 105.
        assert_eq!(cache.purge(clock.now_secs()), 0);
        assert_eq!(cache.purge(115), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_entries_alive() {
        let alloc = NameAllocator::new(0, 4);
        let cache = ListCache::new(1, 60, Arc::new(ManualClock::new(0)));
        let list = entries(&alloc, 2);
        let weak = Arc::downgrade(&list[1]);
        let token = cache.start(list).token.unwrap();
        assert!(weak.upgrade().is_some());
        let last = cache.next(token, 1).unwrap();
        assert_eq!(last.entries[0].inode, InodeId(11));
        assert!(weak.upgrade().is_none());
    }
}
