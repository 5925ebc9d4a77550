//! fdir-meta-service: in-memory metadata engine of the fdir directory server.
//!
//! Architecture:
//! - [`context::ServerContext`] - process-scoped owner of everything below
//! - [`namespace::DentryTree`] - one directory tree per namespace
//! - [`inode_index::InodeIndex`] - sharded identifier index, hosting lock state
//! - [`flock::FlockEntry`] - advisory byte-range locks plus the system lock
//! - [`name_alloc::NameAllocator`] - pooled, accounted storage for entry names
//! - [`delay_free::DelayFreeQueue`] - grace-period reclamation of unlinked objects
//! - [`list_cache::ListCache`] - paged directory listing sessions

pub mod config;
pub mod context;
pub mod delay_free;
pub mod dentry;
pub mod flock;
pub mod inode_index;
pub mod list_cache;
pub mod name_alloc;
pub mod namespace;
pub mod path_resolve;
pub mod record;

pub use config::MetaServerConfig;
pub use context::{ContextStats, CreateRequest, ReclaimReport, ServerContext};
pub use dentry::{Dentry, DentryInfo, DentryStat};
pub use flock::{FlockConflict, FlockOwner, FlockRequest, LockRange, LockStatus, LockType};
pub use inode_index::{FlockApplied, FlockHandle, SizeUpdate, SysLockReleased, Wakeup};
pub use list_cache::ListPage;
pub use record::{DentryFieldFlags, DentryUpdate, SetSizeParams};
