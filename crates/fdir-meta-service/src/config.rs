//! Configuration for the metadata engine.

use fdir_config::{check_min, from_toml_section, Config, ConfigError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaServerConfig {
    /// Bucket count of the inode index.
    pub inode_hashtable_capacity: u64,

    /// Number of shard locks guarding the inode index buckets.
    pub inode_shared_locks_count: usize,

    /// Per-directory fanout limit.
    pub max_entries_per_dir: usize,

    /// Maximum number of segments in a path.
    pub max_path_count: usize,

    /// Grace period before an unlinked entry is physically freed.
    pub delay_free_seconds: i64,

    /// Period of the reclaim sweep.
    pub reclaim_interval_secs: u64,

    /// Bytes of live name storage allowed, 0 for no limit.
    pub name_allocator_limit: usize,

    /// Recycled name buffers kept per size class.
    pub name_pool_capacity: usize,

    /// Live lock requests allowed per index shard, 0 for no limit.
    pub max_lock_tasks_per_shard: usize,

    pub list_page_size: usize,

    pub list_cache_ttl_secs: i64,
}

impl Default for MetaServerConfig {
    fn default() -> Self {
        Self {
            inode_hashtable_capacity: 1_403_641,
            inode_shared_locks_count: 163,
            max_entries_per_dir: 16 * 1024,
            max_path_count: 128,
            delay_free_seconds: 3600,
            reclaim_interval_secs: 1,
            name_allocator_limit: 0,
            name_pool_capacity: 16 * 1024,
            max_lock_tasks_per_shard: 0,
            list_page_size: 4096,
            list_cache_ttl_secs: 60,
        }
    }
}

impl Config for MetaServerConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        from_toml_section(value)
    }

    fn hot_update(&mut self, other: &Self) {
        self.max_entries_per_dir = other.max_entries_per_dir;
        self.list_page_size = other.list_page_size;
        self.list_cache_ttl_secs = other.list_cache_ttl_secs;
    }

    fn render(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_min("inode_hashtable_capacity", self.inode_hashtable_capacity, 1)?;
        check_min("inode_shared_locks_count", self.inode_shared_locks_count, 1)?;
        if self.inode_shared_locks_count as u64 > self.inode_hashtable_capacity {
            return Err(ConfigError::OutOfRange {
                field: "inode_shared_locks_count".into(),
                value: self.inode_shared_locks_count.to_string(),
                min: Some("1".into()),
                max: Some(self.inode_hashtable_capacity.to_string()),
            });
        }
        check_min("max_entries_per_dir", self.max_entries_per_dir, 1)?;
        check_min("max_path_count", self.max_path_count, 1)?;
        check_min("delay_free_seconds", self.delay_free_seconds, 0)?;
        check_min("reclaim_interval_secs", self.reclaim_interval_secs, 1)?;
        check_min("list_page_size", self.list_page_size, 1)?;
        check_min("list_cache_ttl_secs", self.list_cache_ttl_secs, 1)?;
        Ok(())
    }
}
