//! Field updates applied to indexed entries.

use std::ops::{BitOr, BitOrAssign};

use fdir_types::{Gid, InodeId, Uid};
use serde::{Deserialize, Serialize};

use crate::dentry::DentryStat;

/// Bitmask of entry fields touched by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DentryFieldFlags(u32);

impl DentryFieldFlags {
    pub const NONE: Self = Self(0);
    pub const MODE: Self = Self(1 << 0);
    pub const ATIME: Self = Self(1 << 1);
    pub const CTIME: Self = Self(1 << 2);
    pub const MTIME: Self = Self(1 << 3);
    pub const UID: Self = Self(1 << 4);
    pub const GID: Self = Self(1 << 5);
    pub const FILE_SIZE: Self = Self(1 << 6);
    pub const SPACE_END: Self = Self(1 << 7);
    pub const INC_ALLOC: Self = Self(1 << 8);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DentryFieldFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DentryFieldFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Size/allocation report for one file, typically from a data server.
///
/// `flags` selects which of `FILE_SIZE`, `SPACE_END` and `INC_ALLOC` to
/// consider; `MTIME` is implied by `FILE_SIZE` whether or not the size moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSizeParams {
    pub inode: InodeId,
    pub file_size: u64,
    pub inc_alloc: i64,
    pub force: bool,
    pub flags: DentryFieldFlags,
}

impl SetSizeParams {
    /// Apply the monotone-unless-forced size policy. Returns fields changed.
    pub(crate) fn apply_to(&self, stat: &mut DentryStat, now: i64) -> DentryFieldFlags {
        let mut modified = DentryFieldFlags::NONE;
        let advances = |current: u64| self.force || current < self.file_size;

        if self.flags.contains(DentryFieldFlags::FILE_SIZE)
            && advances(stat.size)
            && stat.size != self.file_size
        {
            stat.size = self.file_size;
            modified |= DentryFieldFlags::FILE_SIZE;
        }
        // Any size report touches mtime, even a stale one.
        if self.flags.intersects(DentryFieldFlags::FILE_SIZE | DentryFieldFlags::MTIME)
            && stat.mtime != now
        {
            stat.mtime = now;
            modified |= DentryFieldFlags::MTIME;
        }
        if self.flags.contains(DentryFieldFlags::SPACE_END)
            && advances(stat.space_end)
            && stat.space_end != self.file_size
        {
            stat.space_end = self.file_size;
            modified |= DentryFieldFlags::SPACE_END;
        }
        if self.flags.contains(DentryFieldFlags::INC_ALLOC) {
            stat.alloc += self.inc_alloc;
            modified |= DentryFieldFlags::INC_ALLOC;
        }
        modified
    }
}

/// A change record from the replication log. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentryUpdate {
    pub inode: InodeId,
    pub mode: Option<u32>,
    pub atime: Option<i64>,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub uid: Option<Uid>,
    pub gid: Option<Gid>,
    pub size: Option<u64>,
    pub space_end: Option<u64>,
    pub inc_alloc: Option<i64>,
}

impl DentryUpdate {
    pub(crate) fn apply_to(&self, stat: &mut DentryStat) -> DentryFieldFlags {
        let mut modified = DentryFieldFlags::NONE;
        let mut set = |flag: DentryFieldFlags, changed: bool| {
            if changed {
                modified |= flag;
            }
        };
        if let Some(mode) = self.mode {
            set(DentryFieldFlags::MODE, stat.mode != mode);
            stat.mode = mode;
        }
        if let Some(atime) = self.atime {
            set(DentryFieldFlags::ATIME, stat.atime != atime);
            stat.atime = atime;
        }
        if let Some(ctime) = self.ctime {
            set(DentryFieldFlags::CTIME, stat.ctime != ctime);
            stat.ctime = ctime;
        }
        if let Some(mtime) = self.mtime {
            set(DentryFieldFlags::MTIME, stat.mtime != mtime);
            stat.mtime = mtime;
        }
        if let Some(uid) = self.uid {
            set(DentryFieldFlags::UID, stat.uid != uid);
            stat.uid = uid;
        }
        if let Some(gid) = self.gid {
            set(DentryFieldFlags::GID, stat.gid != gid);
            stat.gid = gid;
        }
        if let Some(size) = self.size {
            set(DentryFieldFlags::FILE_SIZE, stat.size != size);
            stat.size = size;
        }
        if let Some(space_end) = self.space_end {
            set(DentryFieldFlags::SPACE_END, stat.space_end != space_end);
            stat.space_end = space_end;
        }
        if let Some(inc) = self.inc_alloc {
            set(DentryFieldFlags::INC_ALLOC, inc != 0);
            stat.alloc += inc;
        }
        modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_params(file_size: u64, force: bool, flags: DentryFieldFlags) -> SetSizeParams {
        SetSizeParams {
            inode: InodeId(9),
            file_size,
            inc_alloc: 0,
            force,
            flags,
        }
    }

    #[test]
    fn test_flags_ops() {
        let f = DentryFieldFlags::FILE_SIZE | DentryFieldFlags::MTIME;
        assert!(f.contains(DentryFieldFlags::MTIME));
        assert!(!f.contains(DentryFieldFlags::SPACE_END));
        assert!(f.intersects(DentryFieldFlags::MTIME | DentryFieldFlags::UID));
        assert!(DentryFieldFlags::NONE.is_empty());
        assert_eq!(f.bits(), (1 << 6) | (1 << 3));
    }

    #[test]
    fn test_size_never_regresses_unless_forced() {
        let mut stat = DentryStat::default();
        let modified = size_params(100, false, DentryFieldFlags::FILE_SIZE).apply_to(&mut stat, 5);
        assert_eq!(stat.size, 100);
        assert_eq!(stat.mtime, 5);
        assert_eq!(modified, DentryFieldFlags::FILE_SIZE | DentryFieldFlags::MTIME);

        let modified = size_params(40, false, DentryFieldFlags::FILE_SIZE).apply_to(&mut stat, 6);
        assert_eq!(stat.size, 100);
        assert_eq!(stat.mtime, 6);
        assert_eq!(modified, DentryFieldFlags::MTIME);

        let modified = size_params(40, true, DentryFieldFlags::FILE_SIZE).apply_to(&mut stat, 7);
        assert_eq!(stat.size, 40);
        assert_eq!(stat.mtime, 7);
        assert!(modified.contains(DentryFieldFlags::FILE_SIZE));
    }

    #[test]
    fn test_same_size_is_not_a_change() {
        let mut stat = DentryStat {
            size: 10,
            mtime: 3,
            ..Default::default()
        };
        let modified = size_params(10, true, DentryFieldFlags::FILE_SIZE).apply_to(&mut stat, 3);
        assert!(modified.is_empty());

        let modified = size_params(10, false, DentryFieldFlags::FILE_SIZE).apply_to(&mut stat, 4);
        assert_eq!(stat.size, 10);
        assert_eq!(stat.mtime, 4);
        assert_eq!(modified, DentryFieldFlags::MTIME);
    }

    #[test]
    fn test_space_end_and_alloc() {
        let mut stat = DentryStat::default();
        let params = SetSizeParams {
            inode: InodeId(9),
            file_size: 4096,
            inc_alloc: 8,
            force: false,
            flags: DentryFieldFlags::SPACE_END | DentryFieldFlags::INC_ALLOC,
        };
        let modified = params.apply_to(&mut stat, 1);
        assert_eq!(stat.space_end, 4096);
        assert_eq!(stat.alloc, 8);
        assert_eq!(stat.size, 0);
        assert_eq!(modified, DentryFieldFlags::SPACE_END | DentryFieldFlags::INC_ALLOC);

        // Allocation always accumulates; space_end stays monotone.
        let params = SetSizeParams {
            file_size: 1024,
            ..params
        };
        let modified = params.apply_to(&mut stat, 2);
        assert_eq!(stat.space_end, 4096);
        assert_eq!(stat.alloc, 16);
        assert_eq!(modified, DentryFieldFlags::INC_ALLOC);
    }

    #[test]
    fn test_explicit_mtime_flag() {
        let mut stat = DentryStat::default();
        let modified = size_params(0, false, DentryFieldFlags::MTIME).apply_to(&mut stat, 42);
        assert_eq!(stat.mtime, 42);
        assert_eq!(modified, DentryFieldFlags::MTIME);
    }

    #[test]
    fn test_update_applies_present_fields_only() {
        let mut stat = DentryStat {
            mode: 0o100644,
            uid: Uid(1),
            alloc: 10,
            ..Default::default()
        };
        let update = DentryUpdate {
            inode: InodeId(9),
            mode: Some(0o100600),
            uid: Some(Uid(1)),
            size: Some(77),
            inc_alloc: Some(-4),
            ..Default::default()
        };
        let modified = update.apply_to(&mut stat);
        assert_eq!(stat.mode, 0o100600);
        assert_eq!(stat.size, 77);
        assert_eq!(stat.alloc, 6);
        assert_eq!(stat.gid, Gid(0));
        assert_eq!(
            modified,
            DentryFieldFlags::MODE | DentryFieldFlags::FILE_SIZE | DentryFieldFlags::INC_ALLOC
        );
    }
}
