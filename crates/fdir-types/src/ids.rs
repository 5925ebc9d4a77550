strong_type!(InodeId, u64);
strong_type!(FtaskId, u64);
strong_type!(ListToken, u64);
strong_type!(RequestTag, u64);
strong_type!(Uid, u32);
strong_type!(Gid, u32);

impl InodeId {
    /// Identifier that never names a live entry.
    pub const INVALID: InodeId = InodeId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}
