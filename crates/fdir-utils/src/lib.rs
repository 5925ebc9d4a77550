pub mod background_runner;
pub mod clock;
pub mod object_pool;
pub mod shards;

pub use background_runner::BackgroundRunner;
pub use clock::{Clock, ManualClock, SystemClock};
pub use object_pool::{ObjectPool, PoolGuard};
pub use shards::Shards;
