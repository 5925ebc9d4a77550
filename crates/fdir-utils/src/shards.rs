use parking_lot::{Mutex, MutexGuard};

/// A fixed set of independently locked partitions.
///
/// Callers choose the partition themselves; `Shards` only owns the locks.
pub struct Shards<T> {
    shards: Vec<Mutex<T>>,
}

impl<T> Shards<T> {
    /// Build `num_shards` partitions, `init` receives the partition index.
    pub fn new(num_shards: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let shards = (0..num_shards.max(1)).map(|i| Mutex::new(init(i))).collect();
        Self { shards }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn lock(&self, index: usize) -> MutexGuard<'_, T> {
        self.shards[index % self.shards.len()].lock()
    }

    pub fn for_each(&self, mut f: impl FnMut(usize, &mut T)) {
        for (i, shard) in self.shards.iter().enumerate() {
            f(i, &mut shard.lock());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_receives_index() {
        let shards = Shards::new(4, |i| i * 10);
        assert_eq!(shards.num_shards(), 4);
        assert_eq!(*shards.lock(2), 20);
        assert_eq!(*shards.lock(6), 20);
    }

    #[test]
    fn test_zero_shards_rounds_up() {
        let shards = Shards::new(0, |_| 0u8);
        assert_eq!(shards.num_shards(), 1);
    }

    #[test]
    fn test_for_each_visits_all() {
        let shards = Shards::new(3, |_| 0usize);
        shards.for_each(|i, v| *v = i + 1);
        let mut sum = 0;
        shards.for_each(|_, v| sum += *v);
        assert_eq!(sum, 6);
    }

    #[test]
    fn test_concurrent_increments() {
        let shards = Shards::new(8, |_| 0u64);
        std::thread::scope(|s| {
            for t in 0..4 {
                let shards = &shards;
                s.spawn(move || {
                    for i in 0..1000usize {
                        *shards.lock(i + t) += 1;
                    }
                });
            }
        });
        let mut total = 0;
        shards.for_each(|_, v| total += *v);
        assert_eq!(total, 4000);
    }
}
