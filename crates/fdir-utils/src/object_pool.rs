use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// A bounded free list of reusable objects backed by a crossbeam `ArrayQueue`.
///
/// Objects come back through [`PoolGuard`]'s drop. `recycle` resets an
/// object before it is parked; objects that do not fit are dropped.
pub struct ObjectPool<T: Default> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    queue: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    recycle: Box<dyn Fn(&mut T) + Send + Sync>,
}

impl<T: Default> ObjectPool<T> {
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_recycle(capacity, factory, |_| {})
    }

    pub fn with_recycle(
        capacity: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
        recycle: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                queue: ArrayQueue::new(capacity.max(1)),
                factory: Box::new(factory),
                recycle: Box::new(recycle),
            }),
        }
    }

    /// Pre-populate the pool, stopping once it is full.
    pub fn fill(&self, count: usize) {
        for _ in 0..count {
            if self.inner.queue.push((self.inner.factory)()).is_err() {
                break;
            }
        }
    }

    /// Take a parked object, or build a fresh one when none is parked.
    pub fn acquire(&self) -> PoolGuard<T> {
        let value = self
            .inner
            .queue
            .pop()
            .unwrap_or_else(|| (self.inner.factory)());
        PoolGuard {
            value,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }
}

impl<T: Default> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Owns one pooled object and parks it again on drop.
pub struct PoolGuard<T: Default> {
    value: T,
    pool: Arc<PoolInner<T>>,
}

impl<T: Default> std::ops::Deref for PoolGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Default> std::ops::DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Default> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        let mut obj = std::mem::take(&mut self.value);
        (self.pool.recycle)(&mut obj);
        let _ = self.pool.queue.push(obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_return() {
        let pool = ObjectPool::with_recycle(4, || String::with_capacity(64), String::clear);
        pool.fill(2);
        assert_eq!(pool.len(), 2);

        {
            let mut buf = pool.acquire();
            buf.push_str("abc");
            assert_eq!(&**buf, "abc");
            assert_eq!(pool.len(), 1);
        }
        assert_eq!(pool.len(), 2);
        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 64);
    }

    #[test]
    fn test_acquire_when_empty() {
        let pool = ObjectPool::new(2, || 7i32);
        assert!(pool.is_empty());
        assert_eq!(*pool.acquire(), 7);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let pool = ObjectPool::new(1, Vec::<u8>::new);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.len(), 1);
        pool.fill(5);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_clone_shares_pool() {
        let pool = ObjectPool::new(4, || 0i32);
        pool.fill(2);
        let pool2 = pool.clone();
        let _guard = pool2.acquire();
        assert_eq!(pool.len(), 1);
    }
}
