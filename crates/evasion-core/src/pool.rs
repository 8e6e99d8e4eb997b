//! Bounded worker pool for build-and-evaluate tasks.

use anyhow::{anyhow, Result};
use rayon::prelude::*;

/// Dedicated rayon pool sized to the configured parallelism.
///
/// Tasks never run on the global rayon pool, so the bound holds even when the
/// host process uses rayon elsewhere.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("evasion-worker-{}", i))
            .build()
            .map_err(|e| anyhow!("Failed to build worker pool: {}", e))?;
        Ok(Self { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over `items` on the pool. Results keep the order of `items`;
    /// `f` receives each item's position, usable as a distinct attempt index.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        self.pool
            .install(|| items.par_iter().enumerate().map(|(i, item)| f(i, item)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_map_preserves_order() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<u32> = (0..64).collect();
        let out = pool.map(&items, |i, v| (i, v * 2));
        for (i, (idx, doubled)) in out.into_iter().enumerate() {
            assert_eq!(idx, i);
            assert_eq!(doubled, i as u32 * 2);
        }
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2).unwrap();
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items = vec![(); 16];
        pool.map(&items, |_, _| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_zero_size_means_one_worker() {
        assert_eq!(WorkerPool::new(0).unwrap().size(), 1);
    }
}
