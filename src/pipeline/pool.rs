//! # Bounded resource pools
//!
//! A [`ResourcePool`] owns a fixed number of reusable items. Items move out of the
//! pool on [`acquire`](ResourcePool::acquire) / [`try_acquire`](ResourcePool::try_acquire)
//! and back in on [`release`](ResourcePool::release); there is never more than
//! `capacity` of them checked out, which is what bounds the pipeline's memory.
//!
//! Backpressure is driven by pool occupancy. When a release brings the free count up
//! to the pool's resume threshold, the registered release hook is invoked (after the
//! pool lock is dropped) so that a paused producer can be rescheduled.

use std::sync::Arc;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::error::{ResourceError, Result};

/// Items that can be recycled through a [`ResourcePool`]
pub trait Reusable {
    /// Returns the item to a clean state; called on every release
    fn reset(&mut self);
}

/// Callback fired when a release brings the free count up to a threshold
pub type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

struct PoolState<T> {
    free: Vec<T>,
    outstanding: usize,
    peak_outstanding: usize,
}

struct HookEntry {
    threshold: usize,
    hook: ReleaseHook,
}

/// A bounded, thread-safe object pool
pub struct ResourcePool<T> {
    name: &'static str,
    capacity: usize,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    hook: Mutex<Option<HookEntry>>,
}
impl<T: Reusable> ResourcePool<T> {
    /// Creates a pool holding `capacity` items built by `factory`
    pub fn new<F: FnMut() -> T>(name: &'static str, capacity: usize, factory: F) -> Self {
        Self::from_items(name, std::iter::repeat_with(factory).take(capacity).collect())
    }

    /// Creates a pool from pre-built items; the capacity is the number of items
    #[must_use]
    pub fn from_items(name: &'static str, items: Vec<T>) -> Self {
        Self {
            name,
            capacity: items.len(),
            state: Mutex::new(PoolState {
                free: items,
                outstanding: 0,
                peak_outstanding: 0,
            }),
            available: Condvar::new(),
            hook: Mutex::new(None),
        }
    }

    /// Registers `hook` to run whenever a release brings the free count up to `threshold`
    ///
    /// The threshold is clamped to `1..=capacity`. Replaces any previous hook.
    pub fn set_release_hook(&self, threshold: usize, hook: ReleaseHook) {
        let threshold = threshold.clamp(1, self.capacity.max(1));
        *self.hook.lock() = Some(HookEntry { threshold, hook });
    }

    /// Takes an item out of the pool, blocking the calling thread until one is free
    ///
    /// Only the top-level driver calls this; stage handlers use [`Self::try_acquire`].
    pub fn acquire(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = Self::checkout(&mut state) {
                return item;
            }
            self.available.wait(&mut state);
        }
    }

    /// Takes an item out of the pool if one is immediately available
    pub fn try_acquire(&self) -> Option<T> {
        let item = Self::checkout(&mut self.state.lock());
        if item.is_none() {
            trace!("{} pool exhausted", self.name);
        }
        item
    }

    fn checkout(state: &mut PoolState<T>) -> Option<T> {
        let item = state.free.pop()?;
        state.outstanding += 1;
        state.peak_outstanding = state.peak_outstanding.max(state.outstanding);
        Some(item)
    }

    /// Returns an item to the pool
    ///
    /// The item is reset before it becomes available again. Releasing more items than
    /// were acquired is an internal fault and reported as [`ResourceError::OverRelease`].
    pub fn release(&self, mut item: T) -> Result<()> {
        item.reset();
        let free = {
            let mut state = self.state.lock();
            if state.outstanding == 0 {
                return Err(ResourceError::OverRelease(self.name).into());
            }
            state.outstanding -= 1;
            state.free.push(item);
            state.free.len()
        };
        self.available.notify_one();

        let hook = self
            .hook
            .lock()
            .as_ref()
            .filter(|entry| entry.threshold == free)
            .map(|entry| Arc::clone(&entry.hook));
        if let Some(hook) = hook {
            trace!("{} pool reached {free} free items", self.name);
            hook();
        }
        Ok(())
    }
}
impl<T> ResourcePool<T> {
    /// Number of items currently in the pool
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Number of items checked out of the pool
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Highest number of items that were ever checked out at the same time
    pub fn peak_outstanding(&self) -> usize {
        self.state.lock().peak_outstanding
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Scratch(Vec<u8>);
    impl Reusable for Scratch {
        fn reset(&mut self) {
            self.0.clear();
        }
    }

    #[test]
    fn test_try_acquire_respects_capacity() -> anyhow::Result<()> {
        let pool = ResourcePool::new("scratch", 2, Scratch::default);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.outstanding(), 2);

        pool.release(a)?;
        pool.release(b)?;
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.peak_outstanding(), 2);
        Ok(())
    }

    #[test]
    fn test_release_resets_item() -> anyhow::Result<()> {
        let pool = ResourcePool::new("scratch", 1, Scratch::default);
        let mut item = pool.acquire();
        item.0.extend_from_slice(b"dirty");
        pool.release(item)?;
        assert!(pool.acquire().0.is_empty());
        Ok(())
    }

    #[test]
    fn test_over_release_is_an_error() {
        let pool = ResourcePool::new("scratch", 1, Scratch::default);
        let err = pool.release(Scratch::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceError(ResourceError::OverRelease("scratch"))
        ));
    }

    #[test]
    fn test_hook_fires_on_threshold_crossing() -> anyhow::Result<()> {
        let pool = ResourcePool::new("scratch", 4, Scratch::default);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        pool.set_release_hook(
            1,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let items: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
        for item in items {
            pool.release(item)?;
        }
        // Only the 0 -> 1 transition crosses the threshold
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_acquire_blocks_until_release() -> anyhow::Result<()> {
        let pool = Arc::new(ResourcePool::new("scratch", 1, Scratch::default));
        let held = pool.acquire();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let item = pool.acquire();
                pool.release(item).is_ok()
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        pool.release(held)?;
        assert!(waiter.join().unwrap());
        assert_eq!(pool.free_count(), 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_use_never_exceeds_capacity() {
        let pool = Arc::new(ResourcePool::new("scratch", 3, Scratch::default));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(item) = pool.try_acquire() {
                            assert!(pool.outstanding() <= 3);
                            pool.release(item).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.peak_outstanding() <= 3);
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.outstanding(), 0);
    }
}
