//! A bare test-and-set lock.
//!
//! Kernel singletons use `spin::Mutex`; this is for callers that need to hold
//! exclusion across calls without owning a guard.

use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Default)]
pub struct Lock {
    locked: AtomicBool,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is free, then claims it.
    pub fn acquire(&self) {
        loop {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
            if self.try_acquire() {
                return;
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(lock.is_locked());
        assert!(!lock.try_acquire());

        lock.release();
        assert!(!lock.is_locked());
        assert!(lock.try_acquire());
    }

    #[test]
    fn excludes_other_threads() {
        struct Shared {
            lock: Lock,
            counter: core::cell::UnsafeCell<u64>,
        }
        unsafe impl Sync for Shared {}

        let shared = Arc::new(Shared {
            lock: Lock::new(),
            counter: core::cell::UnsafeCell::new(0),
        });

        let handles: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        shared.lock.acquire();
                        unsafe { *shared.counter.get() += 1 };
                        shared.lock.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(unsafe { *shared.counter.get() }, 4000);
    }
}
