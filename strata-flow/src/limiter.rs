//! Count-based admission limiter.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Limit applied when a caller configures a negative capacity.
pub const DEFAULT_LIMIT: i64 = 100;

/// An admission token source.
///
/// The one dynamic interface of the routing core: future strategies (rate
/// limiting, leaky bucket) slot in behind the same three operations.
pub trait Limiter: Send + Sync {
    /// Tries to take a slot. Returns true when granted. Atomic with respect
    /// to concurrent callers: two acquisitions cannot both be granted the
    /// last slot.
    fn acquire(&self) -> bool;

    /// Returns a slot. Pairs with a granted [`Self::acquire`]; an unpaired
    /// release is tolerated but raises the effective limit.
    fn release(&self);

    /// Remaining capacity, as a fuzzy snapshot.
    fn running(&self) -> i64;
}

/// Limiter over a fixed slot count.
///
/// A signed counter holds the free-slot count. Acquire is a fetch-sub with
/// rollback on under-run, so the counter may dip below zero transiently but
/// no caller observes a grant without a slot.
pub struct CountLimiter {
    slots: AtomicI64,
}

impl CountLimiter {
    /// Creates a limiter with `limit` slots. A negative `limit` falls back
    /// to [`DEFAULT_LIMIT`].
    #[must_use]
    pub const fn new(limit: i64) -> Self {
        let limit = if limit < 0 { DEFAULT_LIMIT } else { limit };
        Self {
            slots: AtomicI64::new(limit),
        }
    }

    /// Creates a shared limiter handle.
    #[must_use]
    pub fn shared(limit: i64) -> Arc<dyn Limiter> {
        Arc::new(Self::new(limit))
    }
}

impl Limiter for CountLimiter {
    fn acquire(&self) -> bool {
        if self.slots.fetch_sub(1, Ordering::AcqRel) >= 1 {
            return true;
        }
        self.slots.fetch_add(1, Ordering::AcqRel);
        false
    }

    fn release(&self) {
        self.slots.fetch_add(1, Ordering::AcqRel);
    }

    fn running(&self) -> i64 {
        self.slots.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CountLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountLimiter")
            .field("slots", &self.running())
            .finish()
    }
}

/// A granted slot that releases itself when dropped.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<dyn Limiter>,
}

impl Permit {
    /// Tries to acquire a slot from `limiter`; `None` when refused.
    #[must_use]
    pub fn try_acquire(limiter: &Arc<dyn Limiter>) -> Option<Self> {
        limiter.acquire().then(|| Self {
            limiter: Arc::clone(limiter),
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl fmt::Debug for dyn Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("running", &self.running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_acquire_exhausts() {
        let limiter = CountLimiter::shared(1);
        assert!(limiter.acquire());
        assert!(!limiter.acquire());
    }

    #[test]
    fn test_release_restores_slot() {
        let limiter = CountLimiter::shared(1);
        assert!(limiter.acquire());
        assert_eq!(limiter.running(), 0);
        limiter.release();
        assert_eq!(limiter.running(), 1);
    }

    #[test]
    fn test_running_tracks_slots() {
        let limiter = CountLimiter::shared(10);
        assert!(limiter.acquire());
        assert_eq!(limiter.running(), 9);
        assert!(limiter.acquire());
        assert_eq!(limiter.running(), 8);
        limiter.release();
        assert_eq!(limiter.running(), 9);
        limiter.release();
        assert_eq!(limiter.running(), 10);
    }

    #[test]
    fn test_negative_limit_uses_default() {
        let limiter = CountLimiter::new(-5);
        assert_eq!(limiter.running(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_unpaired_release_raises_limit() {
        let limiter = CountLimiter::shared(1);
        limiter.release();
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let limiter = CountLimiter::shared(1);
        {
            let permit = Permit::try_acquire(&limiter);
            assert!(permit.is_some());
            assert!(Permit::try_acquire(&limiter).is_none());
        }
        assert!(Permit::try_acquire(&limiter).is_some());
    }

    #[test]
    fn test_concurrent_acquire_grants_exactly_capacity() {
        // Capacity 2, many threads racing: never more than 2 grants
        // outstanding at once.
        let limiter = CountLimiter::shared(2);
        let granted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        if limiter.acquire() {
                            let now =
                                granted.fetch_add(1, Ordering::AcqRel) + 1;
                            assert!(now <= 2, "more grants than slots");
                            granted.fetch_sub(1, Ordering::AcqRel);
                            limiter.release();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("limiter thread panicked");
        }
        assert_eq!(limiter.running(), 2);
    }

    #[test]
    fn test_three_contenders_capacity_two() {
        // Exactly two of three immediate acquisitions are granted; after
        // one release the next acquisition is granted again.
        let limiter = CountLimiter::shared(2);
        let results: Vec<bool> = (0..3).map(|_| limiter.acquire()).collect();
        assert_eq!(results.iter().filter(|granted| **granted).count(), 2);
        limiter.release();
        assert!(limiter.acquire());
    }
}
