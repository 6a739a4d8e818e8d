//! Process-wide concurrency admission control.
//!
//! The request path must never exceed `maxConcurrentRequests` in-flight
//! forwards. [`AdmissionLimiter`] is a thin atomic counter; [`AdmissionGuard`]
//! is the RAII handle that guarantees the counter is decremented on every
//! exit path (success, timeout, early rejection) without the caller having
//! to remember to do so.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-wide in-flight request counter with a fixed capacity.
#[derive(Clone)]
pub struct AdmissionLimiter {
    inner: Arc<AdmissionInner>,
}

struct AdmissionInner {
    current: AtomicUsize,
    max_concurrent: usize,
}

impl AdmissionLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(AdmissionInner {
                current: AtomicUsize::new(0),
                max_concurrent,
            }),
        }
    }

    /// Attempt to admit a request. Returns `None` if the limiter is at
    /// capacity; otherwise returns a guard that releases the slot on drop.
    pub fn try_acquire(&self) -> Option<AdmissionGuard> {
        loop {
            let current = self.inner.current.load(Ordering::Acquire);
            if current >= self.inner.max_concurrent {
                return None;
            }
            if self
                .inner
                .current
                .compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(AdmissionGuard {
                    inner: self.inner.clone(),
                });
            }
        }
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

/// Holds one admitted slot; decrements the shared counter when dropped.
pub struct AdmissionGuard {
    inner: Arc<AdmissionInner>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = AdmissionLimiter::new(2);
        let g1 = limiter.try_acquire().expect("first admit");
        let g2 = limiter.try_acquire().expect("second admit");
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.current(), 2);
        drop(g1);
        assert_eq!(limiter.current(), 1);
        let g3 = limiter.try_acquire().expect("slot freed after drop");
        drop(g2);
        drop(g3);
        assert_eq!(limiter.current(), 0);
    }

    #[test]
    fn guard_releases_on_every_drop_path() {
        let limiter = AdmissionLimiter::new(1);
        {
            let _guard = limiter.try_acquire().unwrap();
            assert_eq!(limiter.current(), 1);
        }
        assert_eq!(limiter.current(), 0);
    }
}
