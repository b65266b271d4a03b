//! Outbound request admission control.
//!
//! A counting semaphore bounds the number of in-flight requests. The bound
//! (the "ceiling") starts at a configured value and only ever shrinks: each
//! rate-limit response lowers it by 10%, rounded up, never below 1.
//!
//! The 10% cut is applied to an exact fractional budget and the ceiling is
//! that budget rounded up, so small ceilings keep shrinking under repeated
//! rate limiting instead of sticking at the first rounded value.
//!
//! Shrinking forgets free permits right away. Permits still held by
//! in-flight requests are recorded as debt and forgotten when those slots
//! are released, so new admissions respect the lowered ceiling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use wikifetch_core::Error;

#[derive(Debug)]
struct Budget {
    exact: f64,
    ceiling: usize,
    debt: usize,
}

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    budget: Mutex<Budget>,
    in_flight: AtomicUsize,
}

/// Shared request budget. Clones refer to the same budget.
#[derive(Debug, Clone)]
pub struct RequestThrottle {
    inner: Arc<Inner>,
}

/// An admitted request. Dropping it releases the slot.
#[derive(Debug)]
pub struct RequestSlot {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<Inner>,
}

/// Budget after one rate-limit response: `max(old * 0.9, 1)`.
pub fn shrunk_budget(old: f64) -> f64 {
    (old * 0.9).max(1.0)
}

fn ceiling_of(exact: f64) -> usize {
    (exact.ceil() as usize).max(1)
}

impl RequestThrottle {
    /// Budget starting at `ceiling`, clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(ceiling)),
                budget: Mutex::new(Budget { exact: ceiling as f64, ceiling, debt: 0 }),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait until the in-flight count is below the ceiling, then take a slot.
    ///
    /// Waiters are not guaranteed to be served in arrival order.
    pub async fn claim(&self) -> Result<RequestSlot, Error> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ThrottleClosed)?;
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(RequestSlot { permit: Some(permit), inner: self.inner.clone() })
    }

    /// Lower the ceiling after a rate-limit response. Returns the new ceiling.
    pub fn shrink(&self) -> usize {
        let mut budget = self.inner.budget.lock().unwrap_or_else(PoisonError::into_inner);
        let old = budget.ceiling;
        budget.exact = shrunk_budget(budget.exact);
        let new = ceiling_of(budget.exact).min(old);
        let delta = old - new;
        if delta > 0 {
            let forgotten = self.inner.semaphore.forget_permits(delta);
            budget.debt += delta - forgotten;
            budget.ceiling = new;
        }
        tracing::info!(from = old, to = new, "received a rate-limit response, lowering request ceiling");
        new
    }

    pub fn ceiling(&self) -> usize {
        self.inner.budget.lock().unwrap_or_else(PoisonError::into_inner).ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut budget = self.inner.budget.lock().unwrap_or_else(PoisonError::into_inner);
        if budget.debt > 0
            && let Some(permit) = self.permit.take()
        {
            budget.debt -= 1;
            permit.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::time::Duration;

    #[test]
    fn test_single_shrink_rounds_up() {
        assert_eq!(RequestThrottle::new(10).shrink(), 9);
        assert_eq!(RequestThrottle::new(100).shrink(), 90);
        assert_eq!(RequestThrottle::new(11).shrink(), 10);
        assert_eq!(RequestThrottle::new(5).shrink(), 5);
        assert_eq!(RequestThrottle::new(1).shrink(), 1);
    }

    #[test]
    fn test_repeated_shrinks_keep_lowering_small_ceilings() {
        let throttle = RequestThrottle::new(10);
        let seen: Vec<usize> = (0..5).map(|_| throttle.shrink()).collect();
        // 9.0, 8.1, 7.29, 6.561, 5.9049 rounded up
        assert_eq!(seen, vec![9, 9, 8, 7, 6]);

        for _ in 0..50 {
            throttle.shrink();
        }
        assert_eq!(throttle.ceiling(), 1);
    }

    #[test]
    fn test_huge_ceiling_clamped_to_semaphore_limit() {
        let throttle = RequestThrottle::new(usize::MAX);
        assert_eq!(throttle.ceiling(), Semaphore::MAX_PERMITS);
        assert!(throttle.shrink() < Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_ceiling_never_grows_or_drops_below_one() {
        let throttle = RequestThrottle::new(40);
        let mut last = throttle.ceiling();
        for _ in 0..100 {
            let next = throttle.shrink();
            assert!(next <= last);
            assert!(next >= 1);
            last = next;
        }
    }

    #[test]
    fn test_zero_ceiling_clamped() {
        assert_eq!(RequestThrottle::new(0).ceiling(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_ceiling() {
        let throttle = &RequestThrottle::new(3);
        let peak = &AtomicUsize::new(0);

        join_all((0..30).map(|_| async move {
            let _slot = throttle.claim().await.unwrap();
            peak.fetch_max(throttle.in_flight(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }))
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let throttle = RequestThrottle::new(1);
        let slot = throttle.claim().await.unwrap();
        assert_eq!(throttle.in_flight(), 1);
        assert!(tokio::time::timeout(Duration::from_millis(20), throttle.claim()).await.is_err());

        drop(slot);
        assert_eq!(throttle.in_flight(), 0);
        assert!(tokio::time::timeout(Duration::from_millis(20), throttle.claim()).await.is_ok());
    }

    #[tokio::test]
    async fn test_shrink_while_saturated_pays_debt_on_release() {
        let throttle = RequestThrottle::new(10);
        let mut slots = Vec::new();
        for _ in 0..10 {
            slots.push(throttle.claim().await.unwrap());
        }

        assert_eq!(throttle.shrink(), 9);

        // One held permit is owed back, so releasing it must not admit anyone.
        slots.pop();
        assert_eq!(throttle.in_flight(), 9);
        assert!(tokio::time::timeout(Duration::from_millis(20), throttle.claim()).await.is_err());

        slots.pop();
        let admitted = tokio::time::timeout(Duration::from_millis(20), throttle.claim()).await;
        assert!(admitted.is_ok());
        assert_eq!(throttle.in_flight(), 9);
    }

    #[tokio::test]
    async fn test_shrink_with_free_permits_applies_immediately() {
        let throttle = RequestThrottle::new(10);
        throttle.shrink();

        let mut slots = Vec::new();
        for _ in 0..9 {
            slots.push(throttle.claim().await.unwrap());
        }
        assert!(tokio::time::timeout(Duration::from_millis(20), throttle.claim()).await.is_err());
    }
}
