use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe byte counter that never goes negative.
///
/// Withdrawals either take the full amount or leave the counter untouched,
/// so a failed claim has no side effects.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Attempts to take `amount` from the counter.
    ///
    /// Returns `false` and leaves the value unchanged if fewer than `amount`
    /// units remain.
    pub fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    /// Returns `amount` to the counter.
    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    /// Raises the counter to `value` if it is currently lower.
    ///
    /// Used for high-water marks.
    pub fn raise_to(&self, value: u64) {
        self.0.fetch_max(value, Ordering::AcqRel);
    }

    /// Returns the counter value (possibly stale under concurrent use).
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
