//! Byte-level memory accounting for regroup sessions.
//!
//! A [`MemoryPool`] is the process-wide ceiling. Every session gets a
//! [`MemoryReservationContext`] carved out of the pool with its own limit;
//! each claim made through a context is charged to the context and to
//! every ancestor, and succeeds only when all of them have room.
//!
//! Callers either pair [`MemoryReservationContext::claim`] with
//! [`MemoryReservationContext::release`] by hand, or take a [`Reservation`]
//! guard that hands the bytes back when dropped.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

/// The root of a memory accounting tree.
#[derive(Clone)]
pub struct MemoryPool(Arc<PoolNode>);

impl MemoryPool {
    /// Creates a pool that can hand out at most `limit` bytes.
    pub fn new(limit: u64) -> MemoryPool {
        MemoryPool(PoolNode::new_root(limit))
    }

    /// Creates a pool with no practical limit.
    pub fn unbounded() -> MemoryPool {
        MemoryPool::new(u64::MAX)
    }

    /// Creates a session context that may claim up to `limit` bytes, where
    /// every claim also counts against this pool.
    pub fn context(&self, limit: u64) -> MemoryReservationContext {
        MemoryReservationContext(self.0.create_child(limit))
    }

    pub fn limit(&self) -> u64 {
        self.0.limit
    }

    /// Bytes currently claimed from the pool by all of its contexts.
    ///
    /// Diagnostic only: the value may be outdated under concurrent use.
    pub fn used(&self) -> u64 {
        self.0.used()
    }

    pub fn remaining(&self) -> u64 {
        self.0.remaining.read()
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("limit", &self.0.limit)
            .field("used", &self.used())
            .finish()
    }
}

/// A bounded byte counter owned by one session.
///
/// Cloning yields another handle to the same counter.
#[derive(Clone)]
pub struct MemoryReservationContext(Arc<PoolNode>);

impl MemoryReservationContext {
    /// Creates a standalone context with the given limit and no parent pool.
    pub fn new(limit: u64) -> MemoryReservationContext {
        MemoryReservationContext(PoolNode::new_root(limit))
    }

    /// Creates a standalone context with no practical limit.
    pub fn unbounded() -> MemoryReservationContext {
        MemoryReservationContext::new(u64::MAX)
    }

    /// Tries to claim `bytes`. Never fails loudly: returns `false` and leaves
    /// every counter untouched when the limit would be exceeded.
    pub fn claim(&self, bytes: u64) -> bool {
        self.0.allocate(bytes)
    }

    /// Returns bytes previously obtained through [`claim`](Self::claim).
    pub fn release(&self, bytes: u64) {
        self.0.release(bytes);
    }

    /// Claims `bytes` and wraps them in a guard that releases them on drop.
    pub fn reserve(&self, bytes: u64) -> Result<Reservation, OutOfMemory> {
        if self.0.allocate(bytes) {
            Ok(Reservation {
                node: self.0.clone(),
                amount: bytes,
            })
        } else {
            Err(OutOfMemory {
                requested: bytes,
                remaining: self.remaining(),
            })
        }
    }

    pub fn limit(&self) -> u64 {
        self.0.limit
    }

    /// Bytes currently claimed through this context.
    pub fn used(&self) -> u64 {
        self.0.used()
    }

    /// Highest value `used()` ever reached.
    pub fn max_used(&self) -> u64 {
        self.0.peak.read()
    }

    pub fn remaining(&self) -> u64 {
        self.0.remaining.read()
    }
}

impl std::fmt::Debug for MemoryReservationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryReservationContext")
            .field("limit", &self.0.limit)
            .field("used", &self.used())
            .field("max_used", &self.max_used())
            .finish()
    }
}

/// Claimed bytes that go back to their context when the guard is dropped.
pub struct Reservation {
    node: Arc<PoolNode>,
    amount: u64,
}

impl Reservation {
    /// Currently reserved amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Claims `additional` bytes on top of the current amount.
    pub fn grow(&mut self, additional: u64) -> Result<(), OutOfMemory> {
        if self.node.allocate(additional) {
            self.amount += additional;
            Ok(())
        } else {
            Err(OutOfMemory {
                requested: additional,
                remaining: self.node.remaining.read(),
            })
        }
    }

    /// Shrinks the reservation to `amount`, releasing the difference.
    /// Does nothing if `amount` is not smaller than the current amount.
    pub fn shrink_to(&mut self, amount: u64) {
        if amount < self.amount {
            self.node.release(self.amount - amount);
            self.amount = amount;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.node.release(self.amount);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// A claim that would have pushed a context (or one of its ancestors)
/// over its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutOfMemory {
    pub requested: u64,
    pub remaining: u64,
}

impl std::fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to claim {} bytes ({} remaining)",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for OutOfMemory {}

struct PoolNode {
    /// Claims succeed only if the parent (and its ancestors) can also cover them.
    parent: Option<Arc<PoolNode>>,
    limit: u64,
    remaining: Counter,
    peak: Counter,
}

impl PoolNode {
    fn new_root(limit: u64) -> Arc<PoolNode> {
        Arc::new(PoolNode {
            parent: None,
            limit,
            remaining: Counter::new(limit),
            peak: Counter::new(0),
        })
    }

    fn create_child(self: &Arc<Self>, limit: u64) -> Arc<PoolNode> {
        Arc::new(PoolNode {
            parent: Some(self.clone()),
            limit,
            remaining: Counter::new(limit),
            peak: Counter::new(0),
        })
    }

    fn used(&self) -> u64 {
        self.limit - self.remaining.read()
    }

    fn allocate(&self, amount: u64) -> bool {
        if amount == 0 {
            return true;
        }
        if !self.remaining.withdraw(amount) {
            return false;
        }
        if let Some(parent) = self.parent.as_deref() {
            if !parent.allocate(amount) {
                self.remaining.deposit(amount);
                return false;
            }
        }
        self.peak.raise_to(self.used());
        true
    }

    fn release(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        debug_assert!(amount <= self.used(), "released more than claimed");
        if let Some(parent) = self.parent.as_deref() {
            parent.release(amount);
        }
        self.remaining.deposit(amount);
    }
}
