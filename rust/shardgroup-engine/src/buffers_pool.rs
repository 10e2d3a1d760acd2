use std::{
    ops::{Deref, DerefMut},
    sync::Mutex,
};

use shardgroup_common::Result;
use shardgroup_memory::{MemoryReservationContext, Reservation};

/// Scratch space for streaming one chunk of documents.
#[derive(Default)]
pub struct ScratchBuffers {
    pub doc_ids: Vec<u32>,
    pub values: Vec<i64>,
    pub groups: Vec<u32>,
}

impl ScratchBuffers {
    pub(crate) fn new(size: usize) -> Self {
        ScratchBuffers {
            doc_ids: vec![0; size],
            values: vec![0; size],
            groups: vec![0; size],
        }
    }

    /// Bytes held by one set of `size` entries.
    pub fn bytes_for(size: usize) -> u64 {
        (size * (4 + 8 + 4)) as u64
    }
}

/// Pool of fixed-size scratch buffer sets owned by one engine.
///
/// The memory for the first set is reserved up front; additional sets are
/// reserved when they are created and released when the pool drops them.
pub struct BuffersPool {
    size: usize,
    max_pooled: usize,
    memory: MemoryReservationContext,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<ScratchBuffers>,
    reservation: Reservation,
}

impl BuffersPool {
    pub fn new(size: usize, max_pooled: usize, memory: &MemoryReservationContext) -> Result<Self> {
        let reservation = memory.reserve(ScratchBuffers::bytes_for(size))?;
        Ok(BuffersPool {
            size,
            max_pooled: max_pooled.max(1),
            memory: memory.clone(),
            state: Mutex::new(PoolState {
                free: vec![ScratchBuffers::new(size)],
                reservation,
            }),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Bytes currently reserved for pooled and checked-out buffer sets.
    pub fn reserved_bytes(&self) -> u64 {
        self.state.lock().unwrap().reservation.amount()
    }

    /// Checks out a buffer set, creating one if the pool is empty.
    pub fn get_buffers(&self) -> Result<BufferPoolRef<'_>> {
        let mut state = self.state.lock().unwrap();
        let buffers = match state.free.pop() {
            Some(buffers) => buffers,
            None => {
                state.reservation.grow(ScratchBuffers::bytes_for(self.size))?;
                ScratchBuffers::new(self.size)
            }
        };
        Ok(BufferPoolRef {
            pool: self,
            buffers,
        })
    }

    fn return_buffers(&self, buffers: ScratchBuffers) {
        let mut state = self.state.lock().unwrap();
        if state.free.len() < self.max_pooled {
            state.free.push(buffers);
        } else {
            let keep = state.reservation.amount() - ScratchBuffers::bytes_for(self.size);
            state.reservation.shrink_to(keep);
        }
    }
}

impl std::fmt::Debug for BuffersPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuffersPool")
            .field("size", &self.size)
            .field("max_pooled", &self.max_pooled)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

/// A buffer set on loan from a [`BuffersPool`], returned when dropped.
pub struct BufferPoolRef<'a> {
    pool: &'a BuffersPool,
    buffers: ScratchBuffers,
}

impl Deref for BufferPoolRef<'_> {
    type Target = ScratchBuffers;

    fn deref(&self) -> &ScratchBuffers {
        &self.buffers
    }
}

impl DerefMut for BufferPoolRef<'_> {
    fn deref_mut(&mut self) -> &mut ScratchBuffers {
        &mut self.buffers
    }
}

impl Drop for BufferPoolRef<'_> {
    fn drop(&mut self) {
        let buffers = std::mem::take(&mut self.buffers);
        self.pool.return_buffers(buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let memory = MemoryReservationContext::unbounded();
        let pool = BuffersPool::new(16, 2, &memory).unwrap();
        assert_eq!(memory.used(), 16 * 16);
        {
            let mut buffers = pool.get_buffers().unwrap();
            assert_eq!(buffers.doc_ids.len(), 16);
            buffers.values[3] = 7;
        }
        let buffers = pool.get_buffers().unwrap();
        assert_eq!(buffers.values[3], 7);
        assert_eq!(memory.used(), 16 * 16);
    }

    #[test]
    fn test_extra_sets_are_reserved_and_released() {
        let memory = MemoryReservationContext::unbounded();
        let pool = BuffersPool::new(8, 1, &memory).unwrap();
        let per_set = ScratchBuffers::bytes_for(8);
        let first = pool.get_buffers().unwrap();
        let second = pool.get_buffers().unwrap();
        assert_eq!(memory.used(), 2 * per_set);
        drop(first);
        drop(second);
        // Only one set stays pooled.
        assert_eq!(memory.used(), per_set);
        assert_eq!(pool.reserved_bytes(), per_set);
        drop(pool);
        assert_eq!(memory.used(), 0);
    }

    #[test]
    fn test_checkout_fails_without_memory() {
        let memory = MemoryReservationContext::new(ScratchBuffers::bytes_for(4));
        let pool = BuffersPool::new(4, 1, &memory).unwrap();
        let _held = pool.get_buffers().unwrap();
        assert!(matches!(pool.get_buffers(), Err(e) if e.is_out_of_memory()));
    }
}
