//! Record id allocation.

use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct IdState {
    high_id: u64,
    free: BTreeSet<u64>,
}

/// Hands out record ids: freed ids first, then the high id.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Creates a generator from a rebuilt high id and free list.
    #[must_use]
    pub fn new(high_id: u64, free: BTreeSet<u64>) -> Self {
        Self {
            state: Mutex::new(IdState { high_id, free }),
        }
    }

    /// Allocates an id.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_first() {
            return id;
        }
        let id = state.high_id;
        state.high_id += 1;
        id
    }

    /// Records that `id` is in use, raising the high id if needed.
    pub fn mark_used(&self, id: u64) {
        let mut state = self.state.lock();
        state.free.remove(&id);
        if id >= state.high_id {
            state.high_id = id + 1;
        }
    }

    /// Replaces the state with that of `rebuilt`.
    pub fn reset_from(&self, rebuilt: Self) {
        *self.state.lock() = rebuilt.state.into_inner();
    }

    /// Returns `id` for reuse.
    pub fn free_id(&self, id: u64) {
        let mut state = self.state.lock();
        if id < state.high_id {
            state.free.insert(id);
        }
    }

    /// Returns one past the highest id ever handed out or marked used.
    #[must_use]
    pub fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    /// Returns the number of ids waiting for reuse.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }
}
