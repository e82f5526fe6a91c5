//! Out-of-order tolerant id sequence.

use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug)]
struct SequenceState {
    highest_gapless: u64,
    pending: BTreeSet<u64>,
}

/// Tracks the highest id `n` such that every id up to `n` has been offered.
///
/// Ids may be offered in any order. An id above the gapless number is held
/// back until the gap below it closes.
#[derive(Debug)]
pub struct OutOfOrderSequence {
    state: Mutex<SequenceState>,
}

impl OutOfOrderSequence {
    /// Creates a sequence whose highest gapless number is `initial`.
    #[must_use]
    pub fn new(initial: u64) -> Self {
        Self {
            state: Mutex::new(SequenceState {
                highest_gapless: initial,
                pending: BTreeSet::new(),
            }),
        }
    }

    /// Offers an id. Returns true if the highest gapless number moved.
    pub fn offer(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        if id <= state.highest_gapless {
            return false;
        }
        if id != state.highest_gapless + 1 {
            state.pending.insert(id);
            return false;
        }
        state.highest_gapless = id;
        loop {
            let next = state.highest_gapless + 1;
            if !state.pending.remove(&next) {
                break;
            }
            state.highest_gapless = next;
        }
        true
    }

    /// Returns the highest gapless number.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.state.lock().highest_gapless
    }

    /// Resets the sequence to `id`, forgetting pending ids.
    pub fn set(&self, id: u64) {
        let mut state = self.state.lock();
        state.highest_gapless = id;
        state.pending.clear();
    }
}
