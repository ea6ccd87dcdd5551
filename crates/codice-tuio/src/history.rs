//! Bounded per-marker record of state transitions.

use crate::MarkerState;
use std::time::Instant;

/// Number of state transitions kept per tracked marker.
pub const HISTORY_CAPACITY: usize = 10;

/// One recorded state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub state: MarkerState,
    pub at: Instant,
}

/// Fixed-capacity ring that overwrites its oldest entry when full.
#[derive(Clone, Debug)]
pub struct HistoryRing<T: Copy, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    len: usize,
}

impl<T: Copy, const N: usize> Default for HistoryRing<T, N> {
    fn default() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            len: 0,
        }
    }
}

impl<T: Copy, const N: usize> HistoryRing<T, N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: T) {
        if N == 0 {
            return;
        }
        let idx = (self.head + self.len) % N;
        self.slots[idx] = Some(value);
        if self.len < N {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % N;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        N
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % N])
    }

    pub fn latest(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.head + self.len - 1) % N]
    }
}

/// State history of one tracked marker.
pub type StateHistory = HistoryRing<HistoryEntry, HISTORY_CAPACITY>;
