//! Fixed-capacity ring buffer backing every history the controllers keep.

use std::collections::VecDeque;

use serde::Serialize;

/// Keeps the most recent `capacity` entries; pushing past capacity evicts the
/// oldest.
#[derive(Debug, Clone, Serialize)]
pub struct RollingHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.entries.retain(f);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl RollingHistory<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.iter().sum::<f64>() / self.entries.len() as f64)
    }
}
