//! Bounded history of recent generations.

use std::collections::VecDeque;

use crate::materializer::GenerationResult;

/// Default number of results kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity ring of results, newest first.
#[derive(Debug, Clone)]
pub struct RecentGenerations {
    entries: VecDeque<GenerationResult>,
    capacity: usize,
}

impl RecentGenerations {
    /// Creates an empty history. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepends a result, evicting the oldest one when full.
    pub fn push(&mut self, result: GenerationResult) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(result);
    }

    pub fn latest(&self) -> Option<&GenerationResult> {
        self.entries.front()
    }

    /// Iterates newest first.
    pub fn iter(&self) -> impl Iterator<Item = &GenerationResult> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<GenerationResult> {
        self.entries.iter().cloned().collect()
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

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for RecentGenerations {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
