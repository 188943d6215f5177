//! Time-ordered bounded buffer of packages.
//!
//! Every node owns one. Entries stay sorted ascending by `time`; equal
//! timestamps keep insertion order. When the buffer holds more than `length`
//! packages the oldest ones are dropped, so only the most recent `length`
//! packages by time survive.

use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::packet::Package;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TimeBuffer {
    entries: VecDeque<Package>,
    length: usize,
}

impl TimeBuffer {
    /// Create a buffer holding at most `length` packages (minimum 1).
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        Self {
            entries: VecDeque::with_capacity(length + 1),
            length,
        }
    }

    /// Insert in time order, then drop the oldest entries beyond capacity.
    pub fn append(&mut self, package: Package) {
        let idx = self.entries.partition_point(|p| p.time <= package.time);
        self.entries.insert(idx, package);
        self.truncate();
    }

    /// Remove and return the earliest package.
    pub fn pop_front(&mut self) -> NodeResult<Package> {
        self.entries.pop_front().ok_or(NodeError::EmptyBuffer)
    }

    /// Change the capacity. Excess entries are dropped oldest-first.
    pub fn set_length(&mut self, length: usize) {
        self.length = length.max(1);
        self.truncate();
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.length
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Most recent package, if any.
    pub fn back(&self) -> Option<&Package> {
        self.entries.back()
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.entries.iter()
    }

    /// Copy of the current window, oldest-first.
    pub fn to_vec(&self) -> Vec<Package> {
        self.entries.iter().cloned().collect()
    }

    fn truncate(&mut self) {
        while self.entries.len() > self.length {
            self.entries.pop_front();
        }
    }
}

impl Default for TimeBuffer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<'a> IntoIterator for &'a TimeBuffer {
    type Item = &'a Package;
    type IntoIter = std::collections::vec_deque::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
