//! Identity types for the pipeline system.
//!
//! A `NodeId` is the node's position in its pipeline's node arena, assigned in
//! build order. Because nodes are built only after all of their upstream
//! nodes, a smaller id never depends on a larger one.

use std::fmt;

/// Index into `Pipeline::nodes`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<usize> for NodeId {
    fn from(idx: usize) -> Self {
        NodeId(idx as u32)
    }
}
