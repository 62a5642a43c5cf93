use crate::bvh::ChildRef;

/// Fixed capacity stack of node references.
///
/// The bottom entry is always the sentinel, so popping an exhausted stack yields
/// the sentinel and ends the current space. Instance boundaries push another
/// sentinel on top of the parent space's pending nodes.
#[derive(Clone, Debug)]
pub struct TraversalStack<const N: usize> {
    entries: [ChildRef; N],
    len: usize,
}

impl<const N: usize> TraversalStack<N> {
    pub fn new() -> Self {
        Self {
            entries: [ChildRef::SENTINEL; N],
            len: 1,
        }
    }

    #[inline]
    pub fn push(&mut self, node: ChildRef) {
        debug_assert!(self.len < N, "traversal stack overflow");

        self.entries[self.len] = node;
        self.len += 1;
    }

    /// Remove and return the top entry, the base sentinel once nothing else is left.
    #[inline]
    pub fn pop(&mut self) -> ChildRef {
        if self.len <= 1 {
            return ChildRef::SENTINEL;
        }

        self.len -= 1;
        self.entries[self.len]
    }

    /// True when only the base sentinel is left.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len <= 1
    }

    /// Number of entries, the base sentinel included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl<const N: usize> Default for TraversalStack<N> {
    fn default() -> Self {
        Self::new()
    }
}
