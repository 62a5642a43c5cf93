/// Hooks called by the traversal loop. The `()` implementation does nothing and
/// compiles away.
pub trait Counters {
    fn node(&mut self) {}
    fn leaf(&mut self) {}
    fn primitive(&mut self) {}
    fn instance(&mut self) {}
    /// Called with the stack length after every push.
    fn stack(&mut self, _len: usize) {}

    /// Fold in the counts of another traversal, e.g. one from a different thread.
    fn merge(&mut self, _other: Self)
    where
        Self: Sized,
    {
    }
}

impl Counters for () {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes: usize,
    pub leaves: usize,
    pub primitives: usize,
    pub instances: usize,
    pub max_stack: usize,
}

impl Counters for TraversalStats {
    #[inline]
    fn node(&mut self) {
        self.nodes += 1;
    }

    #[inline]
    fn leaf(&mut self) {
        self.leaves += 1;
    }

    #[inline]
    fn primitive(&mut self) {
        self.primitives += 1;
    }

    #[inline]
    fn instance(&mut self) {
        self.instances += 1;
    }

    #[inline]
    fn stack(&mut self, len: usize) {
        self.max_stack = self.max_stack.max(len);
    }

    fn merge(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.leaves += other.leaves;
        self.primitives += other.primitives;
        self.instances += other.instances;
        self.max_stack = self.max_stack.max(other.max_stack);
    }
}
