// Block dominance over a function's CFG.
//
// Blocks that cannot be reached from the entry have no dominators and are never
// reported as dominated by anything, themselves included.

use crate::ir::{BlockId, Function, InstId};
use petgraph::algo::dominators::{simple_fast, Dominators};

#[derive(Debug, Clone)]
pub struct DominanceInfo {
    dominators: Dominators<BlockId>,
    entry: BlockId,
}

impl DominanceInfo {
    pub fn compute(function: &Function) -> Self {
        Self {
            dominators: simple_fast(&function.cfg, function.entry),
            entry: function.entry,
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        block == self.entry || self.dominators.immediate_dominator(block).is_some()
    }

    /// Does every path from the entry to `dominated` pass through `dominator`?
    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        if !self.is_reachable(dominated) {
            return false;
        }
        match self.dominators.dominators(dominated) {
            Some(mut chain) => chain.any(|block| block == dominator),
            None => false,
        }
    }

    pub fn properly_dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        dominator != dominated && self.dominates(dominator, dominated)
    }

    /// Instruction-level dominance: same block compares positions.
    pub fn inst_dominates(&self, function: &Function, dominator: InstId, dominated: InstId) -> bool {
        let a = function.inst(dominator).block;
        let b = function.inst(dominated).block;
        if a == b {
            return function.position_in_block(dominator) <= function.position_in_block(dominated);
        }
        self.dominates(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn test_diamond_dominance() {
        let mut b = FunctionBuilder::new("diamond");
        let cond = b.literal("c", Type::leaf("Bool", false));
        let left = b.block("left");
        let right = b.block("right");
        let join = b.block("join");
        let entry = b.entry();
        b.cond_br(cond, left, right);
        b.position_at_end(left);
        b.br(join);
        b.position_at_end(right);
        b.br(join);
        b.position_at_end(join);
        b.ret(None);
        let function = b.finish();

        let dom = DominanceInfo::compute(&function);
        assert!(dom.dominates(entry, join));
        assert!(dom.dominates(join, join));
        assert!(!dom.dominates(left, join));
        assert!(!dom.dominates(right, join));
        assert!(dom.properly_dominates(entry, left));
        assert!(!dom.properly_dominates(join, join));
    }

    #[test]
    fn test_unreachable_block_is_not_dominated() {
        let mut b = FunctionBuilder::new("dead");
        let dead = b.block("dead");
        let entry = b.entry();
        b.ret(None);
        b.position_at_end(dead);
        b.ret(None);
        let function = b.finish();

        let dom = DominanceInfo::compute(&function);
        assert!(dom.is_reachable(entry));
        assert!(!dom.is_reachable(dead));
        assert!(!dom.dominates(entry, dead));
        assert!(!dom.dominates(dead, dead));
    }
}
