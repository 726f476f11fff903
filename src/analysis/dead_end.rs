// Dead-end blocks: blocks from which no path reaches a `return`.
//
// Computed by walking predecessor edges backwards from every returning block. Anything
// the walk never touches ends in `unreachable` or loops forever.

use crate::ir::{BlockId, Function, Terminator};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct DeadEndBlocks {
    reaches_exit: HashSet<BlockId>,
}

impl DeadEndBlocks {
    pub fn compute(function: &Function) -> Self {
        let mut reaches_exit = HashSet::new();
        let mut worklist: VecDeque<BlockId> = function
            .blocks()
            .filter(|b| matches!(function.block(*b).terminator, Terminator::Return { .. }))
            .collect();
        while let Some(block) = worklist.pop_front() {
            if !reaches_exit.insert(block) {
                continue;
            }
            for pred in function.predecessors(block) {
                if !reaches_exit.contains(&pred) {
                    worklist.push_back(pred);
                }
            }
        }
        Self { reaches_exit }
    }

    pub fn is_dead_end(&self, block: BlockId) -> bool {
        !self.reaches_exit.contains(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn test_unreachable_branch_is_dead_end() {
        let mut b = FunctionBuilder::new("f");
        let cond = b.literal("c", Type::leaf("Bool", false));
        let trap = b.block("trap");
        let spin = b.block("spin");
        let done = b.block("done");
        let entry = b.entry();
        b.cond_br(cond, trap, done);
        b.position_at_end(trap);
        b.cond_br(cond, spin, trap);
        b.position_at_end(spin);
        b.unreachable();
        b.position_at_end(done);
        b.ret(None);
        let function = b.finish();

        let dead_ends = DeadEndBlocks::compute(&function);
        assert!(!dead_ends.is_dead_end(entry));
        assert!(!dead_ends.is_dead_end(done));
        assert!(dead_ends.is_dead_end(trap));
        assert!(dead_ends.is_dead_end(spin));
    }
}
