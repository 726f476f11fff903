// Post-order numbering of the blocks reachable from the entry.

use crate::ir::{BlockId, Function};
use petgraph::visit::DfsPostOrder;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PostOrder {
    order: Vec<BlockId>,
    numbers: HashMap<BlockId, usize>,
}

impl PostOrder {
    pub fn compute(function: &Function) -> Self {
        let mut order = Vec::new();
        let mut dfs = DfsPostOrder::new(&function.cfg, function.entry);
        while let Some(block) = dfs.next(&function.cfg) {
            order.push(block);
        }
        let numbers = order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        Self { order, numbers }
    }

    pub fn number(&self, block: BlockId) -> Option<usize> {
        self.numbers.get(&block).copied()
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.numbers.contains_key(&block)
    }

    pub fn post_order(&self) -> &[BlockId] {
        &self.order
    }

    /// Reverse post-order: every block comes after its dominators, and after all of its
    /// predecessors except along back edges.
    pub fn reverse_post_order(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order.iter().rev().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
