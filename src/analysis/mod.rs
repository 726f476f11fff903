// Function-level analyses consumed by the move-only checkers.
//
// All four are pure functions of the CFG and instruction list. Rewrites that only add or
// remove instructions keep dominance, post-order and dead-end results valid; a rewrite
// that touches terminators must recompute the bundle.

pub mod dead_end;
pub mod dominance;
pub mod non_local_access;
pub mod post_order;

pub use dead_end::DeadEndBlocks;
pub use dominance::DominanceInfo;
pub use non_local_access::NonLocalAccessInfo;
pub use post_order::PostOrder;

use crate::debug_println;
use crate::ir::{BlockId, Function};

#[derive(Debug, Clone)]
pub struct FunctionAnalyses {
    pub dominance: DominanceInfo,
    pub post_order: PostOrder,
    pub dead_ends: DeadEndBlocks,
    pub non_local: NonLocalAccessInfo,
}

impl FunctionAnalyses {
    pub fn compute(function: &Function) -> Self {
        let post_order = PostOrder::compute(function);
        debug_println!(
            "ANALYSIS: '{}' has {} reachable of {} blocks",
            function.name,
            post_order.len(),
            function.cfg.node_count()
        );
        Self {
            dominance: DominanceInfo::compute(function),
            post_order,
            dead_ends: DeadEndBlocks::compute(function),
            non_local: NonLocalAccessInfo::compute(function),
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.post_order.contains(block)
    }

    /// Reachable blocks dominated by `root`, in reverse post-order.
    pub fn dominated_region(&self, root: BlockId) -> Vec<BlockId> {
        self.post_order
            .reverse_post_order()
            .filter(|b| self.dominance.dominates(root, *b))
            .collect()
    }
}
