use smallvec::SmallVec;

use crate::{function::Function, Block};

/// Read-only control-flow queries over a [Function], shared by the dominance, loop, and liveness
/// analyses in `weld-ir-analysis`.
///
/// This trait exists so those analyses can be written once against an abstract CFG rather than
/// against [Function] directly; `Function` is the only implementor today.
pub trait ControlFlowGraph {
    fn entry_block(&self) -> Option<Block>;
    fn blocks(&self) -> Vec<Block>;
    fn predecessors(&self, block: Block) -> &[Block];
    fn successors(&self, block: Block) -> SmallVec<[Block; 2]>;
}

impl ControlFlowGraph for Function {
    fn entry_block(&self) -> Option<Block> {
        Function::entry_block(self)
    }

    fn blocks(&self) -> Vec<Block> {
        Function::blocks(self).collect()
    }

    fn predecessors(&self, block: Block) -> &[Block] {
        Function::predecessors(self, block)
    }

    fn successors(&self, block: Block) -> SmallVec<[Block; 2]> {
        Function::successors(self, block)
    }
}
