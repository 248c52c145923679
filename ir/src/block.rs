use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::Inst;

/// A basic block: an ordered, owned sequence of instructions, the last of which must be a
/// terminator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// The storage backing a [Block].
///
/// Predecessors are tracked incrementally as control-flow-editing instructions (`br`, `cond_br`,
/// `ret`, `removePredecessor`, ...) are applied, rather than recomputed by scanning the whole
/// function; this keeps dominance and phi-arity checks cheap during SSA construction and the
/// scalar transforms.
#[derive(Debug, Default, Clone)]
pub struct BlockData {
    pub(crate) insts: Vec<Inst>,
    pub(crate) preds: SmallVec<[Block; 4]>,
}

impl BlockData {
    pub fn instructions(&self) -> &[Inst] {
        &self.insts
    }

    pub fn predecessors(&self) -> &[Block] {
        &self.preds
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// The contiguous prefix of phi instructions at the top of the block. Does not itself check
    /// that the instructions are actually phis; callers use [crate::Function::inst_data] to do
    /// so. φ-nodes must appear only at the top of a block, in a contiguous prefix.
    pub fn phi_prefix_len(&self, is_phi: impl Fn(Inst) -> bool) -> usize {
        self.insts.iter().take_while(|i| is_phi(**i)).count()
    }
}
