use rustc_hash::{FxHashMap, FxHashSet};
use weld_ir::{pass::Analysis, Block, ControlFlowGraph, Function};

use crate::dominance::{Dominance, DominatorTree, PostDominatorTree};
use crate::direction::Direction;

/// The dominance frontier of every block: for block `n`, the set of blocks `w` such that `n`
/// dominates a predecessor of `w` but does not strictly dominate `w` itself.
///
/// Computed bottom-up over the dominator tree using the standard Cytron/Ferrante/Rosen/Zadeck
/// local/up split:
///
/// ```text
/// DF_local(n) = { w in succ(n) | idom(w) != n }
/// DF_up(c)    = { w in DF(c)   | idom(w) != n }        (n = idom(c))
/// DF(n)       = DF_local(n) ∪ (∪_{c in children(n)} DF_up(c))
/// ```
pub struct DominanceFrontier<D> {
    frontier: FxHashMap<Block, FxHashSet<Block>>,
    _direction: std::marker::PhantomData<D>,
}

pub type ForwardDominanceFrontier = DominanceFrontier<crate::direction::Forward>;
pub type PostDominanceFrontier = DominanceFrontier<crate::direction::Backward>;

impl<D: Direction> DominanceFrontier<D> {
    pub fn compute(cfg: &impl ControlFlowGraph, dom: &Dominance<D>) -> Self {
        let mut frontier: FxHashMap<Block, FxHashSet<Block>> = FxHashMap::default();

        // Process in a post-order of the dominator tree so that every child's frontier is
        // complete before its parent folds DF_up(child) in.
        let mut order = Vec::new();
        let mut stack: Vec<Block> = dom.roots().to_vec();
        let mut visited = FxHashSet::default();
        let mut post = Vec::new();
        while let Some(n) = stack.pop() {
            if !visited.insert(n) {
                continue;
            }
            post.push(n);
            stack.extend(dom.children(n).iter().copied());
        }
        order.extend(post.into_iter().rev());

        for &n in &order {
            let mut df = FxHashSet::default();
            for succ in Dominance::<D>::children_of(cfg, n) {
                if dom.idom(succ) != Some(n) {
                    df.insert(succ);
                }
            }
            for &c in dom.children(n) {
                if let Some(child_df) = frontier.get(&c) {
                    for &w in child_df {
                        if dom.idom(w) != Some(n) {
                            df.insert(w);
                        }
                    }
                }
            }
            frontier.insert(n, df);
        }

        Self { frontier, _direction: std::marker::PhantomData }
    }

    pub fn of(&self, block: Block) -> &FxHashSet<Block> {
        static EMPTY: std::sync::OnceLock<FxHashSet<Block>> = std::sync::OnceLock::new();
        self.frontier.get(&block).unwrap_or_else(|| EMPTY.get_or_init(FxHashSet::default))
    }
}

impl Analysis for ForwardDominanceFrontier {
    fn analyze(func: &Function) -> Self {
        let dom = DominatorTree::compute(func);
        DominanceFrontier::compute(func, &dom)
    }
}

impl Analysis for PostDominanceFrontier {
    fn analyze(func: &Function) -> Self {
        let dom = PostDominatorTree::compute(func);
        DominanceFrontier::compute(func, &dom)
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::{instruction::InstData, types::TypeInterner, value::Constant};

    use super::*;

    /// entry -> {a, b} -> join -> exit. `join`'s only strict dominator is `entry`, so `join` sits
    /// in the dominance frontier of both `a` and `b` but not of `entry` itself.
    #[test]
    fn diamond_join_is_frontier_of_branches() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let a = f.append_block();
        let b = f.append_block();
        let join = f.append_block();
        let cond = f.append_argument(types.i1());
        f.append_inst(entry, InstData::CondBr { cond, then_blk: a, else_blk: b }).unwrap();
        f.append_inst(a, InstData::Br { dest: join }).unwrap();
        f.append_inst(b, InstData::Br { dest: join }).unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(join, InstData::Ret { value: Some(zero) }).unwrap();

        let dom = DominatorTree::compute(&f);
        let df = ForwardDominanceFrontier::compute(&f, &dom);

        assert!(df.of(a).contains(&join));
        assert!(df.of(b).contains(&join));
        assert!(df.of(entry).is_empty());
        assert!(df.of(join).is_empty());
    }
}
