use std::marker::PhantomData;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use weld_ir::{
    function::Function,
    instruction::InstData,
    pass::Analysis,
    types::TypeInterner,
    Block, ControlFlowGraph, Type,
};

use crate::direction::{is_forward, Backward, Direction, Forward};

/// Dominator sets, immediate dominators, and the dominator tree's parent/child links, computed
/// over either the forward CFG ([Forward]) or the reverse CFG ([Backward], i.e. post-dominance).
///
/// For post-dominance, functions with more than one exit block should be passed through
/// [unify_exits] first; if they are not, each exit block becomes its own self-dominating root, the
/// same fallback the forward direction uses for blocks unreachable from entry (the same fixpoint
/// is simply rooted at that block).
pub struct Dominance<D> {
    dom: FxHashMap<Block, FxHashSet<Block>>,
    idom: FxHashMap<Block, Option<Block>>,
    children: FxHashMap<Block, Vec<Block>>,
    roots: Vec<Block>,
    _direction: PhantomData<D>,
}

pub type DominatorTree = Dominance<Forward>;
pub type PostDominatorTree = Dominance<Backward>;

impl<D: Direction> Dominance<D> {
    pub fn compute(cfg: &impl ControlFlowGraph) -> Self {
        let all_blocks = cfg.blocks();
        let roots = Self::select_roots(cfg, &all_blocks);

        let mut dom: FxHashMap<Block, FxHashSet<Block>> = FxHashMap::default();
        for &b in &all_blocks {
            dom.insert(b, all_blocks.iter().copied().collect());
        }
        for &r in &roots {
            dom.insert(r, FxHashSet::from_iter([r]));
        }

        let order = Self::reverse_postorder(cfg, &roots, &all_blocks);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &order {
                if roots.contains(&b) {
                    continue;
                }
                let parents = Self::parents(cfg, b);
                let mut new_dom: Option<FxHashSet<Block>> = None;
                for p in parents {
                    if let Some(pdom) = dom.get(&p) {
                        new_dom = Some(match new_dom {
                            None => pdom.clone(),
                            Some(acc) => acc.intersection(pdom).copied().collect(),
                        });
                    }
                }
                let mut new_dom = new_dom.unwrap_or_default();
                new_dom.insert(b);
                if dom.get(&b) != Some(&new_dom) {
                    dom.insert(b, new_dom);
                    changed = true;
                }
            }
        }

        let mut idom: FxHashMap<Block, Option<Block>> = FxHashMap::default();
        let mut children: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for &b in &all_blocks {
            children.entry(b).or_default();
        }
        for &b in &all_blocks {
            if roots.contains(&b) {
                idom.insert(b, None);
                continue;
            }
            let my_dom = &dom[&b];
            let target_size = my_dom.len().saturating_sub(1);
            let found = my_dom.iter().copied().find(|&d| d != b && dom[&d].len() == target_size);
            idom.insert(b, found);
            if let Some(d) = found {
                children.entry(d).or_default().push(b);
            }
        }

        Self { dom, idom, children, roots, _direction: PhantomData }
    }

    fn select_roots(cfg: &impl ControlFlowGraph, all_blocks: &[Block]) -> Vec<Block> {
        if is_forward::<D>() {
            cfg.entry_block().into_iter().collect()
        } else {
            all_blocks.iter().copied().filter(|&b| cfg.successors(b).is_empty()).collect()
        }
    }

    fn parents(cfg: &impl ControlFlowGraph, b: Block) -> SmallVec<[Block; 4]> {
        if is_forward::<D>() {
            SmallVec::from_slice(cfg.predecessors(b))
        } else {
            SmallVec::from_iter(cfg.successors(b))
        }
    }

    pub(crate) fn children_of(cfg: &impl ControlFlowGraph, b: Block) -> SmallVec<[Block; 4]> {
        if is_forward::<D>() {
            SmallVec::from_iter(cfg.successors(b))
        } else {
            SmallVec::from_slice(cfg.predecessors(b))
        }
    }

    fn reverse_postorder(
        cfg: &impl ControlFlowGraph,
        roots: &[Block],
        all_blocks: &[Block],
    ) -> Vec<Block> {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::new();
        for &root in roots {
            Self::dfs_postorder(cfg, root, &mut visited, &mut postorder);
        }
        // Any block not reachable from a root gets its own singleton traversal, acting as its own
        // root for the purposes of the fixpoint above (already seeded in `roots`' caller is not
        // the case here; reachability closure alone determines processing order).
        for &b in all_blocks {
            if !visited.contains(&b) {
                Self::dfs_postorder(cfg, b, &mut visited, &mut postorder);
            }
        }
        postorder.reverse();
        postorder
    }

    fn dfs_postorder(
        cfg: &impl ControlFlowGraph,
        b: Block,
        visited: &mut FxHashSet<Block>,
        postorder: &mut Vec<Block>,
    ) {
        if !visited.insert(b) {
            return;
        }
        for c in Self::children_of(cfg, b) {
            Self::dfs_postorder(cfg, c, visited, postorder);
        }
        postorder.push(b);
    }

    /// True if `a` dominates `b` (every path from a root to `b` passes through `a`). Every block
    /// dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        self.dom.get(&b).is_some_and(|set| set.contains(&a))
    }

    /// True if `a` strictly dominates `b`, i.e. dominates it and is not `b` itself.
    pub fn strictly_dominates(&self, a: Block, b: Block) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn dom_set(&self, b: Block) -> &FxHashSet<Block> {
        &self.dom[&b]
    }

    pub fn idom(&self, b: Block) -> Option<Block> {
        self.idom.get(&b).copied().flatten()
    }

    pub fn children(&self, b: Block) -> &[Block] {
        self.children.get(&b).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[Block] {
        &self.roots
    }

    /// Re-parents `b` under `new_idom` in the dominator tree, updating both the idom map and the
    /// affected children lists. Callers are responsible for ensuring the new parent is consistent
    /// with the dominance relation; this only updates bookkeeping.
    pub fn set_idom(&mut self, b: Block, new_idom: Option<Block>) {
        if let Some(old) = self.idom(b) {
            if let Some(siblings) = self.children.get_mut(&old) {
                siblings.retain(|&s| s != b);
            }
        }
        self.idom.insert(b, new_idom);
        if let Some(new_parent) = new_idom {
            self.children.entry(new_parent).or_default().push(b);
        }
    }
}

impl Analysis for DominatorTree {
    fn analyze(func: &Function) -> Self {
        Dominance::compute(func)
    }
}

impl Analysis for PostDominatorTree {
    fn analyze(func: &Function) -> Self {
        Dominance::compute(func)
    }
}

/// Inserts a synthetic exit block when `func` has more than one block terminated by `ret` or
/// `unreachable`, rewiring every such block to branch to it instead. If the function returns a
/// value, the synthetic exit merges the return values with a φ-node. Returns the synthetic block,
/// or `None` if the function already had at most one exit.
///
/// Required before computing [PostDominatorTree] when the CFG's single-exit property matters,
/// e.g. before aggressive dead-code elimination's post-dominance-frontier walk.
pub fn unify_exits(func: &mut Function, types: &TypeInterner) -> Option<Block> {
    let exits: Vec<Block> = func
        .blocks()
        .filter(|&b| {
            func.terminator(b)
                .is_some_and(|t| matches!(func.inst(t), InstData::Ret { .. } | InstData::Unreachable))
        })
        .collect();
    if exits.len() <= 1 {
        return None;
    }

    let ret_ty: Option<Type> = match types.get(func.sig) {
        weld_ir::types::TypeData::Function { ret, .. } if *types.get(*ret) != weld_ir::types::TypeData::Void => {
            Some(*ret)
        }
        _ => None,
    };

    let exit = func.append_block();
    if let Some(ty) = ret_ty {
        let undef = func.make_const(ty, weld_ir::value::Constant::Undef);
        let mut incoming: SmallVec<[(Block, weld_ir::Value); 4]> = SmallVec::new();
        for &b in &exits {
            let term = func.terminator(b).unwrap();
            let value = match func.inst(term) {
                InstData::Ret { value } => value.unwrap_or(undef),
                InstData::Unreachable => undef,
                _ => unreachable!(),
            };
            incoming.push((b, value));
            func.set_terminator(b, InstData::Br { dest: exit }).expect("rewiring exit block");
        }
        let phi = func.append_inst(exit, InstData::Phi { ty, incoming }).expect("synthetic exit phi");
        let phi_val = func.result_of(phi).unwrap();
        func.append_inst(exit, InstData::Ret { value: Some(phi_val) }).expect("synthetic exit ret");
    } else {
        for &b in &exits {
            func.set_terminator(b, InstData::Br { dest: exit }).expect("rewiring exit block");
        }
        func.append_inst(exit, InstData::Ret { value: None }).expect("synthetic exit ret");
    }
    Some(exit)
}

#[cfg(test)]
mod tests {
    use weld_ir::{function::Function, types::TypeInterner};

    use super::*;

    fn diamond() -> (Function, TypeInterner, Block, Block, Block, Block) {
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
        let zero = f.make_const(i32ty, weld_ir::value::Constant::Int(0));
        f.append_inst(join, InstData::Ret { value: Some(zero) }).unwrap();
        (f, types, entry, a, b, join)
    }

    #[test]
    fn dominance_on_diamond() {
        let (f, _types, entry, a, b, join) = diamond();
        let dt = DominatorTree::compute(&f);
        assert!(dt.dominates(entry, join));
        assert!(!dt.dominates(a, join));
        assert!(!dt.dominates(b, join));
        assert_eq!(dt.idom(join), Some(entry));
        assert_eq!(dt.idom(a), Some(entry));
        assert_eq!(dt.idom(b), Some(entry));
        assert_eq!(dt.idom(entry), None);
    }

    #[test]
    fn post_dominance_on_diamond() {
        let (f, _types, entry, a, b, join) = diamond();
        let pdt = PostDominatorTree::compute(&f);
        assert!(pdt.dominates(join, entry));
        assert!(pdt.dominates(join, a));
        assert!(pdt.dominates(join, b));
        assert_eq!(pdt.idom(entry), Some(join));
    }

    #[test]
    fn unify_exits_merges_multiple_returns() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", types.function(vec![], i32ty));
        let entry = f.append_block();
        let l1 = f.append_block();
        let l2 = f.append_block();
        let cond = f.append_argument(types.i1());
        f.append_inst(entry, InstData::CondBr { cond, then_blk: l1, else_blk: l2 }).unwrap();
        let one = f.make_const(i32ty, weld_ir::value::Constant::Int(1));
        let two = f.make_const(i32ty, weld_ir::value::Constant::Int(2));
        f.append_inst(l1, InstData::Ret { value: Some(one) }).unwrap();
        f.append_inst(l2, InstData::Ret { value: Some(two) }).unwrap();

        let exit = unify_exits(&mut f, &types).expect("two exits should unify");
        assert!(matches!(f.inst(f.terminator(l1).unwrap()), InstData::Br { dest } if *dest == exit));
        assert!(matches!(f.inst(f.terminator(l2).unwrap()), InstData::Br { dest } if *dest == exit));
        assert!(matches!(f.inst(f.terminator(exit).unwrap()), InstData::Ret { value: Some(_) }));
    }
}
