use rustc_hash::{FxHashMap, FxHashSet};
use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    value::Constant,
    Block, CoreError, Inst, InstData, Value,
};
use weld_ir_analysis::{DominatorTree, ForwardDominanceFrontier};

/// Promotes stack-allocated scalars (`alloca` + `load`/`store` pairs) into plain SSA values,
/// inserting phi nodes only where control flow actually merges distinct definitions.
///
/// Construction follows the classical Cytron/Ferrante/Rosen/Zadeck recipe: place a phi for each
/// promotable alloca at every block in the iterated dominance frontier of its store set that the
/// variable is actually live into, then rename loads and stores to SSA values via a preorder walk
/// of the dominator tree.
#[derive(Default)]
pub struct Mem2Reg;

struct Candidate {
    alloca: Inst,
    ptr: Value,
    allocated_ty: weld_ir::Type,
}

impl Mem2Reg {
    fn find_candidates(func: &Function) -> Vec<Candidate> {
        let mut out = Vec::new();
        for block in func.blocks() {
            for &inst in func.instructions(block) {
                let InstData::Alloca { allocated_ty, .. } = func.inst(inst) else { continue };
                let Some(ptr) = func.result_of(inst) else { continue };
                if Self::is_promotable(func, ptr) {
                    out.push(Candidate { alloca: inst, ptr, allocated_ty: *allocated_ty });
                }
            }
        }
        out
    }

    fn is_promotable(func: &Function, ptr: Value) -> bool {
        func.uses_of(ptr).iter().all(|u| match func.inst(u.user) {
            InstData::Load { ptr: p, volatile, .. } => *p == ptr && !volatile,
            InstData::Store { ptr: p, value, volatile } => *p == ptr && *value != ptr && !volatile,
            _ => false,
        })
    }

    fn def_blocks(func: &Function, ptr: Value) -> FxHashSet<Block> {
        func.uses_of(ptr)
            .iter()
            .filter(|u| matches!(func.inst(u.user), InstData::Store { .. }))
            .map(|u| func.block_of(u.user))
            .collect()
    }

    /// Single-variable backward liveness: is there a load of `ptr` reachable from the start of
    /// `block` without passing through an intervening store?
    fn live_in_blocks(func: &Function, ptr: Value) -> FxHashSet<Block> {
        let blocks: Vec<Block> = func.blocks().collect();
        let mut use_b: FxHashMap<Block, bool> = FxHashMap::default();
        let mut def_b: FxHashMap<Block, bool> = FxHashMap::default();
        for &b in &blocks {
            let mut used = false;
            let mut defined = false;
            for &inst in func.instructions(b) {
                match func.inst(inst) {
                    InstData::Load { ptr: p, .. } if *p == ptr => {
                        if !defined {
                            used = true;
                        }
                    }
                    InstData::Store { ptr: p, .. } if *p == ptr => defined = true,
                    _ => {}
                }
            }
            use_b.insert(b, used);
            def_b.insert(b, defined);
        }

        let mut live_in: FxHashMap<Block, bool> = blocks.iter().map(|&b| (b, false)).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &b in blocks.iter().rev() {
                let live_out = func.successors(b).iter().any(|s| live_in[s]);
                let new_in = use_b[&b] || (live_out && !def_b[&b]);
                if live_in[&b] != new_in {
                    live_in.insert(b, new_in);
                    changed = true;
                }
            }
        }
        live_in.into_iter().filter(|(_, live)| *live).map(|(b, _)| b).collect()
    }

    fn promote_one(
        func: &mut Function,
        dom: &DominatorTree,
        df: &ForwardDominanceFrontier,
        c: &Candidate,
    ) -> Result<(), CoreError> {
        let def_blocks = Self::def_blocks(func, c.ptr);
        let live_in = Self::live_in_blocks(func, c.ptr);

        // Iterated dominance frontier of the def set, restricted to where the variable is live.
        let mut phi_blocks: FxHashSet<Block> = FxHashSet::default();
        let mut worklist: Vec<Block> = def_blocks.iter().copied().collect();
        let mut has_def: FxHashSet<Block> = def_blocks.clone();
        while let Some(b) = worklist.pop() {
            for &w in df.of(b) {
                if phi_blocks.contains(&w) || !live_in.contains(&w) {
                    continue;
                }
                phi_blocks.insert(w);
                if has_def.insert(w) {
                    worklist.push(w);
                }
            }
        }

        let mut phi_for_block: FxHashMap<Block, Inst> = FxHashMap::default();
        for &b in &phi_blocks {
            let incoming = func
                .predecessors(b)
                .iter()
                .map(|&p| (p, func.make_const(c.allocated_ty, Constant::Undef)))
                .collect();
            let head = func.instructions(b)[0];
            let phi = func.insert_inst_before(head, InstData::Phi { ty: c.allocated_ty, incoming })?;
            phi_for_block.insert(b, phi);
        }

        let undef = func.make_const(c.allocated_ty, Constant::Undef);
        let mut dead: Vec<Inst> = vec![c.alloca];

        // Explicit worklist over the dominator tree's preorder, carrying the current reaching
        // value for `c.ptr` down each path.
        let entry = func.entry_block().ok_or(CoreError::PassFatal("function has no entry block"))?;
        let mut stack: Vec<(Block, Value)> = vec![(entry, undef)];
        while let Some((block, mut current)) = stack.pop() {
            if let Some(&phi) = phi_for_block.get(&block) {
                current = func.result_of(phi).ok_or(CoreError::PassFatal("phi produced no result"))?;
            }

            for &inst in func.instructions(block) {
                match func.inst(inst) {
                    InstData::Load { ptr, .. } if *ptr == c.ptr => {
                        let result = func.result_of(inst).ok_or(CoreError::PassFatal("load produced no result"))?;
                        func.replace_all_uses_with(result, current);
                        dead.push(inst);
                    }
                    InstData::Store { ptr, value, .. } if *ptr == c.ptr => {
                        current = *value;
                        dead.push(inst);
                    }
                    _ => {}
                }
            }

            for succ in func.successors(block) {
                if let Some(&phi) = phi_for_block.get(&succ) {
                    if let InstData::Phi { incoming, .. } = func.inst_mut(phi) {
                        if let Some(pos) = incoming.iter().position(|(pred, _)| *pred == block) {
                            incoming[pos].1 = current;
                        }
                    }
                }
            }
            for &child in dom.children(block) {
                stack.push((child, current));
            }
        }

        for inst in dead.into_iter().rev() {
            func.erase_inst(inst)?;
        }
        Ok(())
    }
}

impl FunctionPass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn preserves_cfg(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        func: &mut Function,
        _types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let candidates = Self::find_candidates(func);
        if candidates.is_empty() {
            return Ok(PassResult::Unchanged);
        }

        let dom = DominatorTree::compute(func);
        let df = ForwardDominanceFrontier::compute(func, &dom);

        for c in &candidates {
            Self::promote_one(func, &dom, &df, c)?;
            state.statistics_mut().bump("mem2reg.promoted");
        }

        Ok(PassResult::Changed)
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::{instruction::BinaryOp, types::TypeInterner};

    use super::*;
    use crate::test_util::run_pass;

    /// A straight-line "ramp": alloca, store 0, load, add 1, store, load, ret — should collapse
    /// entirely to arithmetic on SSA values with no surviving alloca/load/store.
    #[test]
    fn promotes_a_straight_line_counter() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();

        let alloca = f.append_inst(entry, InstData::Alloca { allocated_ty: i32ty, ptr_ty }).unwrap();
        let slot = f.result_of(alloca).unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(entry, InstData::Store { value: zero, ptr: slot, volatile: false }).unwrap();
        let load1 = f.append_inst(entry, InstData::Load { ty: i32ty, ptr: slot, volatile: false }).unwrap();
        let load1_val = f.result_of(load1).unwrap();
        let one = f.make_const(i32ty, Constant::Int(1));
        let add =
            f.append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: load1_val, rhs: one }).unwrap();
        let add_val = f.result_of(add).unwrap();
        f.append_inst(entry, InstData::Store { value: add_val, ptr: slot, volatile: false }).unwrap();
        let load2 = f.append_inst(entry, InstData::Load { ty: i32ty, ptr: slot, volatile: false }).unwrap();
        let load2_val = f.result_of(load2).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(load2_val) }).unwrap();

        let result = run_pass(&mut Mem2Reg, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(alloca));

        let ret = f.terminator(entry).unwrap();
        let InstData::Ret { value: Some(v) } = f.inst(ret) else { panic!("expected ret") };
        assert_eq!(*v, add_val);
    }

    #[test]
    fn leaves_non_promotable_alloca_alone() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let alloca = f.append_inst(entry, InstData::Alloca { allocated_ty: i32ty, ptr_ty }).unwrap();
        let slot = f.result_of(alloca).unwrap();
        // Escapes via a call argument, so it must not be promoted.
        f.append_inst(
            entry,
            InstData::Call { callee: "use_ptr".into(), args: smallvec::smallvec![slot], ty: types.void() },
        )
        .unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(entry, InstData::Ret { value: Some(zero) }).unwrap();

        let result = run_pass(&mut Mem2Reg, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert!(f.is_inst_live(alloca));
    }
}
