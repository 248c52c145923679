use rustc_hash::{FxHashMap, FxHashSet};
use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    Block, CoreError, Inst, InstData,
};
use weld_ir_analysis::{unify_exits, Dominance, DominanceFrontier};

/// Aggressive dead-code elimination: marks instructions live from a seed set of roots
/// (instructions with observable side effects) by walking both def-use edges and control
/// dependence, then sweeps everything unmarked.
///
/// Unlike [crate::dce::Dce], which repeatedly checks "does this instruction's result currently
/// have zero uses", this marks forward from roots and is therefore immune to dead reference
/// cycles: two phi nodes that refer only to each other, with no other use anywhere, both fail
/// [crate::dce::Dce]'s use-count check forever but are correctly never marked live here.
///
/// Control dependence is derived from the post-dominance frontier: block `x` is control dependent
/// on block `y` iff `y` is in the post-dominance frontier of `x`. A conditional branch whose
/// outcome controls no live instruction is folded to an unconditional branch to either successor;
/// the resulting unreachable blocks are left for [crate::simplify_cfg::SimplifyCfg] to remove.
#[derive(Default)]
pub struct AggressiveDce;

impl AggressiveDce {
    fn is_root(data: &InstData) -> bool {
        matches!(
            data,
            InstData::Store { .. } | InstData::Call { .. } | InstData::Free { .. } | InstData::Ret { .. } | InstData::Unreachable
        ) || matches!(data, InstData::Load { volatile: true, .. })
    }

    fn controlled_by(func: &Function) -> FxHashMap<Block, Vec<Block>> {
        let post_dom = Dominance::<weld_ir_analysis::Backward>::compute(func);
        let pdf = DominanceFrontier::<weld_ir_analysis::Backward>::compute(func, &post_dom);
        let mut controls: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for y in func.blocks() {
            for &b in pdf.of(y) {
                controls.entry(b).or_default().push(y);
            }
        }
        controls
    }
}

impl FunctionPass for AggressiveDce {
    fn name(&self) -> &'static str {
        "adce"
    }

    fn preserves_cfg(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        func: &mut Function,
        types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        unify_exits(func, types);

        let controls = Self::controlled_by(func);

        let mut live_insts: FxHashSet<Inst> = FxHashSet::default();
        let mut live_blocks: FxHashSet<Block> = FxHashSet::default();
        let mut worklist: Vec<Inst> = Vec::new();

        for block in func.blocks() {
            for &inst in func.instructions(block) {
                if Self::is_root(func.inst(inst)) && live_insts.insert(inst) {
                    worklist.push(inst);
                }
            }
        }

        while let Some(inst) = worklist.pop() {
            for operand in func.inst(inst).operands() {
                if let weld_ir::ValueData::Inst { inst: def, .. } = func.value_data(operand) {
                    if live_insts.insert(*def) {
                        worklist.push(*def);
                    }
                }
            }

            let block = func.block_of(inst);
            if live_blocks.insert(block) {
                if let Some(controllers) = controls.get(&block) {
                    for &y in controllers {
                        let term = func.terminator(y).ok_or(CoreError::PassFatal("block has no terminator"))?;
                        if live_insts.insert(term) {
                            worklist.push(term);
                        }
                    }
                }
            }
        }

        let mut changed = false;

        // Fold conditional branches whose outcome controls nothing live into an unconditional
        // branch, before sweeping dead instructions (the folded-away operand becomes dead too).
        let blocks: Vec<Block> = func.blocks().collect();
        for block in &blocks {
            let Some(term) = func.terminator(*block) else { continue };
            if live_insts.contains(&term) {
                continue;
            }
            let InstData::CondBr { then_blk, else_blk, .. } = *func.inst(term) else { continue };
            let keep = if live_blocks.contains(&then_blk) { then_blk } else { else_blk };
            let drop = if keep == then_blk { else_blk } else { then_blk };
            if drop != keep {
                func.remove_predecessor(drop, *block);
            }
            func.set_terminator(*block, InstData::Br { dest: keep })?;
            changed = true;
        }

        for block in &blocks {
            let insts: Vec<Inst> = func.instructions(*block).to_vec();
            for inst in insts {
                if !func.is_inst_live(inst) || live_insts.contains(&inst) || func.inst(inst).is_terminator() {
                    continue;
                }
                func.erase_inst(inst)?;
                state.statistics_mut().bump("adce.removed");
                changed = true;
            }
        }

        Ok(if changed { PassResult::Changed } else { PassResult::Unchanged })
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::{types::TypeInterner, value::Constant};

    use super::*;
    use crate::test_util::run_pass;

    /// Two phi nodes that refer only to each other, with no other use anywhere: classical
    /// use-count DCE cannot remove either, ADCE removes both.
    #[test]
    fn removes_a_dead_reference_cycle() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i1 = types.i1();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let header = f.append_block();
        let exit = f.append_block();

        f.append_inst(entry, InstData::Br { dest: header }).unwrap();

        let zero = f.make_const(i32ty, Constant::Int(0));
        // Predecessors of `header` are `entry` and `header` itself (the loop's back edge), so
        // each phi's second incoming slot is the back-edge value.
        let phi_a = f
            .append_inst(header, InstData::Phi { ty: i32ty, incoming: smallvec::smallvec![(entry, zero), (header, zero)] })
            .unwrap();
        let phi_b = f
            .append_inst(header, InstData::Phi { ty: i32ty, incoming: smallvec::smallvec![(entry, zero), (header, zero)] })
            .unwrap();
        // Close the cycle: each phi's back-edge operand is the other phi's result. Neither value
        // is ever read by anything outside this pair.
        if let InstData::Phi { incoming, .. } = f.inst_mut(phi_a) {
            incoming[1].1 = f.result_of(phi_b).unwrap();
        }
        if let InstData::Phi { incoming, .. } = f.inst_mut(phi_b) {
            incoming[1].1 = f.result_of(phi_a).unwrap();
        }

        let cond = f.make_const(i1, Constant::Bool(true));
        f.append_inst(header, InstData::CondBr { cond, then_blk: header, else_blk: exit }).unwrap();
        let ret_val = f.make_const(i32ty, Constant::Int(1));
        f.append_inst(exit, InstData::Ret { value: Some(ret_val) }).unwrap();

        let result = run_pass(&mut AggressiveDce, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(phi_a));
        assert!(!f.is_inst_live(phi_b));
    }

    #[test]
    fn folds_a_condbr_with_no_live_consumer_on_either_side() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i1 = types.i1();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let then_blk = f.append_block();
        let else_blk = f.append_block();
        let exit = f.append_block();

        let cond = f.make_const(i1, Constant::Bool(true));
        f.append_inst(entry, InstData::CondBr { cond, then_blk, else_blk }).unwrap();
        f.append_inst(then_blk, InstData::Br { dest: exit }).unwrap();
        f.append_inst(else_blk, InstData::Br { dest: exit }).unwrap();
        let ret_val = f.make_const(i32ty, Constant::Int(7));
        f.append_inst(exit, InstData::Ret { value: Some(ret_val) }).unwrap();

        let result = run_pass(&mut AggressiveDce, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        let term = f.terminator(entry).unwrap();
        assert!(matches!(f.inst(term), InstData::Br { .. }));
    }
}
