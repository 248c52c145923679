use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    value::Constant,
    Block, CoreError, Inst, InstData,
};

/// Simplifies the control-flow graph: folds conditional branches with a
/// literal-constant condition to an unconditional branch, removes blocks with no predecessors
/// (entry exempted), elides a block that is solely an unconditional branch by threading its one
/// predecessor straight to the successor, and merges a block into its sole predecessor when that
/// predecessor has no other successor.
///
/// Runs its own fixpoint loop, bounded by
/// [weld_ir::pass::PipelineConfig::max_fixpoint_iterations], since any one of these can expose
/// another opportunity.
pub struct SimplifyCfg {
    max_iterations: usize,
}

impl SimplifyCfg {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    fn fold_constant_branches(func: &mut Function) -> Result<bool, CoreError> {
        let mut changed = false;
        let blocks: Vec<Block> = func.blocks().collect();
        for block in blocks {
            let Some(term) = func.terminator(block) else { continue };
            let InstData::CondBr { cond, then_blk, else_blk } = *func.inst(term) else { continue };
            let Constant::Bool(taken) = (match func.value_data(cond) {
                weld_ir::ValueData::Const { konst, .. } => *konst,
                _ => continue,
            }) else {
                continue;
            };
            let (keep, drop) = if taken { (then_blk, else_blk) } else { (else_blk, then_blk) };
            if keep != drop {
                func.remove_predecessor(drop, block);
            }
            func.set_terminator(block, InstData::Br { dest: keep })?;
            changed = true;
        }
        Ok(changed)
    }

    /// Erases a block with no predecessors (other than the entry block, which is exempt).
    fn remove_dead_block(func: &mut Function, block: Block, entry: Block) -> Result<bool, CoreError> {
        if block == entry || !func.predecessors(block).is_empty() {
            return Ok(false);
        }
        for s in func.successors(block) {
            func.remove_predecessor(s, block);
        }
        let insts: Vec<Inst> = func.instructions(block).to_vec();
        for inst in insts.into_iter().rev() {
            func.erase_inst(inst)?;
        }
        func.erase_block(block);
        Ok(true)
    }

    /// Replaces a block that consists solely of an unconditional branch to `s` with a direct
    /// edge from its one predecessor to `s`. Restricted to the single-predecessor case, which can
    /// never introduce the duplicate-predecessor-with-phis hazard the general form has to guard
    /// against.
    fn elide_passthrough(func: &mut Function, block: Block, entry: Block) -> Result<bool, CoreError> {
        if block == entry {
            return Ok(false);
        }
        let insts = func.instructions(block);
        if insts.len() != 1 {
            return Ok(false);
        }
        let term = insts[0];
        let InstData::Br { dest: s } = *func.inst(term) else { return Ok(false) };
        if s == block {
            return Ok(false);
        }
        let preds = func.predecessors(block);
        if preds.len() != 1 {
            return Ok(false);
        }
        let p = preds[0];
        if p == block {
            return Ok(false);
        }
        let p_term = func.terminator(p).ok_or(CoreError::PassFatal("block has no terminator"))?;

        match func.inst_mut(p_term) {
            InstData::Br { dest } => {
                if *dest == block {
                    *dest = s;
                }
            }
            InstData::CondBr { then_blk, else_blk, .. } => {
                if *then_blk == block {
                    *then_blk = s;
                }
                if *else_blk == block {
                    *else_blk = s;
                }
            }
            _ => return Ok(false),
        }
        func.rename_predecessor(s, block, p);
        func.erase_inst(term)?;
        func.erase_block(block);
        Ok(true)
    }

    /// Merges `block` into its unique predecessor when that predecessor has no other successor.
    fn merge_into_predecessor(func: &mut Function, block: Block) -> Result<bool, CoreError> {
        let preds = func.predecessors(block);
        if preds.len() != 1 {
            return Ok(false);
        }
        let pred = preds[0];
        let pred_successors = func.successors(pred);
        if pred == block || pred_successors.len() != 1 || pred_successors[0] != block {
            return Ok(false);
        }

        let b_term = func.terminator(block).ok_or(CoreError::PassFatal("block has no terminator"))?;
        let b_term_data = func.inst(b_term).clone();
        let successors = func.successors(block);

        let phis: Vec<Inst> = func
            .instructions(block)
            .iter()
            .copied()
            .take_while(|&i| func.inst(i).is_phi())
            .collect();
        for phi in phis {
            let InstData::Phi { incoming, .. } = func.inst(phi) else { unreachable!() };
            let value = incoming[0].1;
            let result = func.result_of(phi).ok_or(CoreError::PassFatal("phi produced no result"))?;
            func.replace_all_uses_with(result, value);
            func.erase_inst(phi)?;
        }

        for s in successors {
            func.rename_predecessor(s, block, pred);
        }

        func.splice(block, pred);
        func.erase_inst(b_term)?;
        func.set_terminator(pred, b_term_data)?;
        func.erase_block(block);
        Ok(true)
    }
}

impl Default for SimplifyCfg {
    fn default() -> Self {
        Self::new(32)
    }
}

impl FunctionPass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
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
        let entry = func.entry_block().ok_or(CoreError::PassFatal("function has no entry block"))?;
        let mut changed = false;
        for _ in 0..self.max_iterations {
            let mut round_changed = Self::fold_constant_branches(func)?;
            let blocks: Vec<Block> = func.blocks().collect();
            for block in blocks {
                if !func.is_block_live(block) {
                    continue;
                }
                if Self::remove_dead_block(func, block, entry)? {
                    round_changed = true;
                    state.statistics_mut().bump("simplify-cfg.removed_unreachable");
                    continue;
                }
                if Self::elide_passthrough(func, block, entry)? {
                    round_changed = true;
                    state.statistics_mut().bump("simplify-cfg.elided");
                    continue;
                }
                if Self::merge_into_predecessor(func, block)? {
                    round_changed = true;
                    state.statistics_mut().bump("simplify-cfg.merged");
                }
            }
            changed |= round_changed;
            if !round_changed {
                break;
            }
        }
        Ok(if changed { PassResult::Changed } else { PassResult::Unchanged })
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::types::TypeInterner;

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn folds_a_branch_with_a_literal_condition() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i1 = types.i1();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let then_blk = f.append_block();
        let else_blk = f.append_block();
        let cond = f.make_const(i1, weld_ir::value::Constant::Bool(true));
        f.append_inst(entry, InstData::CondBr { cond, then_blk, else_blk }).unwrap();
        let one = f.make_const(i32ty, weld_ir::value::Constant::Int(1));
        f.append_inst(then_blk, InstData::Ret { value: Some(one) }).unwrap();
        let two = f.make_const(i32ty, weld_ir::value::Constant::Int(2));
        f.append_inst(else_blk, InstData::Ret { value: Some(two) }).unwrap();

        let result = run_pass(&mut SimplifyCfg::default(), &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        let term = f.terminator(entry).unwrap();
        assert!(matches!(f.inst(term), InstData::Br { dest } if *dest == then_blk));
        assert!(!f.predecessors(else_blk).contains(&entry));
    }

    #[test]
    fn merges_a_block_with_a_single_predecessor_and_no_sibling() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let next = f.append_block();
        f.append_inst(entry, InstData::Br { dest: next }).unwrap();
        let one = f.make_const(i32ty, weld_ir::value::Constant::Int(1));
        f.append_inst(next, InstData::Ret { value: Some(one) }).unwrap();

        let result = run_pass(&mut SimplifyCfg::default(), &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_block_live(next));
        let term = f.terminator(entry).unwrap();
        assert!(matches!(f.inst(term), InstData::Ret { value: Some(_) }));
    }

    #[test]
    fn removes_a_block_with_no_predecessors() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let dead = f.append_block();
        let one = f.make_const(i32ty, weld_ir::value::Constant::Int(1));
        f.append_inst(entry, InstData::Ret { value: Some(one) }).unwrap();
        let two = f.make_const(i32ty, weld_ir::value::Constant::Int(2));
        f.append_inst(dead, InstData::Ret { value: Some(two) }).unwrap();

        let result = run_pass(&mut SimplifyCfg::default(), &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_block_live(dead));
    }

    #[test]
    fn elides_a_passthrough_block_with_a_single_predecessor() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i1 = types.i1();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let then_blk = f.append_block();
        let passthrough = f.append_block();
        let join = f.append_block();

        let cond = f.make_const(i1, weld_ir::value::Constant::Bool(true));
        f.append_inst(entry, InstData::CondBr { cond, then_blk, else_blk: passthrough }).unwrap();
        let one = f.make_const(i32ty, weld_ir::value::Constant::Int(1));
        f.append_inst(then_blk, InstData::Br { dest: join }).unwrap();
        f.append_inst(passthrough, InstData::Br { dest: join }).unwrap();
        f.append_inst(join, InstData::Ret { value: Some(one) }).unwrap();

        run_pass(&mut SimplifyCfg::default(), &mut f, &types).unwrap();
        assert!(!f.is_block_live(passthrough));
        let term = f.terminator(entry).unwrap();
        assert!(matches!(f.inst(term), InstData::CondBr { then_blk: t, else_blk: e, .. } if *t == then_blk && *e == join));
        assert!(f.predecessors(join).contains(&entry));
    }
}
