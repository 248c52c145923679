use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    CoreError, Inst,
};

/// Removes instructions with no side effects whose result has no remaining uses, to a fixpoint.
/// Unlike [crate::adce::AggressiveDce], this never removes a reachable instruction with side
/// effects, and never touches control flow.
#[derive(Default)]
pub struct Dce;

impl FunctionPass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn preserves_cfg(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        func: &mut Function,
        _types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let mut changed = false;
        loop {
            let mut round_changed = false;
            let blocks: Vec<_> = func.blocks().collect();
            for block in blocks {
                let insts: Vec<Inst> = func.instructions(block).to_vec();
                for inst in insts {
                    if !func.is_inst_live(inst) {
                        continue;
                    }
                    let data = func.inst(inst);
                    if data.has_side_effects() {
                        continue;
                    }
                    let dead = match func.result_of(inst) {
                        Some(result) => !func.has_uses(result),
                        // No result and no side effects: the instruction is observably a no-op
                        // (this can only arise after other passes rewrite an instruction in
                        // place), so it is always dead.
                        None => true,
                    };
                    if dead {
                        func.erase_inst(inst)?;
                        state.statistics_mut().bump("dce.removed");
                        round_changed = true;
                    }
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
    use weld_ir::{instruction::BinaryOp, types::TypeInterner, value::Constant, InstData};

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn removes_unused_pure_instruction() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let one = f.make_const(i32ty, Constant::Int(1));
        let two = f.make_const(i32ty, Constant::Int(2));
        let dead = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: one, rhs: two })
            .unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(entry, InstData::Ret { value: Some(zero) }).unwrap();

        let result = run_pass(&mut Dce, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(dead));
    }

    #[test]
    fn keeps_instructions_with_side_effects() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let alloca = f.append_inst(entry, InstData::Alloca { allocated_ty: i32ty, ptr_ty }).unwrap();
        let ptr = f.result_of(alloca).unwrap();
        let one = f.make_const(i32ty, Constant::Int(1));
        let store = f.append_inst(entry, InstData::Store { value: one, ptr, volatile: false }).unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(entry, InstData::Ret { value: Some(zero) }).unwrap();

        let result = run_pass(&mut Dce, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert!(f.is_inst_live(store));
    }
}
