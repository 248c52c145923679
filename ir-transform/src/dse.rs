use rustc_hash::FxHashMap;
use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    CoreError, Inst, InstData, Value,
};

/// Removes stores whose value is guaranteed to be overwritten before anything reads it.
///
/// Scoped to a single basic block, with no cross-block or alias analysis: a store to pointer `p`
/// is dead only if the next memory operation touching `p`, scanned forward within the same block,
/// is another store to the exact same SSA pointer value. A `call` (which may read or write
/// anything) or a load from a different pointer value conservatively invalidates tracking for
/// every pointer, since nothing here proves they cannot alias `p`.
#[derive(Default)]
pub struct DeadStoreElimination;

impl FunctionPass for DeadStoreElimination {
    fn name(&self) -> &'static str {
        "dse"
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
        let mut dead: Vec<Inst> = Vec::new();

        for block in func.blocks() {
            let insts: Vec<Inst> = func.instructions(block).to_vec();
            let mut pending_overwrite: FxHashMap<Value, Inst> = FxHashMap::default();

            for &inst in insts.iter().rev() {
                match func.inst(inst) {
                    InstData::Store { ptr, volatile, .. } => {
                        let ptr = *ptr;
                        if *volatile {
                            pending_overwrite.clear();
                            continue;
                        }
                        if pending_overwrite.contains_key(&ptr) {
                            dead.push(inst);
                        } else {
                            pending_overwrite.insert(ptr, inst);
                        }
                    }
                    InstData::Load { ptr, .. } => {
                        pending_overwrite.remove(ptr);
                    }
                    data if data.may_read_memory() || data.may_write_memory() => {
                        pending_overwrite.clear();
                    }
                    _ => {}
                }
            }
        }

        if dead.is_empty() {
            return Ok(PassResult::Unchanged);
        }
        for inst in dead {
            func.erase_inst(inst)?;
            state.statistics_mut().bump("dse.removed");
        }
        Ok(PassResult::Changed)
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::{types::TypeInterner, value::Constant};

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn removes_a_store_immediately_overwritten() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let alloca = f.append_inst(entry, InstData::Alloca { allocated_ty: i32ty, ptr_ty }).unwrap();
        let ptr = f.result_of(alloca).unwrap();
        let one = f.make_const(i32ty, Constant::Int(1));
        let two = f.make_const(i32ty, Constant::Int(2));
        let first_store = f.append_inst(entry, InstData::Store { value: one, ptr, volatile: false }).unwrap();
        f.append_inst(entry, InstData::Store { value: two, ptr, volatile: false }).unwrap();
        let load = f.append_inst(entry, InstData::Load { ty: i32ty, ptr, volatile: false }).unwrap();
        let load_val = f.result_of(load).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(load_val) }).unwrap();

        let result = run_pass(&mut DeadStoreElimination, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(first_store));
    }

    #[test]
    fn keeps_a_store_read_by_an_intervening_load() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let alloca = f.append_inst(entry, InstData::Alloca { allocated_ty: i32ty, ptr_ty }).unwrap();
        let ptr = f.result_of(alloca).unwrap();
        let one = f.make_const(i32ty, Constant::Int(1));
        let store = f.append_inst(entry, InstData::Store { value: one, ptr, volatile: false }).unwrap();
        let load = f.append_inst(entry, InstData::Load { ty: i32ty, ptr, volatile: false }).unwrap();
        let load_val = f.result_of(load).unwrap();
        let two = f.make_const(i32ty, Constant::Int(2));
        f.append_inst(entry, InstData::Store { value: two, ptr, volatile: false }).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(load_val) }).unwrap();

        let result = run_pass(&mut DeadStoreElimination, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert!(f.is_inst_live(store));
    }
}
