use weld_ir::{
    function::Function,
    pass::{FunctionPass, PassExecutionState, PassResult},
    symbol::Symbol,
    types::{FloatTy, TypeData, TypeInterner},
    value::{Constant, ValueData},
    CoreError, Inst, InstData, Type,
};

/// Computes a value's size in bytes under a flat, unpadded layout: integers round their bit width
/// up to whole bytes, aggregates are the sum/product of their members, with no alignment padding.
/// A real target data layout would add padding and alignment; this crate has no target-layout
/// facility yet, and a [TypeInterner]-grounded one belongs with the lowering backend once that's
/// built.
fn type_size_bytes(types: &TypeInterner, ty: Type) -> u64 {
    match types.get(ty) {
        TypeData::Void => 0,
        TypeData::Bool => 1,
        TypeData::Int(int_ty) => (int_ty.bits as u64).div_ceil(8),
        TypeData::Float(FloatTy::F32) => 4,
        TypeData::Float(FloatTy::F64) => 8,
        TypeData::Ptr(_) => 8,
        TypeData::Array(elem, len) => type_size_bytes(types, *elem) * len,
        TypeData::Struct(fields) => fields.iter().map(|f| type_size_bytes(types, *f)).sum(),
        TypeData::Function { .. } => 0,
    }
}

/// Lowers `malloc`/`free` IR intrinsics to calls against external functions of the given names,
/// and raises matching call patterns back, when recognized.
///
/// Needs a `size_ty` (the integer type `malloc`'s size argument is passed in) fixed at
/// construction time: passes only see an immutable [TypeInterner], so they cannot intern a type
/// on demand the way the pass that builds the module up-front can.
pub struct LowerAllocations {
    size_ty: Type,
    void_ty: Type,
    malloc: Symbol,
    free: Symbol,
}

impl LowerAllocations {
    pub fn new(size_ty: Type, void_ty: Type, malloc: impl Into<Symbol>, free: impl Into<Symbol>) -> Self {
        Self { size_ty, void_ty, malloc: malloc.into(), free: free.into() }
    }
}

impl FunctionPass for LowerAllocations {
    fn name(&self) -> &'static str {
        "lower-allocations"
    }

    fn preserves_cfg(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        func: &mut Function,
        types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let mut changed = false;

        for block in func.blocks() {
            let insts: Vec<Inst> = func.instructions(block).to_vec();
            for inst in insts {
                if !func.is_inst_live(inst) {
                    continue;
                }
                match *func.inst(inst) {
                    InstData::Malloc { allocated_ty, ptr_ty } => {
                        let size = type_size_bytes(types, allocated_ty);
                        let size_val = func.make_const(self.size_ty, Constant::Int(size as i128));
                        let call = func.insert_inst_before(
                            inst,
                            InstData::Call { callee: self.malloc, args: smallvec::smallvec![size_val], ty: self.size_ty },
                        )?;
                        let call_val = call_result(func, call)?;
                        let cast = func.insert_inst_before(
                            inst,
                            InstData::Cast { op: weld_ir::CastOp::IntToPtr, ty: ptr_ty, arg: call_val },
                        )?;
                        let cast_val = call_result(func, cast)?;
                        let old_result = func.result_of(inst).ok_or(CoreError::PassFatal("malloc produced no result"))?;
                        func.replace_all_uses_with(old_result, cast_val);
                        func.erase_inst(inst)?;
                        state.statistics_mut().bump("lower-allocations.malloc");
                        changed = true;
                    }
                    InstData::Free { ptr } => {
                        func.insert_inst_before(
                            inst,
                            InstData::Call {
                                callee: self.free,
                                args: smallvec::smallvec![ptr],
                                ty: self.void_ty,
                            },
                        )?;
                        func.erase_inst(inst)?;
                        state.statistics_mut().bump("lower-allocations.free");
                        changed = true;
                    }
                    _ => {}
                }
            }
        }

        Ok(if changed { PassResult::Changed } else { PassResult::Unchanged })
    }
}

fn call_result(func: &Function, inst: Inst) -> Result<weld_ir::Value, CoreError> {
    func.result_of(inst).ok_or(CoreError::PassFatal("call produced no result"))
}

/// The inverse of [LowerAllocations]: recognizes `call @malloc(size)` immediately cast to a
/// pointer, where `size` matches `allocated_ty`'s flat size, and raises it back to `malloc
/// allocated_ty`; recognizes `call @free(ptr)` and raises it back to `free ptr`.
pub struct RaiseAllocations {
    malloc: Symbol,
    free: Symbol,
}

impl RaiseAllocations {
    pub fn new(malloc: impl Into<Symbol>, free: impl Into<Symbol>) -> Self {
        Self { malloc: malloc.into(), free: free.into() }
    }

    fn constant_size(func: &Function, v: weld_ir::Value) -> Option<u64> {
        match func.value_data(v) {
            ValueData::Const { konst: Constant::Int(n), .. } => Some(*n as u64),
            _ => None,
        }
    }
}

impl FunctionPass for RaiseAllocations {
    fn name(&self) -> &'static str {
        "raise-allocations"
    }

    fn preserves_cfg(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        func: &mut Function,
        types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let mut changed = false;

        for block in func.blocks() {
            let insts: Vec<Inst> = func.instructions(block).to_vec();
            for &cast_inst in &insts {
                if !func.is_inst_live(cast_inst) {
                    continue;
                }
                let InstData::Cast { op: weld_ir::CastOp::IntToPtr, ty: ptr_ty, arg } = *func.inst(cast_inst) else {
                    continue;
                };
                let ValueData::Inst { inst: call_inst, .. } = func.value_data(arg) else { continue };
                let call_inst = *call_inst;
                let InstData::Call { callee, args, .. } = func.inst(call_inst).clone() else { continue };
                if callee != self.malloc || args.len() != 1 {
                    continue;
                }
                let Some(size) = Self::constant_size(func, args[0]) else { continue };
                let TypeData::Ptr(pointee) = *types.get(ptr_ty) else { continue };
                if type_size_bytes(types, pointee) != size {
                    continue;
                }

                let new_malloc = func.insert_inst_before(cast_inst, InstData::Malloc { allocated_ty: pointee, ptr_ty })?;
                let new_val = call_result(func, new_malloc)?;
                let cast_val = func.result_of(cast_inst).ok_or(CoreError::PassFatal("cast produced no result"))?;
                func.replace_all_uses_with(cast_val, new_val);
                func.erase_inst(cast_inst)?;
                func.erase_inst(call_inst)?;
                state.statistics_mut().bump("raise-allocations.malloc");
                changed = true;
            }

            let insts: Vec<Inst> = func.instructions(block).to_vec();
            for inst in insts {
                if !func.is_inst_live(inst) {
                    continue;
                }
                let InstData::Call { callee, ref args, .. } = *func.inst(inst) else { continue };
                if callee != self.free || args.len() != 1 {
                    continue;
                }
                let ptr = args[0];
                func.insert_inst_before(inst, InstData::Free { ptr })?;
                func.erase_inst(inst)?;
                state.statistics_mut().bump("raise-allocations.free");
                changed = true;
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
    fn lowers_a_malloc_and_free_pair() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i64ty = types.i64();
        let void_ty = types.void();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", ptr_ty);
        let entry = f.append_block();
        let malloc = f.append_inst(entry, InstData::Malloc { allocated_ty: i32ty, ptr_ty }).unwrap();
        let ptr = f.result_of(malloc).unwrap();
        f.append_inst(entry, InstData::Free { ptr }).unwrap();
        f.append_inst(entry, InstData::Ret { value: None }).unwrap();

        let mut pass = LowerAllocations::new(i64ty, void_ty, "malloc", "free");
        let result = run_pass(&mut pass, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(malloc));
        let has_malloc_call = f
            .instructions(entry)
            .iter()
            .any(|&i| matches!(f.inst(i), InstData::Call { callee, .. } if *callee == Symbol::from("malloc")));
        assert!(has_malloc_call);
        let has_free_call = f
            .instructions(entry)
            .iter()
            .any(|&i| matches!(f.inst(i), InstData::Call { callee, .. } if *callee == Symbol::from("free")));
        assert!(has_free_call);
    }

    #[test]
    fn raises_a_matching_malloc_call_back() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let i64ty = types.i64();
        let ptr_ty = types.ptr(i32ty);
        let mut f = Function::new("f", ptr_ty);
        let entry = f.append_block();
        let size = f.make_const(i64ty, Constant::Int(4));
        let call = f.append_inst(entry, InstData::Call { callee: "malloc".into(), args: smallvec::smallvec![size], ty: i64ty }).unwrap();
        let call_val = f.result_of(call).unwrap();
        let cast = f.append_inst(entry, InstData::Cast { op: weld_ir::CastOp::IntToPtr, ty: ptr_ty, arg: call_val }).unwrap();
        let cast_val = f.result_of(cast).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(cast_val) }).unwrap();

        let mut pass = RaiseAllocations::new("malloc", "free");
        let result = run_pass(&mut pass, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(!f.is_inst_live(call));
        let has_malloc = f.instructions(entry).iter().any(|&i| matches!(f.inst(i), InstData::Malloc { allocated_ty, .. } if *allocated_ty == i32ty));
        assert!(has_malloc);
    }
}
