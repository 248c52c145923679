use weld_ir::{
    function::Function,
    instruction::{BinaryOp, CastOp, FloatCC, IntCC, UnaryOp},
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::{IntTy, TypeData, TypeInterner},
    CoreError, Inst, InstData, Value,
};
use weld_ir::value::Constant;

/// Folds any instruction whose operands are all constants into a single constant value and
/// rewrites its uses, then propagates the new constant into any instruction that now has
/// all-constant operands as a result, combined into one worklist pass.
#[derive(Default)]
pub struct ConstantFold;

impl ConstantFold {
    fn const_operand(func: &Function, v: Value) -> Option<Constant> {
        match func.value_data(v) {
            weld_ir::ValueData::Const { konst, .. } => Some(*konst),
            _ => None,
        }
    }

    fn fold(func: &Function, types: &TypeInterner, inst: Inst) -> Option<Constant> {
        let data = func.inst(inst);
        match data {
            InstData::Binary { op, ty, lhs, rhs } => {
                let l = Self::const_operand(func, *lhs)?;
                let r = Self::const_operand(func, *rhs)?;
                eval_binary(*op, *ty, l, r, types)
            }
            InstData::Unary { op, ty, arg } => {
                let a = Self::const_operand(func, *arg)?;
                eval_unary(*op, *ty, a, types)
            }
            InstData::ICmp { cc, lhs, rhs, .. } => {
                let l = Self::const_operand(func, *lhs)?;
                let r = Self::const_operand(func, *rhs)?;
                eval_icmp(*cc, l, r)
            }
            InstData::FCmp { cc, lhs, rhs, .. } => {
                let l = Self::const_operand(func, *lhs)?;
                let r = Self::const_operand(func, *rhs)?;
                eval_fcmp(*cc, l, r)
            }
            InstData::Cast { op, ty, arg } => {
                let a = Self::const_operand(func, *arg)?;
                eval_cast(*op, *ty, a, types)
            }
            _ => None,
        }
    }
}

impl FunctionPass for ConstantFold {
    fn name(&self) -> &'static str {
        "constant-fold"
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

        // Re-scan to a local fixpoint: folding an instruction can make a later instruction in the
        // same block all-constant (e.g. `a = 1 + 2; b = a * 4`), so keep sweeping until a full
        // pass over every live block finds nothing new to fold.
        loop {
            let mut round_changed = false;
            let blocks: Vec<_> = func.blocks().collect();
            for block in blocks {
                let insts: Vec<Inst> = func.instructions(block).to_vec();
                for inst in insts {
                    if !func.is_inst_live(inst) {
                        continue;
                    }
                    let Some(result) = func.result_of(inst) else { continue };
                    if Self::const_operand(func, result).is_some() {
                        continue;
                    }
                    let Some(folded) = Self::fold(func, types, inst) else { continue };
                    let ty = func.value_type(result);
                    let new_value = func.make_const(ty, folded);
                    func.replace_all_uses_with(result, new_value);
                    func.erase_inst(inst)?;
                    state.statistics_mut().bump("constant-fold.folded");
                    round_changed = true;
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

fn int_ty_of(types: &TypeInterner, ty: weld_ir::Type) -> Option<IntTy> {
    match types.get(ty) {
        TypeData::Int(int_ty) => Some(*int_ty),
        TypeData::Bool => Some(IntTy::new(1, false)),
        _ => None,
    }
}

fn wrap(value: i128, int_ty: IntTy) -> i128 {
    let mask = int_ty.mask();
    let masked = (value as u128) & mask;
    if int_ty.signed && int_ty.bits < 128 && (masked >> (int_ty.bits - 1)) & 1 == 1 {
        (masked as i128) - ((mask as i128) + 1)
    } else {
        masked as i128
    }
}

fn eval_binary(op: BinaryOp, ty: weld_ir::Type, l: Constant, r: Constant, types: &TypeInterner) -> Option<Constant> {
    if op.is_float() {
        let lf = f64::from_bits(match l {
            Constant::Float(bits) => bits,
            _ => return None,
        });
        let rf = f64::from_bits(match r {
            Constant::Float(bits) => bits,
            _ => return None,
        });
        let result = match op {
            BinaryOp::FAdd => lf + rf,
            BinaryOp::FSub => lf - rf,
            BinaryOp::FMul => lf * rf,
            BinaryOp::FDiv => lf / rf,
            _ => return None,
        };
        return Some(Constant::Float(result.to_bits()));
    }

    let int_ty = int_ty_of(types, ty)?;
    let l = l.as_i128()?;
    let r = r.as_i128()?;
    let result = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::SDiv => {
            if r == 0 {
                return None;
            }
            l.wrapping_div(r)
        }
        BinaryOp::UDiv => {
            if r == 0 {
                return None;
            }
            ((l as u128) / (r as u128)) as i128
        }
        BinaryOp::SRem => {
            if r == 0 {
                return None;
            }
            l.wrapping_rem(r)
        }
        BinaryOp::URem => {
            if r == 0 {
                return None;
            }
            ((l as u128) % (r as u128)) as i128
        }
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
        BinaryOp::Shl => l.wrapping_shl(r as u32),
        BinaryOp::LShr => ((l as u128) >> (r as u32)) as i128,
        BinaryOp::AShr => l.wrapping_shr(r as u32),
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => unreachable!(),
    };
    Some(Constant::Int(wrap(result, int_ty)))
}

fn eval_unary(op: UnaryOp, ty: weld_ir::Type, a: Constant, types: &TypeInterner) -> Option<Constant> {
    match op {
        UnaryOp::Neg => {
            let int_ty = int_ty_of(types, ty)?;
            Some(Constant::Int(wrap(a.as_i128()?.wrapping_neg(), int_ty)))
        }
        UnaryOp::Not => {
            let int_ty = int_ty_of(types, ty)?;
            Some(Constant::Int(wrap(!a.as_i128()?, int_ty)))
        }
        UnaryOp::FNeg => match a {
            Constant::Float(bits) => Some(Constant::Float((-f64::from_bits(bits)).to_bits())),
            _ => None,
        },
    }
}

fn eval_icmp(cc: IntCC, l: Constant, r: Constant) -> Option<Constant> {
    let (l, r) = (l.as_i128()?, r.as_i128()?);
    let (lu, ru) = (l as u128, r as u128);
    let result = match cc {
        IntCC::Eq => l == r,
        IntCC::Ne => l != r,
        IntCC::Slt => l < r,
        IntCC::Sle => l <= r,
        IntCC::Sgt => l > r,
        IntCC::Sge => l >= r,
        IntCC::Ult => lu < ru,
        IntCC::Ule => lu <= ru,
        IntCC::Ugt => lu > ru,
        IntCC::Uge => lu >= ru,
    };
    Some(Constant::Bool(result))
}

fn eval_fcmp(cc: FloatCC, l: Constant, r: Constant) -> Option<Constant> {
    let l = match l {
        Constant::Float(bits) => f64::from_bits(bits),
        _ => return None,
    };
    let r = match r {
        Constant::Float(bits) => f64::from_bits(bits),
        _ => return None,
    };
    let result = match cc {
        FloatCC::Oeq => l == r,
        FloatCC::One => l != r && !l.is_nan() && !r.is_nan(),
        FloatCC::Olt => l < r,
        FloatCC::Ole => l <= r,
        FloatCC::Ogt => l > r,
        FloatCC::Oge => l >= r,
    };
    Some(Constant::Bool(result))
}

fn eval_cast(op: CastOp, ty: weld_ir::Type, a: Constant, types: &TypeInterner) -> Option<Constant> {
    match op {
        CastOp::Trunc | CastOp::ZExt | CastOp::Bitcast | CastOp::PtrToInt | CastOp::IntToPtr => {
            let int_ty = int_ty_of(types, ty).unwrap_or(IntTy::new(64, false));
            Some(Constant::Int(wrap(a.as_i128()?, int_ty)))
        }
        CastOp::SExt => {
            let int_ty = int_ty_of(types, ty)?;
            Some(Constant::Int(wrap(a.as_i128()?, int_ty)))
        }
        CastOp::FpToSi | CastOp::FpToUi => match a {
            Constant::Float(bits) => Some(Constant::Int(f64::from_bits(bits) as i128)),
            _ => None,
        },
        CastOp::SiToFp | CastOp::UiToFp => Some(Constant::Float((a.as_i128()? as f64).to_bits())),
        CastOp::FpTrunc | CastOp::FpExt => match a {
            Constant::Float(bits) => Some(Constant::Float(bits)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::types::TypeInterner;

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn folds_a_chain_of_constant_arithmetic() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let one = f.make_const(i32ty, Constant::Int(1));
        let two = f.make_const(i32ty, Constant::Int(2));
        let sum = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: one, rhs: two })
            .unwrap();
        let sum_val = f.result_of(sum).unwrap();
        let four = f.make_const(i32ty, Constant::Int(4));
        let product = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::Mul, ty: i32ty, lhs: sum_val, rhs: four })
            .unwrap();
        let product_val = f.result_of(product).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(product_val) }).unwrap();

        let result = run_pass(&mut ConstantFold, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);

        let ret = f.terminator(entry).unwrap();
        let InstData::Ret { value: Some(v) } = f.inst(ret) else { panic!("expected ret") };
        match f.value_data(*v) {
            weld_ir::ValueData::Const { konst: Constant::Int(12), .. } => {}
            other => panic!("expected folded constant 12, got {other:?}"),
        }
    }

    #[test]
    fn does_not_fold_division_by_zero() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let one = f.make_const(i32ty, Constant::Int(1));
        let zero = f.make_const(i32ty, Constant::Int(0));
        let div = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::SDiv, ty: i32ty, lhs: one, rhs: zero })
            .unwrap();
        let div_val = f.result_of(div).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(div_val) }).unwrap();

        let result = run_pass(&mut ConstantFold, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Unchanged);
    }
}
