use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{symbol::Symbol, Block, Type, Value};

/// An instruction in the IR.
///
/// Instructions are entities; the actual opcode and operands live in [InstData], addressed
/// through [crate::Function::inst_data] — one record with an opcode discriminator, in place of a
/// class hierarchy of `Instruction` subclasses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    /// Associative and commutative integer operators are the only ones reassociation is
    /// permitted to touch; floating-point arithmetic is excluded since its rounding isn't
    /// associative.
    pub fn is_integer_associative_commutative(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    FNeg,
    Not,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IntCC {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FloatCC {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

/// The payload of an [Inst].
///
/// Every variant that produces a value has a `ty` field giving the type of that result; the
/// result [Value] itself is tracked separately in [crate::Function::results] (see
/// [crate::value::ValueData::Inst]), since not every instruction produces one (stores, branches,
/// `free`, ...).
#[derive(Debug, Clone)]
pub enum InstData {
    Binary { op: BinaryOp, ty: Type, lhs: Value, rhs: Value },
    Unary { op: UnaryOp, ty: Type, arg: Value },
    ICmp { cc: IntCC, ty: Type, lhs: Value, rhs: Value },
    FCmp { cc: FloatCC, ty: Type, lhs: Value, rhs: Value },
    Cast { op: CastOp, ty: Type, arg: Value },
    /// Stack-allocates space for a value of `allocated_ty`, yielding a pointer.
    Alloca { allocated_ty: Type, ptr_ty: Type },
    Load { ty: Type, ptr: Value, volatile: bool },
    Store { value: Value, ptr: Value, volatile: bool },
    /// Heap allocation of `allocated_ty`; see `LowerAllocations`.
    Malloc { allocated_ty: Type, ptr_ty: Type },
    Free { ptr: Value },
    GetElementPtr { base: Value, base_ty: Type, indices: SmallVec<[Value; 4]>, ty: Type },
    Call { callee: Symbol, args: SmallVec<[Value; 4]>, ty: Type },
    /// A `phi`, with one incoming `(predecessor, value)` pair per CFG predecessor of the owning
    /// block, in the same order as [crate::BasicBlock::predecessors].
    Phi { ty: Type, incoming: SmallVec<[(Block, Value); 4]> },
    Br { dest: Block },
    CondBr { cond: Value, then_blk: Block, else_blk: Block },
    Ret { value: Option<Value> },
    Unreachable,
}

impl InstData {
    pub fn result_ty(&self) -> Option<Type> {
        match self {
            InstData::Binary { ty, .. }
            | InstData::ICmp { ty, .. }
            | InstData::FCmp { ty, .. }
            | InstData::Unary { ty, .. }
            | InstData::Cast { ty, .. }
            | InstData::Alloca { ptr_ty: ty, .. }
            | InstData::Load { ty, .. }
            | InstData::Malloc { ptr_ty: ty, .. }
            | InstData::GetElementPtr { ty, .. }
            | InstData::Phi { ty, .. } => Some(*ty),
            InstData::Call { ty, .. } => Some(*ty),
            InstData::Store { .. }
            | InstData::Free { .. }
            | InstData::Br { .. }
            | InstData::CondBr { .. }
            | InstData::Ret { .. }
            | InstData::Unreachable => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstData::Br { .. } | InstData::CondBr { .. } | InstData::Ret { .. } | InstData::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstData::Phi { .. })
    }

    /// Volatile loads, volatile stores, calls to external/unknown functions, and terminators are
    /// all considered to have observable side effects for the purposes of DCE/ADCE.
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstData::Store { .. } | InstData::Free { .. } | InstData::Call { .. } => true,
            InstData::Load { volatile, .. } => *volatile,
            _ if self.is_terminator() => true,
            _ => false,
        }
    }

    pub fn may_read_memory(&self) -> bool {
        matches!(self, InstData::Load { .. } | InstData::Call { .. })
    }

    pub fn may_write_memory(&self) -> bool {
        matches!(self, InstData::Store { .. } | InstData::Free { .. } | InstData::Call { .. })
    }

    pub fn successors(&self) -> SmallVec<[Block; 2]> {
        match self {
            InstData::Br { dest } => SmallVec::from_slice(&[*dest]),
            InstData::CondBr { then_blk, else_blk, .. } => {
                SmallVec::from_slice(&[*then_blk, *else_blk])
            }
            _ => SmallVec::new(),
        }
    }

    /// The number of [Value] operands this instruction has, i.e. its operand arity.
    pub fn num_operands(&self) -> usize {
        match self {
            InstData::Binary { .. } | InstData::ICmp { .. } | InstData::FCmp { .. } => 2,
            InstData::Unary { .. } | InstData::Cast { .. } | InstData::Load { .. } => 1,
            InstData::Alloca { .. } | InstData::Malloc { .. } | InstData::Unreachable => 0,
            InstData::Store { .. } => 2,
            InstData::Free { .. } => 1,
            InstData::GetElementPtr { indices, .. } => 1 + indices.len(),
            InstData::Call { args, .. } => args.len(),
            InstData::Phi { incoming, .. } => incoming.len(),
            InstData::Br { .. } => 0,
            InstData::CondBr { .. } => 1,
            InstData::Ret { value } => value.is_some() as usize,
        }
    }

    pub fn operand(&self, slot: u32) -> Value {
        let slot = slot as usize;
        match self {
            InstData::Binary { lhs, rhs, .. } | InstData::ICmp { lhs, rhs, .. } | InstData::FCmp { lhs, rhs, .. } => {
                [*lhs, *rhs][slot]
            }
            InstData::Unary { arg, .. } | InstData::Cast { arg, .. } => *arg,
            InstData::Load { ptr, .. } => *ptr,
            InstData::Store { value, ptr, .. } => [*value, *ptr][slot],
            InstData::Free { ptr } => *ptr,
            InstData::GetElementPtr { base, indices, .. } => {
                if slot == 0 {
                    *base
                } else {
                    indices[slot - 1]
                }
            }
            InstData::Call { args, .. } => args[slot],
            InstData::Phi { incoming, .. } => incoming[slot].1,
            InstData::CondBr { cond, .. } => *cond,
            InstData::Ret { value } => value.expect("ret has no operand"),
            InstData::Alloca { .. } | InstData::Malloc { .. } | InstData::Br { .. } | InstData::Unreachable => {
                panic!("instruction has no operand at slot {slot}")
            }
        }
    }

    pub fn set_operand(&mut self, slot: u32, new: Value) {
        let slot = slot as usize;
        match self {
            InstData::Binary { lhs, rhs, .. } | InstData::ICmp { lhs, rhs, .. } | InstData::FCmp { lhs, rhs, .. } => {
                *[lhs, rhs][slot] = new;
            }
            InstData::Unary { arg, .. } | InstData::Cast { arg, .. } => *arg = new,
            InstData::Load { ptr, .. } => *ptr = new,
            InstData::Store { value, ptr, .. } => *[value, ptr][slot] = new,
            InstData::Free { ptr } => *ptr = new,
            InstData::GetElementPtr { base, indices, .. } => {
                if slot == 0 {
                    *base = new;
                } else {
                    indices[slot - 1] = new;
                }
            }
            InstData::Call { args, .. } => args[slot] = new,
            InstData::Phi { incoming, .. } => incoming[slot].1 = new,
            InstData::CondBr { cond, .. } => *cond = new,
            InstData::Ret { value } => *value = Some(new),
            InstData::Alloca { .. } | InstData::Malloc { .. } | InstData::Br { .. } | InstData::Unreachable => {
                panic!("instruction has no operand at slot {slot}")
            }
        }
    }

    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        (0..self.num_operands() as u32).map(|slot| self.operand(slot)).collect()
    }
}
