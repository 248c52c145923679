//! Core SSA intermediate representation: types, values, instructions, basic blocks, functions,
//! and modules, plus the pass-manager scaffolding that the analysis and transform crates plug
//! into.

pub mod block;
pub mod cfg;
pub mod error;
pub mod function;
pub mod instruction;
pub mod module;
pub mod pass;
pub mod symbol;
pub mod types;
pub mod value;

pub use self::{
    block::{Block, BlockData},
    cfg::ControlFlowGraph,
    error::{CoreError, IrInvariant, Result},
    function::{FuncRef, Function, Linkage},
    instruction::{BinaryOp, CastOp, FloatCC, Inst, InstData, IntCC, UnaryOp},
    module::{GlobalData, Module},
    symbol::Symbol,
    types::{FloatTy, IntTy, Type, TypeData, TypeInterner},
    value::{Constant, Use, Value, ValueData},
};
