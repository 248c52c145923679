//! Scalar optimizations over the SSA IR: constant folding, dead-code
//! elimination (classical and aggressive), dead-store elimination, reassociation, CFG
//! simplification, mem2reg promotion, allocation intrinsic lowering/raising, and symbol
//! stripping/internalization. Each function-level transform is a [weld_ir::pass::FunctionPass]
//! and can be run standalone or registered into a [weld_ir::pass::FunctionPassManager] pipeline;
//! [strip::internalize] operates on a whole [weld_ir::Module] instead.

mod test_util;

pub mod adce;
pub mod constprop;
pub mod dce;
pub mod dse;
pub mod lower_allocations;
pub mod mem2reg;
pub mod reassociate;
pub mod simplify_cfg;
pub mod strip;

pub use adce::AggressiveDce;
pub use constprop::ConstantFold;
pub use dce::Dce;
pub use dse::DeadStoreElimination;
pub use lower_allocations::{LowerAllocations, RaiseAllocations};
pub use mem2reg::Mem2Reg;
pub use reassociate::Reassociate;
pub use simplify_cfg::SimplifyCfg;
pub use strip::{internalize, Strip};
