//! Machine-IR surface and target interfaces: registers, machine functions, and the
//! `TargetRegisterInfo`/`TargetDataLayout`/`AliasAnalysis` external interfaces that
//! `weld-regalloc`'s linear-scan allocator is built against.

pub mod error;
pub mod function;
pub mod register;
pub mod target;

pub use error::MachineError;
pub use function::{MBlock, MInst, MInstData, MachineFunction, Operand};
pub use register::{Reg, RegClass, StackSlot};
pub use target::{AliasAnalysis, AliasResult, NoAliasInfo, TargetDataLayout, TargetInfo, TargetRegisterInfo, TestTarget};
