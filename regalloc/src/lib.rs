//! Live-interval analysis and linear-scan register allocation over machine IR: numbers a
//! [weld_machine::function::MachineFunction]'s instructions, builds one
//! [live_interval::LiveInterval] per register, and assigns each virtual register either a physical
//! register or a stack slot. Spilled registers are rewritten with load/store instructions and
//! re-allocated in a follow-up pass, iterating until nothing spills or an iteration budget is
//! exhausted.

pub mod error;
pub mod linear_scan;
pub mod live_interval;
pub mod spill;

pub use error::RegallocError;
pub use linear_scan::AllocationResult;
pub use live_interval::{LiveInterval, LiveRange};

use weld_machine::{function::MachineFunction, Reg, RegClass, TargetRegisterInfo};

/// Upper bound on spill/re-allocate rounds before giving up, guarded defensively in case a
/// target's register classes are too small for any assignment to converge.
const MAX_SPILL_ROUNDS: u32 = 8;

/// Allocates registers for `mf` end to end: build intervals, run linear scan, and if anything
/// spilled, insert spill code and retry, up to [MAX_SPILL_ROUNDS] times. `reg_class_of` must answer
/// for every virtual register `mf` references (see [weld_machine::function::MachineFunction::reg_class]).
pub fn allocate_function(
    mf: &mut MachineFunction,
    reginfo: &impl TargetRegisterInfo,
    reg_class_of: impl Fn(Reg) -> Option<RegClass> + Copy,
) -> Result<(), RegallocError> {
    for _ in 0..MAX_SPILL_ROUNDS {
        let intervals = live_interval::build_intervals(mf, reginfo);
        let result = linear_scan::allocate(
            reginfo,
            intervals.into_values().collect(),
            reg_class_of,
            |reg| {
                let class = reg_class_of(reg);
                let _ = class;
                mf.new_stack_slot(8)
            },
        )?;

        if result.spills.is_empty() {
            for (&vreg, &preg) in &result.assignments {
                mf.rewrite_register(vreg, preg);
            }
            return Ok(());
        }

        spill::insert_spill_code(mf, reginfo, reg_class_of, &result);
    }

    Err(RegallocError::AllocationExhausted(0))
}
