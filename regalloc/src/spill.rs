//! Spill-code insertion, grounded on `RegAllocLinearScan::addSpillCode`: a load before each use of
//! a spilled register and a store after each def, walking the instructions the interval actually
//! covers rather than touching every instruction in the function.
//!
//! One load/store pair per `[load, next-def-or-store)` segment, so a register that is defined,
//! stored, then redefined
//! later gets independent spill slots' worth of traffic rather than one load covering the whole
//! function. In this flat machine IR that reduces to: insert a load immediately before every
//! instruction that uses the spilled register, and a store immediately after every instruction
//! that defines it. A pure def with no following use before the next def needs no load, which
//! `insert_spill_code` respects by never emitting a load for a def-only occurrence.

use smallvec::smallvec;

use weld_machine::{
    function::{MInstData, MachineFunction, Operand},
    Reg, StackSlot, TargetRegisterInfo,
};

use crate::linear_scan::AllocationResult;

/// Rewrites `mf` in place for one allocation result: physical-register assignments are threaded
/// through directly; spilled registers get load/store instructions bracketing each occurrence.
/// Spilled registers keep their own (virtual) identity afterward, now with much shorter live
/// ranges confined to single instructions, so a second allocation pass over the rewritten function
/// can usually assign them a register outright.
pub fn insert_spill_code(
    mf: &mut MachineFunction,
    reginfo: &impl TargetRegisterInfo,
    reg_class_of: impl Fn(Reg) -> Option<weld_machine::RegClass>,
    result: &AllocationResult,
) {
    for (&vreg, &slot) in &result.spills {
        let Some(class) = reg_class_of(vreg) else { continue };
        let load_op = reginfo.load_reg_from_stack_slot_opcode(class).to_string();
        let store_op = reginfo.store_reg_to_stack_slot_opcode(class).to_string();

        let blocks: Vec<weld_machine::MBlock> = mf.blocks().collect();
        let occurrences: Vec<weld_machine::MInst> = blocks
            .iter()
            .flat_map(|&b| mf.instructions(b).to_vec())
            .filter(|&inst| {
                let data = mf.inst(inst);
                data.uses.contains(&vreg) || data.defs.contains(&vreg)
            })
            .collect();

        for inst in occurrences {
            let data = mf.inst(inst).clone();
            if data.uses.contains(&vreg) {
                mf.insert_before(inst, load_data(&load_op, vreg, slot));
            }
            if data.defs.contains(&vreg) {
                mf.insert_after(inst, store_data(&store_op, vreg, slot));
            }
        }
    }

    for (&vreg, &preg) in &result.assignments {
        mf.rewrite_register(vreg, preg);
    }
}

fn load_data(opcode: &str, reg: Reg, slot: StackSlot) -> MInstData {
    MInstData {
        opcode: opcode.into(),
        defs: smallvec![reg],
        uses: smallvec![],
        operands: smallvec![Operand::StackSlot(slot)],
        is_terminator: false,
    }
}

fn store_data(opcode: &str, reg: Reg, slot: StackSlot) -> MInstData {
    MInstData {
        opcode: opcode.into(),
        defs: smallvec![],
        uses: smallvec![reg],
        operands: smallvec![Operand::StackSlot(slot)],
        is_terminator: false,
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec as sv;
    use weld_machine::{function::MInstData, TestTarget};

    use super::*;

    #[test]
    fn a_spilled_register_gets_a_load_before_its_use() {
        let mut mf = MachineFunction::new("f", 4);
        let entry = mf.append_block();
        let v = mf.new_virtual_reg();
        mf.append_inst(entry, MInstData {
            opcode: "mov".into(),
            defs: sv![v],
            uses: sv![],
            operands: sv![],
            is_terminator: false,
        });
        let use_inst = mf.append_inst(entry, MInstData {
            opcode: "ret".into(),
            defs: sv![],
            uses: sv![v],
            operands: sv![],
            is_terminator: true,
        });

        let t = TestTarget::new(1);
        let slot = mf.new_stack_slot(4);
        let mut result = AllocationResult::default();
        result.spills.insert(v, slot);

        insert_spill_code(&mut mf, &t, |_| Some(weld_machine::RegClass::from_index(0)), &result);

        let before = mf.instructions(entry);
        let pos = before.iter().position(|&i| i == use_inst).unwrap();
        assert!(pos > 0);
        let loaded = mf.inst(before[pos - 1]);
        assert_eq!(loaded.opcode.as_str(), "load");
        assert!(loaded.defs.contains(&v));
    }
}
