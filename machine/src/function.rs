//! Machine-IR surface: the post-instruction-selection representation that
//! `weld-regalloc` numbers, analyzes, and rewrites. Deliberately much flatter than
//! [weld_ir::function::Function]: by this stage, PHI elimination and two-address conversion have
//! already run, so every block is a straight-line list of instructions with explicit def/use
//! register lists instead of SSA values.

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;
use weld_ir::symbol::Symbol;

use rustc_hash::FxHashMap;

use crate::register::{Reg, RegClass, StackSlot};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MBlock(u32);
entity_impl!(MBlock, "mblock");

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MInst(u32);
entity_impl!(MInst, "minst");

/// A non-register operand of a machine instruction. Register operands are tracked separately
/// (in [MInstData::defs]/[MInstData::uses]) since the allocator needs to enumerate and rewrite
/// them uniformly across every opcode without matching on `operands` too.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Imm(i64),
    StackSlot(StackSlot),
    Block(MBlock),
}

/// One machine instruction: a target-specific opcode mnemonic (instruction selection's output;
/// this core treats it opaquely), its register defs/uses, and any non-register operands.
#[derive(Debug, Clone)]
pub struct MInstData {
    pub opcode: Symbol,
    pub defs: SmallVec<[Reg; 2]>,
    pub uses: SmallVec<[Reg; 4]>,
    pub operands: SmallVec<[Operand; 2]>,
    /// True for a block-ending instruction (a conditional or unconditional jump, or a return).
    pub is_terminator: bool,
}

#[derive(Copy, Clone, Default)]
struct PackedBlock(Option<MBlock>);

#[derive(Default)]
struct MBlockData {
    insts: Vec<MInst>,
    preds: Vec<MBlock>,
}

/// A function in machine-IR form: an ordered list of blocks of straight-line instructions, plus
/// the virtual-register and stack-slot namespaces the allocator draws from.
pub struct MachineFunction {
    pub name: Symbol,
    blocks: PrimaryMap<MBlock, MBlockData>,
    block_order: Vec<MBlock>,
    insts: PrimaryMap<MInst, MInstData>,
    inst_block: SecondaryMap<MInst, PackedBlock>,
    stack_slots: PrimaryMap<StackSlot, u64>,
    next_vreg: u32,
    vreg_classes: FxHashMap<Reg, RegClass>,
}

impl MachineFunction {
    pub fn new(name: impl Into<Symbol>, first_virtual_register: u32) -> Self {
        Self {
            name: name.into(),
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            insts: PrimaryMap::new(),
            inst_block: SecondaryMap::new(),
            stack_slots: PrimaryMap::new(),
            next_vreg: first_virtual_register,
            vreg_classes: FxHashMap::default(),
        }
    }

    pub fn append_block(&mut self) -> MBlock {
        let block = self.blocks.push(MBlockData::default());
        self.block_order.push(block);
        block
    }

    pub fn entry_block(&self) -> Option<MBlock> {
        self.block_order.first().copied()
    }

    pub fn blocks(&self) -> impl Iterator<Item = MBlock> + '_ {
        self.block_order.iter().copied()
    }

    pub fn add_predecessor(&mut self, block: MBlock, pred: MBlock) {
        self.blocks[block].preds.push(pred);
    }

    pub fn predecessors(&self, block: MBlock) -> &[MBlock] {
        &self.blocks[block].preds
    }

    pub fn append_inst(&mut self, block: MBlock, data: MInstData) -> MInst {
        let inst = self.insts.push(data);
        self.inst_block[inst] = PackedBlock(Some(block));
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Inserts `data` immediately before `before` in its block, returning the new instruction.
    /// Used by spill-code insertion (`weld-regalloc`'s `loadRegFromStackSlot` call sites).
    pub fn insert_before(&mut self, before: MInst, data: MInstData) -> MInst {
        let block = self.block_of(before);
        let inst = self.insts.push(data);
        self.inst_block[inst] = PackedBlock(Some(block));
        let insts = &mut self.blocks[block].insts;
        let pos = insts.iter().position(|&i| i == before).expect("before must be in its own block");
        insts.insert(pos, inst);
        inst
    }

    /// Inserts `data` immediately after `after` in its block. Used for `storeRegToStackSlot` spill
    /// sites, which go after the last def in a live-range segment.
    pub fn insert_after(&mut self, after: MInst, data: MInstData) -> MInst {
        let block = self.block_of(after);
        let inst = self.insts.push(data);
        self.inst_block[inst] = PackedBlock(Some(block));
        let insts = &mut self.blocks[block].insts;
        let pos = insts.iter().position(|&i| i == after).expect("after must be in its own block");
        insts.insert(pos + 1, inst);
        inst
    }

    pub fn instructions(&self, block: MBlock) -> &[MInst] {
        &self.blocks[block].insts
    }

    pub fn block_of(&self, inst: MInst) -> MBlock {
        self.inst_block[inst].0.expect("instruction not assigned to a block")
    }

    pub fn inst(&self, inst: MInst) -> &MInstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: MInst) -> &mut MInstData {
        &mut self.insts[inst]
    }

    /// Replaces every def/use occurrence of `from` with `to`, across the whole function. This is
    /// the allocator's final rewrite step: `from` is a virtual register and `to` its assigned
    /// physical register.
    pub fn rewrite_register(&mut self, from: Reg, to: Reg) {
        for (_, data) in self.insts.iter_mut() {
            for def in data.defs.iter_mut() {
                if *def == from {
                    *def = to;
                }
            }
            for u in data.uses.iter_mut() {
                if *u == from {
                    *u = to;
                }
            }
        }
    }

    pub fn new_stack_slot(&mut self, size_bytes: u64) -> StackSlot {
        self.stack_slots.push(size_bytes)
    }

    pub fn new_virtual_reg(&mut self) -> Reg {
        let reg = Reg::from_index(self.next_vreg);
        self.next_vreg += 1;
        reg
    }

    /// Allocates a fresh virtual register and records its register class, the machine-IR analogue
    /// of `SSARegMap::createVirtualRegister`. The allocator consults [MachineFunction::reg_class]
    /// to pick an [crate::register::RegClass]'s allocation order for the register.
    pub fn new_virtual_reg_in_class(&mut self, class: RegClass) -> Reg {
        let reg = self.new_virtual_reg();
        self.vreg_classes.insert(reg, class);
        reg
    }

    pub fn reg_class(&self, reg: Reg) -> Option<RegClass> {
        self.vreg_classes.get(&reg).copied()
    }

    /// Numbers every instruction 0, 2, 4, ... in block order (DFS over the block list in
    /// insertion order, which for straight-line machine IR is the same as any other consistent
    /// traversal since cross-block control flow doesn't affect the numbering itself). A block's
    /// own index is the index of its first instruction. Odd slots are reserved for instructions
    /// spill-code insertion adds later.
    pub fn number_instructions(&self) -> (rustc_hash::FxHashMap<MInst, u32>, rustc_hash::FxHashMap<MBlock, u32>) {
        let mut inst_index = rustc_hash::FxHashMap::default();
        let mut block_index = rustc_hash::FxHashMap::default();
        let mut next = 0u32;
        for block in self.blocks() {
            block_index.insert(block, next);
            for &inst in self.instructions(block) {
                inst_index.insert(inst, next);
                next += 2;
            }
        }
        (inst_index, block_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_instructions_in_even_slots_across_blocks() {
        let mut f = MachineFunction::new("f", 100);
        let entry = f.append_block();
        let next = f.append_block();
        f.add_predecessor(next, entry);
        let i0 = f.append_inst(entry, MInstData {
            opcode: "mov".into(),
            defs: SmallVec::new(),
            uses: SmallVec::new(),
            operands: SmallVec::new(),
            is_terminator: false,
        });
        let i1 = f.append_inst(next, MInstData {
            opcode: "ret".into(),
            defs: SmallVec::new(),
            uses: SmallVec::new(),
            operands: SmallVec::new(),
            is_terminator: true,
        });
        let (inst_index, block_index) = f.number_instructions();
        assert_eq!(inst_index[&i0], 0);
        assert_eq!(inst_index[&i1], 2);
        assert_eq!(block_index[&entry], 0);
        assert_eq!(block_index[&next], 2);
    }

    #[test]
    fn allocates_fresh_virtual_registers_above_the_physical_range() {
        let mut f = MachineFunction::new("f", 32);
        let a = f.new_virtual_reg();
        let b = f.new_virtual_reg();
        assert!(a.is_virtual(32));
        assert!(b.is_virtual(32));
        assert_ne!(a, b);
    }
}
