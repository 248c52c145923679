use std::collections::HashSet;

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    block::BlockData,
    error::{CoreError, IrInvariant},
    instruction::InstData,
    symbol::Symbol,
    value::{Constant, Use, ValueData},
    Block, Inst, Type, Value,
};

/// A function: an ordered list of formal [Value::Argument]s and an ordered sequence of
/// [Block]s, the first of which is the entry block.
///
/// A function with an empty block list is an external declaration.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "func");

pub struct Function {
    pub name: Symbol,
    pub sig: Type,
    pub linkage: Linkage,

    arguments: Vec<Value>,
    blocks: PrimaryMap<Block, BlockData>,
    block_order: Vec<Block>,
    live_blocks: HashSet<Block>,

    insts: PrimaryMap<Inst, InstData>,
    inst_block: SecondaryMap<Inst, PackedBlock>,
    inst_result: SecondaryMap<Inst, PackedValue>,
    live_insts: HashSet<Inst>,

    values: PrimaryMap<Value, ValueData>,
    value_uses: SecondaryMap<Value, Vec<Use>>,
    live_values: HashSet<Value>,
    const_cache: FxHashMap<(Type, Constant), Value>,
}

#[derive(Copy, Clone, Default)]
struct PackedBlock(Option<Block>);

#[derive(Copy, Clone, Default)]
struct PackedValue(Option<Value>);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Linkage {
    Internal,
    External,
}

impl Function {
    pub fn new(name: impl Into<Symbol>, sig: Type) -> Self {
        Self {
            name: name.into(),
            sig,
            linkage: Linkage::External,
            arguments: Vec::new(),
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            live_blocks: HashSet::new(),
            insts: PrimaryMap::new(),
            inst_block: SecondaryMap::new(),
            inst_result: SecondaryMap::new(),
            live_insts: HashSet::new(),
            values: PrimaryMap::new(),
            value_uses: SecondaryMap::new(),
            live_values: HashSet::new(),
            const_cache: FxHashMap::default(),
        }
    }

    /// True if this function has no basic blocks, i.e. it is a declaration of an external
    /// function.
    pub fn is_external(&self) -> bool {
        self.block_order.is_empty()
    }

    // ----- arguments -------------------------------------------------------------------------

    pub fn append_argument(&mut self, ty: Type) -> Value {
        let num = self.arguments.len() as u32;
        let value = self.values.push(ValueData::Argument { ty, num });
        self.live_values.insert(value);
        self.arguments.push(value);
        value
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    // ----- blocks ------------------------------------------------------------------------------

    pub fn append_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.live_blocks.insert(block);
        self.block_order.push(block);
        block
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.block_order.first().copied()
    }

    /// Blocks in function (program) order. This is the authoritative iteration order used
    /// elsewhere (reassociation ranks, the pass manager's block sweep).
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.block_order.iter().copied()
    }

    pub fn num_blocks(&self) -> usize {
        self.block_order.len()
    }

    pub fn is_block_live(&self, block: Block) -> bool {
        self.live_blocks.contains(&block)
    }

    pub fn block(&self, block: Block) -> &BlockData {
        debug_assert!(self.is_block_live(block));
        &self.blocks[block]
    }

    pub fn predecessors(&self, block: Block) -> &[Block] {
        self.blocks[block].predecessors()
    }

    pub fn successors(&self, block: Block) -> SmallVec<[Block; 2]> {
        self.terminator(block).map(|t| self.inst(t).successors()).unwrap_or_default()
    }

    pub fn instructions(&self, block: Block) -> &[Inst] {
        self.blocks[block].instructions()
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        self.blocks[block].insts.last().copied()
    }

    /// Inserts a new, empty block immediately after `after` in program order. Used by passes that
    /// need to materialize a synthetic block (e.g. the unification pre-pass for post-dominance,
    /// or ADCE's synthetic entry).
    pub fn insert_block_after(&mut self, after: Block) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.live_blocks.insert(block);
        let pos = self.block_order.iter().position(|b| *b == after).expect("block not found");
        self.block_order.insert(pos + 1, block);
        block
    }

    /// Removes `block` from the function. The block must have no instructions remaining (the
    /// caller is responsible for erasing them and updating predecessor/phi bookkeeping first via
    /// [Self::remove_predecessor]).
    pub fn erase_block(&mut self, block: Block) {
        debug_assert!(self.blocks[block].insts.is_empty(), "block must be emptied before erasure");
        self.live_blocks.remove(&block);
        self.block_order.retain(|b| *b != block);
    }

    // ----- instruction mutation primitives -------------------------------------------------------

    fn record_uses(&mut self, inst: Inst) {
        let data = self.insts[inst].clone();
        for (slot, value) in data.operands().into_iter().enumerate() {
            self.value_uses[value].push(Use { user: inst, slot: slot as u32 });
        }
    }

    fn forget_uses(&mut self, inst: Inst) {
        let data = self.insts[inst].clone();
        for (slot, value) in data.operands().into_iter().enumerate() {
            if let Some(uses) = self.value_uses.get_mut(value) {
                uses.retain(|u| !(u.user == inst && u.slot == slot as u32));
            }
        }
    }

    /// Appends `data` to the end of `block`. Fails with
    /// [IrInvariant::InsertAfterTerminator] if the block already has a terminator and `data`
    /// is not itself replacing it, and with [IrInvariant::PhiArityMismatch] if `data` is a
    /// phi whose incoming-operand count does not match the block's current predecessor count.
    pub fn append_inst(&mut self, block: Block, data: InstData) -> Result<Inst, CoreError> {
        if self.blocks[block].insts.last().is_some_and(|t| self.insts[*t].is_terminator()) {
            return Err(IrInvariant::InsertAfterTerminator(block).into());
        }
        self.check_phi_arity(block, &data)?;
        let inst = self.push_inst(block, data);
        self.blocks[block].insts.push(inst);
        if self.insts[inst].is_terminator() {
            self.sync_successors_on_terminator_change(block, None);
        }
        Ok(inst)
    }

    /// Inserts `data` immediately before `before` in its containing block.
    pub fn insert_inst_before(&mut self, before: Inst, data: InstData) -> Result<Inst, CoreError> {
        let block = self.block_of(before);
        self.check_phi_arity(block, &data)?;
        let inst = self.push_inst(block, data);
        let pos = self.blocks[block].insts.iter().position(|i| *i == before).unwrap();
        self.blocks[block].insts.insert(pos, inst);
        Ok(inst)
    }

    /// Inserts `data` immediately after `after`. Fails with [IrInvariant::InsertAfterTerminator]
    /// if `after` is the block's terminator.
    pub fn insert_inst_after(&mut self, after: Inst, data: InstData) -> Result<Inst, CoreError> {
        let block = self.block_of(after);
        if self.insts[after].is_terminator() {
            return Err(IrInvariant::InsertAfterTerminator(block).into());
        }
        self.check_phi_arity(block, &data)?;
        let inst = self.push_inst(block, data);
        let pos = self.blocks[block].insts.iter().position(|i| *i == after).unwrap();
        self.blocks[block].insts.insert(pos + 1, inst);
        Ok(inst)
    }

    fn check_phi_arity(&self, block: Block, data: &InstData) -> Result<(), CoreError> {
        if let InstData::Phi { incoming, .. } = data {
            let expected = self.blocks[block].preds.len();
            if incoming.len() != expected {
                return Err(IrInvariant::PhiArityMismatch {
                    block,
                    expected,
                    actual: incoming.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn push_inst(&mut self, block: Block, data: InstData) -> Inst {
        let result_ty = data.result_ty();
        let inst = self.insts.push(data);
        self.live_insts.insert(inst);
        self.inst_block[inst] = PackedBlock(Some(block));
        if let Some(ty) = result_ty {
            let value = self.values.push(ValueData::Inst { ty, inst });
            self.live_values.insert(value);
            self.inst_result[inst] = PackedValue(Some(value));
        }
        self.record_uses(inst);
        inst
    }

    /// Erases `inst`, which must have no uses of its result (if any). Detaches the instruction's
    /// operand uses first, via the two-phase `drop_all_references`-then-free pattern.
    pub fn erase_inst(&mut self, inst: Inst) -> Result<(), CoreError> {
        if let Some(result) = self.result_of(inst) {
            if !self.value_uses[result].is_empty() {
                return Err(IrInvariant::DestroyedValueStillUsed(result).into());
            }
        }
        self.drop_all_references(inst);
        let block = self.block_of(inst);
        self.blocks[block].insts.retain(|i| *i != inst);
        self.live_insts.remove(&inst);
        if let Some(result) = self.inst_result[inst].0 {
            self.live_values.remove(&result);
        }
        self.inst_result[inst] = PackedValue(None);
        Ok(())
    }

    /// Detaches all of `inst`'s outgoing operand uses without destroying it, breaking any
    /// use/def cycles through phi nodes before the instruction (or its result) is freed.
    pub fn drop_all_references(&mut self, inst: Inst) {
        self.forget_uses(inst);
    }

    pub fn result_of(&self, inst: Inst) -> Option<Value> {
        self.inst_result[inst].0
    }

    pub fn block_of(&self, inst: Inst) -> Block {
        self.inst_block[inst].0.expect("instruction has no containing block")
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    pub fn is_inst_live(&self, inst: Inst) -> bool {
        self.live_insts.contains(&inst)
    }

    // ----- values ------------------------------------------------------------------------------

    pub fn value_data(&self, value: Value) -> &ValueData {
        &self.values[value]
    }

    pub fn value_type(&self, value: Value) -> Type {
        match &self.values[value] {
            ValueData::Inst { ty, .. }
            | ValueData::Argument { ty, .. }
            | ValueData::Const { ty, .. }
            | ValueData::Global { ty, .. } => *ty,
            ValueData::BlockRef(_) => self.sig,
        }
    }

    pub fn is_value_live(&self, value: Value) -> bool {
        self.live_values.contains(&value)
    }

    /// Interns a constant of type `ty`. Constants compare equal structurally, so the same
    /// bit pattern always yields the same [Value] within a function.
    pub fn make_const(&mut self, ty: Type, konst: Constant) -> Value {
        if let Some(v) = self.const_cache.get(&(ty, konst)) {
            return *v;
        }
        let v = self.values.push(ValueData::Const { ty, konst });
        self.live_values.insert(v);
        self.const_cache.insert((ty, konst), v);
        v
    }

    pub fn uses_of(&self, value: Value) -> &[Use] {
        self.value_uses.get(value).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_uses(&self, value: Value) -> bool {
        !self.uses_of(value).is_empty()
    }

    /// Rewrites every use of `old` to refer to `new` instead, without cloning either value. This
    /// never touches `old`'s or `new`'s definitions, only operand slots of users.
    pub fn replace_all_uses_with(&mut self, old: Value, new: Value) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.value_uses[old]);
        for u in &uses {
            self.insts[u.user].set_operand(u.slot, new);
        }
        self.value_uses[new].extend(uses);
    }

    /// Rewrites operand `slot` of `inst` to `new`, returning the value that previously occupied
    /// it. Unlike reaching into [Self::inst_mut] directly, this keeps `value_uses` in sync, so it
    /// is the right primitive for passes that reorder or replace a single operand in place (e.g.
    /// reassociation canonicalizing commutative operand order) rather than rewriting every use of
    /// a value at once.
    pub fn set_operand(&mut self, inst: Inst, slot: u32, new: Value) -> Value {
        let old = self.insts[inst].operand(slot);
        if let Some(uses) = self.value_uses.get_mut(old) {
            uses.retain(|u| !(u.user == inst && u.slot == slot));
        }
        self.insts[inst].set_operand(slot, new);
        self.value_uses[new].push(Use { user: inst, slot });
        old
    }

    /// Removes `pred` as a predecessor of `block`, stripping the corresponding incoming entry
    /// from every phi at the top of `block`. `pred` must currently be a predecessor.
    pub fn remove_predecessor(&mut self, block: Block, pred: Block) {
        let idx = self.blocks[block]
            .preds
            .iter()
            .position(|p| *p == pred)
            .expect("pred is not a predecessor of block");
        self.blocks[block].preds.remove(idx);

        let phis: SmallVec<[Inst; 4]> = self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|i| self.insts[*i].is_phi())
            .collect();
        for phi in phis {
            if let InstData::Phi { incoming, .. } = &mut self.insts[phi] {
                if let Some(pos) = incoming.iter().position(|(b, _)| *b == pred) {
                    let (_, removed_value) = incoming.remove(pos);
                    if let Some(uses) = self.value_uses.get_mut(removed_value) {
                        uses.retain(|u| !(u.user == phi && u.slot as usize == pos));
                        // Slots above `pos` shifted down by one.
                        for u in uses.iter_mut() {
                            if u.user == phi && u.slot as usize > pos {
                                u.slot -= 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Adds `pred` as a new predecessor of `block`, appending a `null`-ish placeholder incoming
    /// value to every phi at the top of `block`; callers are expected to patch the incoming value
    /// in afterwards (used by ADCE's edge retargeting and mem2reg's unreachable-predecessor
    /// patch-up).
    pub fn add_predecessor(&mut self, block: Block, pred: Block, incoming_for_phis: Value) {
        self.blocks[block].preds.push(pred);
        let phis: SmallVec<[Inst; 4]> = self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|i| self.insts[*i].is_phi())
            .collect();
        for phi in phis {
            let slot = if let InstData::Phi { incoming, .. } = &mut self.insts[phi] {
                let slot = incoming.len() as u32;
                incoming.push((pred, incoming_for_phis));
                slot
            } else {
                unreachable!()
            };
            self.value_uses[incoming_for_phis].push(Use { user: phi, slot });
        }
    }

    /// Relabels `block`'s predecessor `old_pred` as `new_pred`, leaving every phi's arity and
    /// incoming values untouched (only the predecessor tag on the matching incoming entries
    /// changes). Used when CFG simplification merges `old_pred` into `new_pred` and `old_pred`
    /// is about to be erased, as opposed to [Self::remove_predecessor]`/`
    /// [Self::add_predecessor], which change the predecessor *count*.
    pub fn rename_predecessor(&mut self, block: Block, old_pred: Block, new_pred: Block) {
        for p in &mut self.blocks[block].preds {
            if *p == old_pred {
                *p = new_pred;
            }
        }
        let phis: SmallVec<[Inst; 4]> = self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|i| self.insts[*i].is_phi())
            .collect();
        for phi in phis {
            if let InstData::Phi { incoming, .. } = &mut self.insts[phi] {
                for (pred, _) in incoming.iter_mut() {
                    if *pred == old_pred {
                        *pred = new_pred;
                    }
                }
            }
        }
    }

    /// Updates predecessor bookkeeping after a terminator in `block` is created or changed to
    /// point at a new set of successors. `old_successors`, if given, are the successors being
    /// replaced (so their predecessor lists can be cleaned up); new successors are read from the
    /// block's current terminator.
    pub fn sync_successors_on_terminator_change(
        &mut self,
        block: Block,
        old_successors: Option<SmallVec<[Block; 2]>>,
    ) {
        if let Some(olds) = old_successors {
            for s in olds {
                self.blocks[s].preds.retain(|p| *p != block);
            }
        }
        for s in self.successors(block) {
            if !self.blocks[s].preds.contains(&block) {
                self.blocks[s].preds.push(block);
            }
        }
    }

    /// Replaces the terminator of `block` (if any) with `data`, updating predecessor bookkeeping
    /// of old and new successor blocks accordingly. This is the primitive used by CFG
    /// simplification and ADCE edge retargeting.
    pub fn set_terminator(&mut self, block: Block, data: InstData) -> Result<Inst, CoreError> {
        debug_assert!(data.is_terminator());
        let old_successors = self.terminator(block).map(|t| self.inst(t).successors());
        if let Some(old_term) = self.terminator(block) {
            self.erase_inst(old_term)?;
        }
        let inst = self.push_inst(block, data);
        self.blocks[block].insts.push(inst);
        self.sync_successors_on_terminator_change(block, old_successors);
        Ok(inst)
    }

    /// Moves the instruction range `[from, to)` of `src` (by position) to the end of `dst`,
    /// excluding `src`'s terminator. Used by block-merging in CFG simplification.
    pub fn splice(&mut self, src: Block, dst: Block) {
        let moved: Vec<Inst> = {
            let insts = &mut self.blocks[src].insts;
            let has_term = insts.last().is_some_and(|i| self.insts[*i].is_terminator());
            let end = if has_term { insts.len() - 1 } else { insts.len() };
            insts.drain(..end).collect()
        };
        for inst in &moved {
            self.inst_block[*inst] = PackedBlock(Some(dst));
        }
        let dst_insts = &mut self.blocks[dst].insts;
        let insert_at = dst_insts
            .iter()
            .position(|i| self.insts[*i].is_terminator())
            .unwrap_or(dst_insts.len());
        for (offset, inst) in moved.into_iter().enumerate() {
            dst_insts.insert(insert_at + offset, inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instruction::BinaryOp, types::TypeInterner};

    fn new_func(ty: &mut TypeInterner) -> Function {
        let i32ty = ty.i32();
        Function::new("f", i32ty)
    }

    #[test]
    fn append_and_erase_roundtrip() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = new_func(&mut types);
        let entry = f.append_block();
        let a = f.make_const(i32ty, Constant::Int(1));
        let b = f.make_const(i32ty, Constant::Int(2));
        let add = f.append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: a, rhs: b }).unwrap();
        let result = f.result_of(add).unwrap();
        assert_eq!(f.uses_of(a).len(), 1);
        f.append_inst(entry, InstData::Ret { value: Some(result) }).unwrap();
        assert!(f.inst(f.terminator(entry).unwrap()).is_terminator());

        // erasing the ret frees result's only use, then we can erase add.
        let ret = f.terminator(entry).unwrap();
        f.erase_inst(ret).unwrap();
        assert!(f.erase_inst(add).is_ok());
        assert_eq!(f.uses_of(a).len(), 0);
    }

    #[test]
    fn replace_all_uses_with_rewrites_every_operand() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = new_func(&mut types);
        let entry = f.append_block();
        let a = f.make_const(i32ty, Constant::Int(1));
        let b = f.make_const(i32ty, Constant::Int(2));
        let add1 = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: a, rhs: b })
            .unwrap();
        let r1 = f.result_of(add1).unwrap();
        let add2 = f
            .append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: r1, rhs: b })
            .unwrap();
        let r1_again = f.result_of(add2).unwrap();

        f.replace_all_uses_with(r1, a);
        assert_eq!(f.inst(add2).operand(0), a);
        assert_eq!(f.uses_of(r1).len(), 0);
        assert!(f.uses_of(a).len() >= 2);
        let _ = r1_again;
    }

    #[test]
    fn phi_arity_must_match_predecessor_count() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = new_func(&mut types);
        let entry = f.append_block();
        let target = f.append_block();
        f.append_inst(entry, InstData::Br { dest: target }).unwrap();

        let bad_phi = InstData::Phi { ty: i32ty, incoming: Default::default() };
        let err = f.append_inst(target, bad_phi).unwrap_err();
        assert!(matches!(err, CoreError::IrInvariant(IrInvariant::PhiArityMismatch { .. })));
    }
}
