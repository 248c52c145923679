use rustc_hash::{FxHashMap, FxHashSet};
use weld_ir::{
    function::Function,
    instruction::{BinaryOp, UnaryOp},
    pass::{FunctionPass, PassExecutionState, PassResult},
    types::TypeInterner,
    value::ValueData,
    Block, CoreError, Inst, InstData, Type, Value,
};

/// Canonicalizes operand order of associative, commutative integer binary operations, linearizes
/// tree-shaped chains, pushes subtraction down into addition of a negation, and hoists constants
/// together through a chain of them, so a following [crate::constprop::ConstantFold] run can fold
/// what reassociation exposes.
///
/// Restricted to [BinaryOp::is_integer_associative_commutative] operators: wraparound integer
/// add/mul/and/or/xor (plus integer subtraction, which this pass first rewrites into an addition
/// of a negation). Floating point is never reassociated, since rounding makes these operators
/// non-associative in general.
#[derive(Default)]
pub struct Reassociate;

impl Reassociate {
    fn rank(func: &Function, order: &FxHashMap<Value, u32>, v: Value) -> u32 {
        if matches!(func.value_data(v), ValueData::Const { .. }) {
            return 0;
        }
        *order.get(&v).unwrap_or(&u32::MAX)
    }

    fn is_const(func: &Function, v: Value) -> bool {
        matches!(func.value_data(v), ValueData::Const { .. })
    }

    /// DFS reverse post-order over the function's reachable blocks, the traversal reassociation
    /// ranks instructions by. Unreachable blocks (no entry, or never visited) are appended in their
    /// own arbitrary order after the reachable ones; their contents never feed a rank comparison
    /// that matters since live code can't reference them.
    fn reverse_postorder(func: &Function) -> Vec<Block> {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::new();
        fn visit(func: &Function, b: Block, visited: &mut FxHashSet<Block>, postorder: &mut Vec<Block>) {
            if !visited.insert(b) {
                return;
            }
            for succ in func.successors(b) {
                visit(func, succ, visited, postorder);
            }
            postorder.push(b);
        }
        if let Some(entry) = func.entry_block() {
            visit(func, entry, &mut visited, &mut postorder);
        }
        for block in func.blocks() {
            visit(func, block, &mut visited, &mut postorder);
        }
        postorder.reverse();
        postorder
    }

    /// Assigns every value in `func` a reassociation rank: constants get 0 (handled separately by
    /// [Self::rank], not stored here), arguments all get 1, and instruction results get a rank
    /// increasing with their position in reverse post-order — except φ-nodes, terminators,
    /// allocas, mallocs, and other side-effecting instructions, which take the rank of their
    /// containing block instead of advancing past it.
    fn build_order(func: &Function) -> FxHashMap<Value, u32> {
        let mut order = FxHashMap::default();
        for arg in func.arguments() {
            order.insert(*arg, 1);
        }

        let mut next = 2u32;
        for block in Self::reverse_postorder(func) {
            let block_rank = next;
            for &inst in func.instructions(block) {
                let data = func.inst(inst);
                let takes_block_rank = data.is_phi()
                    || data.is_terminator()
                    || matches!(data, InstData::Alloca { .. } | InstData::Malloc { .. })
                    || data.has_side_effects();
                let rank = if takes_block_rank {
                    block_rank
                } else {
                    let r = next;
                    next += 1;
                    r
                };
                if let Some(result) = func.result_of(inst) {
                    order.insert(result, rank);
                }
            }
        }
        order
    }

    /// Negates `v`, pushing the negation as deep as possible: `neg(neg(x))` cancels to `x`, and
    /// `neg(p + q)` distributes to `neg(p) + neg(q)` (each side negated recursively) rather than
    /// wrapping the whole sum in one `neg`. Falls back to emitting a fresh `neg` instruction before
    /// `before` for anything else (including constants, left for a later constant-fold pass).
    fn negate(func: &mut Function, v: Value, ty: Type, before: Inst) -> Result<Value, CoreError> {
        if let ValueData::Inst { inst: def_inst, .. } = func.value_data(v) {
            let def_inst = *def_inst;
            match *func.inst(def_inst) {
                InstData::Unary { op: UnaryOp::Neg, arg, .. } => return Ok(arg),
                InstData::Binary { op: BinaryOp::Add, lhs, rhs, .. } => {
                    let neg_lhs = Self::negate(func, lhs, ty, before)?;
                    let neg_rhs = Self::negate(func, rhs, ty, before)?;
                    let sum =
                        func.insert_inst_before(before, InstData::Binary { op: BinaryOp::Add, ty, lhs: neg_lhs, rhs: neg_rhs })?;
                    return func.result_of(sum).ok_or(CoreError::PassFatal("binary op produced no result"));
                }
                _ => {}
            }
        }
        let neg = func.insert_inst_before(before, InstData::Unary { op: UnaryOp::Neg, ty, arg: v })?;
        func.result_of(neg).ok_or(CoreError::PassFatal("unary op produced no result"))
    }

    /// Rewrites an integer `a - b` into `a + (-b)`, with `-b` pushed as deep as [Self::negate]
    /// allows. Returns `true` unconditionally for any `Sub` (there's always something to rewrite).
    fn rewrite_subtraction(func: &mut Function, inst: Inst) -> Result<bool, CoreError> {
        let InstData::Binary { op: BinaryOp::Sub, ty, rhs, .. } = *func.inst(inst) else { return Ok(false) };
        let neg_rhs = Self::negate(func, rhs, ty, inst)?;
        func.set_operand(inst, 1, neg_rhs);
        let InstData::Binary { op, .. } = func.inst_mut(inst) else { unreachable!("checked above") };
        *op = BinaryOp::Add;
        Ok(true)
    }

    /// Linearizes a tree-shaped `(A op B) op (C op D)` into `((A op B) op C) op D`, provided both
    /// sides of `inst` are themselves results of the same associative-commutative operator.
    fn linearize(func: &mut Function, inst: Inst) -> Result<bool, CoreError> {
        let InstData::Binary { op, ty, lhs, rhs } = *func.inst(inst) else { return Ok(false) };
        let ValueData::Inst { inst: lhs_inst, .. } = func.value_data(lhs) else { return Ok(false) };
        let lhs_inst = *lhs_inst;
        let ValueData::Inst { inst: rhs_inst, .. } = func.value_data(rhs) else { return Ok(false) };
        let rhs_inst = *rhs_inst;
        let InstData::Binary { op: lhs_op, .. } = *func.inst(lhs_inst) else { return Ok(false) };
        let InstData::Binary { op: rhs_op, lhs: c, rhs: d, .. } = *func.inst(rhs_inst) else { return Ok(false) };
        if lhs_op != op || rhs_op != op {
            return Ok(false);
        }

        let new_lhs = func.insert_inst_before(inst, InstData::Binary { op, ty, lhs, rhs: c })?;
        let new_lhs_val = func.result_of(new_lhs).ok_or(CoreError::PassFatal("binary op produced no result"))?;
        func.set_operand(inst, 0, new_lhs_val);
        func.set_operand(inst, 1, d);
        Ok(true)
    }

    /// If `inst` is `(x op a) op b` and `rank(b) < rank(a)`, rewrites it to `(x op b) op a`, so the
    /// lower-ranked operand moves next to `x` and the higher-ranked one moves outward.
    fn rank_swap(func: &mut Function, order: &FxHashMap<Value, u32>, inst: Inst) -> Result<bool, CoreError> {
        let InstData::Binary { op, rhs: b, lhs, .. } = *func.inst(inst) else { return Ok(false) };
        let ValueData::Inst { inst: inner_inst, .. } = func.value_data(lhs) else { return Ok(false) };
        let inner_inst = *inner_inst;
        let InstData::Binary { op: inner_op, rhs: a, .. } = *func.inst(inner_inst) else { return Ok(false) };
        if inner_op != op {
            return Ok(false);
        }
        if Self::rank(func, order, b) < Self::rank(func, order, a) {
            func.set_operand(inner_inst, 1, b);
            func.set_operand(inst, 1, a);
            return Ok(true);
        }
        Ok(false)
    }

    /// If `inst` is `(x op c1) op c2` with both `c1`/`c2` constant and `x` not, rewrites it to
    /// `x op (c1 op c2)`, introducing a new instruction for the constant pair so a later
    /// constant-fold pass collapses it. Returns `true` if it made a change.
    fn hoist_constants(func: &mut Function, inst: Inst) -> Result<bool, CoreError> {
        let InstData::Binary { op, ty, lhs, rhs } = *func.inst(inst) else { return Ok(false) };
        if !Self::is_const(func, rhs) {
            return Ok(false);
        }
        let ValueData::Inst { inst: inner_inst, .. } = func.value_data(lhs) else { return Ok(false) };
        let inner_inst = *inner_inst;
        let InstData::Binary { op: inner_op, lhs: inner_x, rhs: inner_c, .. } = *func.inst(inner_inst) else {
            return Ok(false);
        };
        if inner_op != op || !Self::is_const(func, inner_c) || Self::is_const(func, inner_x) {
            return Ok(false);
        }

        let combined = func.insert_inst_before(inst, InstData::Binary { op, ty, lhs: inner_c, rhs })?;
        let combined_val = func.result_of(combined).ok_or(CoreError::PassFatal("binary op produced no result"))?;
        func.set_operand(inst, 0, inner_x);
        func.set_operand(inst, 1, combined_val);
        Ok(true)
    }
}

impl FunctionPass for Reassociate {
    fn name(&self) -> &'static str {
        "reassociate"
    }

    fn preserves_cfg(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        func: &mut Function,
        _types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError> {
        let mut changed = false;

        loop {
            let order = Self::build_order(func);
            let mut round_changed = false;
            let blocks: Vec<_> = func.blocks().collect();
            for block in blocks {
                let insts: Vec<Inst> = func.instructions(block).to_vec();
                for inst in insts {
                    if !func.is_inst_live(inst) {
                        continue;
                    }
                    let InstData::Binary { op, .. } = *func.inst(inst) else { continue };
                    if op == BinaryOp::Sub && Self::rewrite_subtraction(func, inst)? {
                        round_changed = true;
                        state.statistics_mut().bump("reassociate.sub_to_add");
                    }

                    let InstData::Binary { op, lhs, rhs, .. } = *func.inst(inst) else { continue };
                    if !op.is_integer_associative_commutative() {
                        continue;
                    }

                    let lhs_const = Self::is_const(func, lhs);
                    let rhs_const = Self::is_const(func, rhs);
                    let should_swap = if lhs_const && !rhs_const {
                        true
                    } else if !lhs_const && !rhs_const {
                        Self::rank(func, &order, lhs) < Self::rank(func, &order, rhs)
                    } else {
                        false
                    };
                    if should_swap {
                        func.set_operand(inst, 0, rhs);
                        func.set_operand(inst, 1, lhs);
                        round_changed = true;
                        state.statistics_mut().bump("reassociate.canonicalized");
                    }

                    if Self::linearize(func, inst)? {
                        round_changed = true;
                        state.statistics_mut().bump("reassociate.linearized");
                    }

                    if Self::rank_swap(func, &order, inst)? {
                        round_changed = true;
                        state.statistics_mut().bump("reassociate.rank_swapped");
                    }

                    if Self::hoist_constants(func, inst)? {
                        round_changed = true;
                        state.statistics_mut().bump("reassociate.hoisted");
                    }
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

#[cfg(test)]
mod tests {
    use weld_ir::{types::TypeInterner, value::Constant};

    use super::*;
    use crate::test_util::run_pass;

    #[test]
    fn moves_a_constant_operand_to_the_right() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let x = f.append_argument(i32ty);
        let c = f.make_const(i32ty, Constant::Int(5));
        let add = f.append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: c, rhs: x }).unwrap();
        let add_val = f.result_of(add).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(add_val) }).unwrap();

        let result = run_pass(&mut Reassociate, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        let InstData::Binary { lhs, rhs, .. } = f.inst(add) else { panic!("expected binary") };
        assert_eq!(*lhs, x);
        assert_eq!(*rhs, c);
    }

    #[test]
    fn hoists_constants_through_a_chain() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let x = f.append_argument(i32ty);
        let c1 = f.make_const(i32ty, Constant::Int(1));
        let c2 = f.make_const(i32ty, Constant::Int(2));
        let inner = f.append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: x, rhs: c1 }).unwrap();
        let inner_val = f.result_of(inner).unwrap();
        let outer =
            f.append_inst(entry, InstData::Binary { op: BinaryOp::Add, ty: i32ty, lhs: inner_val, rhs: c2 }).unwrap();
        let outer_val = f.result_of(outer).unwrap();
        f.append_inst(entry, InstData::Ret { value: Some(outer_val) }).unwrap();

        let result = run_pass(&mut Reassociate, &mut f, &types).unwrap();
        assert_eq!(result, PassResult::Changed);
        let InstData::Binary { lhs, rhs, .. } = f.inst(outer) else { panic!("expected binary") };
        assert_eq!(*lhs, x);
        match f.value_data(*rhs) {
            ValueData::Inst { .. } => {}
            other => panic!("expected the hoisted constant pair to be a fresh instruction, got {other:?}"),
        }
    }
}
