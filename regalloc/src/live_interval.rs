//! Live-interval construction over machine IR. Instructions are numbered
//! 0, 2, 4, ... in block order (even slots; odd slots are reserved for spill code inserted later),
//! then a backward liveness dataflow over registers feeds a per-block interval-building walk,
//! mirroring the shape of `LiveIntervalAnalysis.cpp`'s `computeIntervals` without requiring its
//! separate `LiveVariables::AliveBlocks`/`Kills` side tables: the per-block live-out set and a
//! backward instruction walk together recover the same ranges directly.

use rustc_hash::{FxHashMap, FxHashSet};

use weld_machine::{function::MachineFunction, MBlock, Reg, TargetRegisterInfo};

/// A half-open range `[start, end)` over the instruction numbering, during which a register holds
/// a live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: u32,
    pub end: u32,
}

impl LiveRange {
    fn overlaps(&self, other: &LiveRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The live range of one register across a function, as a sorted, merged set of [LiveRange]s, plus
/// the spill weight the allocator uses to decide what to evict under register pressure.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    pub reg: Reg,
    ranges: Vec<LiveRange>,
    pub weight: f32,
}

impl LiveInterval {
    pub(crate) fn new(reg: Reg) -> Self {
        Self { reg, ranges: Vec::new(), weight: 0.0 }
    }

    /// Merges `range` into the interval's range set, keeping it sorted and coalescing overlapping
    /// or touching ranges.
    pub fn add_range(&mut self, range: LiveRange) {
        if range.start >= range.end {
            return;
        }
        self.ranges.push(range);
        self.ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<LiveRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    /// Truncates whichever currently-open range covers `pos` so that it starts exactly at `pos`.
    /// Used when a backward walk reaches the defining instruction of a register that was already
    /// live from later in the block: the range should start at the def, not at the block entry.
    fn start_at(&mut self, pos: u32) {
        if let Some(r) = self.ranges.iter_mut().find(|r| r.start <= pos && pos < r.end) {
            r.start = pos;
        } else {
            self.ranges.push(LiveRange { start: pos, end: pos + 1 });
            self.ranges.sort_by_key(|r| r.start);
        }
    }

    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    pub fn start(&self) -> u32 {
        self.ranges.first().map_or(u32::MAX, |r| r.start)
    }

    pub fn end(&self) -> u32 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.ranges.iter().any(|r| other.ranges.iter().any(|o| r.overlaps(o)))
    }

    pub fn live_at(&self, pos: u32) -> bool {
        self.ranges.iter().any(|r| r.start <= pos && pos < r.end)
    }

    pub fn expired_at(&self, pos: u32) -> bool {
        self.end() <= pos
    }

    /// A fixed (physical-register) interval is never a spill candidate.
    pub fn is_fixed(&self, reginfo: &impl TargetRegisterInfo) -> bool {
        reginfo.is_physical(self.reg)
    }
}

fn successors(mf: &MachineFunction, blocks: &[MBlock]) -> FxHashMap<MBlock, Vec<MBlock>> {
    let mut succs: FxHashMap<MBlock, Vec<MBlock>> = blocks.iter().map(|&b| (b, Vec::new())).collect();
    for &b in blocks {
        for &p in mf.predecessors(b) {
            succs.entry(p).or_default().push(b);
        }
    }
    succs
}

/// Classical backward, block-level register liveness, the machine-IR analogue of
/// `weld-ir-analysis`'s SSA-value liveness: no phis to account for here, since machine IR is
/// post-PHI-elimination, so each block's def/use sets are just its instructions' `defs`/`uses`.
fn block_liveness(
    mf: &MachineFunction,
    blocks: &[MBlock],
) -> (FxHashMap<MBlock, FxHashSet<Reg>>, FxHashMap<MBlock, FxHashSet<Reg>>) {
    let succs = successors(mf, blocks);

    let mut def: FxHashMap<MBlock, FxHashSet<Reg>> = FxHashMap::default();
    let mut uses: FxHashMap<MBlock, FxHashSet<Reg>> = FxHashMap::default();
    for &b in blocks {
        let mut block_def = FxHashSet::default();
        let mut block_use = FxHashSet::default();
        for &inst in mf.instructions(b) {
            let data = mf.inst(inst);
            for &r in &data.uses {
                if !block_def.contains(&r) {
                    block_use.insert(r);
                }
            }
            for &r in &data.defs {
                block_def.insert(r);
            }
        }
        def.insert(b, block_def);
        uses.insert(b, block_use);
    }

    let mut live_in: FxHashMap<MBlock, FxHashSet<Reg>> = blocks.iter().map(|&b| (b, FxHashSet::default())).collect();
    let mut live_out: FxHashMap<MBlock, FxHashSet<Reg>> = blocks.iter().map(|&b| (b, FxHashSet::default())).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for &b in blocks.iter().rev() {
            let mut new_out = FxHashSet::default();
            for succ in &succs[&b] {
                new_out.extend(live_in[succ].iter().copied());
            }
            let mut new_in = uses[&b].clone();
            for &r in &new_out {
                if !def[&b].contains(&r) {
                    new_in.insert(r);
                }
            }
            if live_out[&b] != new_out {
                live_out.insert(b, new_out);
                changed = true;
            }
            if live_in[&b] != new_in {
                live_in.insert(b, new_in);
                changed = true;
            }
        }
    }

    (live_in, live_out)
}

/// Natural-loop nesting depth of each block, used only to weight spill candidates (weight
/// accumulates `10^loop_depth` per occurrence). A lightweight local computation (iterative
/// dominance plus back-edge flood fill) rather than a reusable analysis, since `weld-machine`'s
/// flat block list has no `ControlFlowGraph` trait impl of its own to share with `weld-ir-analysis`.
fn loop_depths(mf: &MachineFunction, blocks: &[MBlock]) -> FxHashMap<MBlock, u32> {
    let Some(entry) = mf.entry_block() else { return FxHashMap::default() };
    let all: FxHashSet<MBlock> = blocks.iter().copied().collect();
    let mut dom: FxHashMap<MBlock, FxHashSet<MBlock>> = blocks.iter().map(|&b| (b, all.clone())).collect();
    dom.insert(entry, FxHashSet::from_iter([entry]));

    let mut changed = true;
    while changed {
        changed = false;
        for &b in blocks {
            if b == entry {
                continue;
            }
            let preds = mf.predecessors(b);
            if preds.is_empty() {
                continue;
            }
            let mut new_dom: Option<FxHashSet<MBlock>> = None;
            for &p in preds {
                new_dom = Some(match new_dom {
                    None => dom[&p].clone(),
                    Some(acc) => acc.intersection(&dom[&p]).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(b);
            if dom[&b] != new_dom {
                dom.insert(b, new_dom);
                changed = true;
            }
        }
    }

    let mut headers: FxHashSet<MBlock> = FxHashSet::default();
    let mut back_edges: Vec<(MBlock, MBlock)> = Vec::new();
    for &b in blocks {
        for &p in mf.predecessors(b) {
            if dom[&p].contains(&b) {
                back_edges.push((p, b));
                headers.insert(b);
            }
        }
    }

    let mut depth: FxHashMap<MBlock, u32> = blocks.iter().map(|&b| (b, 0)).collect();
    for &h in &headers {
        let mut body: FxHashSet<MBlock> = FxHashSet::from_iter([h]);
        let mut worklist: Vec<MBlock> =
            back_edges.iter().filter(|&&(_, hh)| hh == h).map(|&(t, _)| t).collect();
        while let Some(b) = worklist.pop() {
            if body.insert(b) {
                worklist.extend(mf.predecessors(b).iter().copied());
            }
        }
        for &b in &body {
            *depth.get_mut(&b).expect("body block must be in the function") += 1;
        }
    }
    depth
}

/// Builds one [LiveInterval] per register referenced in `mf`. Physical registers get intervals too
/// (the linear scan's "fixed" set); their weight is left at `f32::INFINITY` by the caller so they
/// are never chosen as spill candidates.
pub fn build_intervals(mf: &MachineFunction, reginfo: &impl TargetRegisterInfo) -> FxHashMap<Reg, LiveInterval> {
    let blocks: Vec<MBlock> = mf.blocks().collect();
    let (inst_index, block_index) = mf.number_instructions();
    let (_, live_out) = block_liveness(mf, &blocks);
    let depths = loop_depths(mf, &blocks);

    let mut block_end: FxHashMap<MBlock, u32> = FxHashMap::default();
    for (i, &b) in blocks.iter().enumerate() {
        let end = if i + 1 < blocks.len() {
            block_index[&blocks[i + 1]]
        } else {
            mf.instructions(b).last().map_or(block_index[&b], |last| inst_index[last] + 2)
        };
        block_end.insert(b, end);
    }

    let mut intervals: FxHashMap<Reg, LiveInterval> = FxHashMap::default();
    for &b in blocks.iter().rev() {
        let start_num = block_index[&b];
        let end_num = block_end[&b];
        let depth = depths.get(&b).copied().unwrap_or(0);

        let mut live: FxHashSet<Reg> = live_out[&b].clone();
        for &reg in &live {
            intervals.entry(reg).or_insert_with(|| LiveInterval::new(reg)).add_range(LiveRange { start: start_num, end: end_num });
            add_alias_range(&mut intervals, reginfo, reg, LiveRange { start: start_num, end: end_num });
        }

        for &inst in mf.instructions(b).iter().rev() {
            let data = mf.inst(inst);
            let n = inst_index[&inst];

            for &reg in &data.defs {
                let iv = intervals.entry(reg).or_insert_with(|| LiveInterval::new(reg));
                iv.start_at(n);
                iv.weight += if reginfo.is_physical(reg) { f32::INFINITY } else { 10f32.powi(depth as i32) };
                live.remove(&reg);
                start_alias_at(&mut intervals, reginfo, reg, n);
            }
            for &reg in &data.uses {
                let iv = intervals.entry(reg).or_insert_with(|| LiveInterval::new(reg));
                if !live.contains(&reg) {
                    iv.add_range(LiveRange { start: start_num, end: n + 1 });
                    live.insert(reg);
                    add_alias_range(&mut intervals, reginfo, reg, LiveRange { start: start_num, end: n + 1 });
                }
                iv.weight += if reginfo.is_physical(reg) { f32::INFINITY } else { 10f32.powi(depth as i32) };
            }
        }
    }

    for iv in intervals.values_mut() {
        if reginfo.is_physical(iv.reg) {
            iv.weight = f32::INFINITY;
        }
    }

    intervals
}

/// A physical register's interval must block every register that aliases it too: writing `al`
/// must be seen as clobbering `eax`'s interval, not just `al`'s own. Mirrors the range just added
/// for `reg` onto every other register in its alias set.
fn add_alias_range(
    intervals: &mut FxHashMap<Reg, LiveInterval>,
    reginfo: &impl TargetRegisterInfo,
    reg: Reg,
    range: LiveRange,
) {
    if !reginfo.is_physical(reg) {
        return;
    }
    for alias in reginfo.alias_set(reg) {
        if alias == reg {
            continue;
        }
        intervals.entry(alias).or_insert_with(|| LiveInterval::new(alias)).add_range(range);
    }
}

fn start_alias_at(intervals: &mut FxHashMap<Reg, LiveInterval>, reginfo: &impl TargetRegisterInfo, reg: Reg, pos: u32) {
    if !reginfo.is_physical(reg) {
        return;
    }
    for alias in reginfo.alias_set(reg) {
        if alias == reg {
            continue;
        }
        intervals.entry(alias).or_insert_with(|| LiveInterval::new(alias)).start_at(pos);
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;
    use weld_machine::{function::MInstData, TestTarget};

    use super::*;

    fn target() -> TestTarget {
        TestTarget::new(4)
    }

    #[test]
    fn a_value_live_across_a_block_boundary_spans_both_blocks() {
        let mut mf = MachineFunction::new("f", 4);
        let entry = mf.append_block();
        let next = mf.append_block();
        mf.add_predecessor(next, entry);
        let v = mf.new_virtual_reg();

        mf.append_inst(entry, MInstData {
            opcode: "mov".into(),
            defs: smallvec![v],
            uses: smallvec![],
            operands: smallvec![],
            is_terminator: false,
        });
        mf.append_inst(entry, MInstData {
            opcode: "jmp".into(),
            defs: smallvec![],
            uses: smallvec![],
            operands: smallvec![],
            is_terminator: true,
        });
        mf.append_inst(next, MInstData {
            opcode: "ret".into(),
            defs: smallvec![],
            uses: smallvec![v],
            operands: smallvec![],
            is_terminator: true,
        });

        let t = target();
        let intervals = build_intervals(&mf, &t);
        let iv = &intervals[&v];
        // v is defined at the start of `entry` (slot 0) and used by `ret` in `next` (slot 4); it
        // must stay live across the intervening terminator and the block boundary, but not beyond
        // its one use.
        assert!(iv.live_at(0));
        assert!(iv.live_at(2));
        assert!(iv.live_at(4));
        assert!(!iv.live_at(5));
    }

    #[test]
    fn two_intervals_that_never_coexist_do_not_overlap() {
        let mut mf = MachineFunction::new("f", 4);
        let entry = mf.append_block();
        let a = mf.new_virtual_reg();
        let b = mf.new_virtual_reg();

        mf.append_inst(entry, MInstData {
            opcode: "mov".into(),
            defs: smallvec![a],
            uses: smallvec![],
            operands: smallvec![],
            is_terminator: false,
        });
        mf.append_inst(entry, MInstData {
            opcode: "use".into(),
            defs: smallvec![],
            uses: smallvec![a],
            operands: smallvec![],
            is_terminator: false,
        });
        mf.append_inst(entry, MInstData {
            opcode: "mov".into(),
            defs: smallvec![b],
            uses: smallvec![],
            operands: smallvec![],
            is_terminator: false,
        });
        mf.append_inst(entry, MInstData {
            opcode: "ret".into(),
            defs: smallvec![],
            uses: smallvec![b],
            operands: smallvec![],
            is_terminator: true,
        });

        let t = target();
        let intervals = build_intervals(&mf, &t);
        assert!(!intervals[&a].overlaps(&intervals[&b]));
    }
}
