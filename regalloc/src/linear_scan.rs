//! Linear-scan register allocation, grounded on `RegAllocLinearScan.cpp`'s `RA`
//! class: the same `unhandled`/`fixed`/`active`/`inactive`/`handled` interval sets, the same
//! `PhysRegTracker` alias-aware use counting, and the same spill-weight comparison to decide
//! between spilling the current interval or evicting a cheaper one already in a register.
//!
//! `handled` records every interval once it expires out of `active`/`inactive`, purely so the
//! eviction path can roll it back: when `cur` forces out lower-weight intervals to claim a
//! register, any already-finished interval that started at or after the earliest evicted start may
//! have been forced onto the stack only because the now-freed register was unavailable at the
//! time. Rolling those back re-queues them for another attempt at a register.
//!
//! Rollback is restricted to virtual (non-fixed) handled intervals — a fixed interval represents a
//! pre-colored constraint rather than a decision the allocator made, so there is nothing to undo.
//!
//! Self-spilling `cur` itself (rather than evicting a neighbor) runs `update_spilled_interval`,
//! which re-queues the tightened per-range pieces of `cur` into `unhandled` so a piece with a
//! narrower live range than the whole interval still gets a chance at a register. A single-range
//! interval has nothing left to tighten and is not re-queued.

use rustc_hash::FxHashMap;

use weld_machine::{Reg, StackSlot, TargetRegisterInfo};

use crate::{
    error::RegallocError,
    live_interval::LiveInterval,
};

/// Tracks, per physical register, how many currently-active intervals are pinned to it or to one
/// of its aliases. A register is free exactly when its count is zero.
struct PhysRegTracker {
    use_count: Vec<u32>,
}

impl PhysRegTracker {
    fn new(num_regs: u32) -> Self {
        Self { use_count: vec![0; num_regs as usize] }
    }

    fn add_use(&mut self, reginfo: &impl TargetRegisterInfo, reg: Reg) {
        for alias in reginfo.alias_set(reg) {
            self.use_count[alias.index() as usize] += 1;
        }
    }

    fn del_use(&mut self, reginfo: &impl TargetRegisterInfo, reg: Reg) {
        for alias in reginfo.alias_set(reg) {
            self.use_count[alias.index() as usize] = self.use_count[alias.index() as usize].saturating_sub(1);
        }
    }

    fn is_avail(&self, reg: Reg) -> bool {
        self.use_count[reg.index() as usize] == 0
    }
}

/// The result of a linear-scan pass: every virtual register is either assigned a physical register
/// or a stack slot (never both, and never left unresolved).
#[derive(Debug, Default)]
pub struct AllocationResult {
    pub assignments: FxHashMap<Reg, Reg>,
    pub spills: FxHashMap<Reg, StackSlot>,
}

/// Spill-weight bookkeeping local to one `assign_or_spill` decision: the weight attributed to each
/// physical register by intervals currently occupying it or an overlapping inactive/fixed interval.
fn spill_weights(
    reginfo: &impl TargetRegisterInfo,
    active: &[LiveInterval],
    inactive: &[LiveInterval],
    fixed_overlapping: impl Iterator<Item = (Reg, f32)>,
    v2p: &FxHashMap<Reg, Reg>,
) -> FxHashMap<Reg, f32> {
    let mut weights: FxHashMap<Reg, f32> = FxHashMap::default();
    for iv in active {
        let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
        for alias in reginfo.alias_set(reg) {
            *weights.entry(alias).or_insert(0.0) += iv.weight;
        }
    }
    for iv in inactive {
        let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
        for alias in reginfo.alias_set(reg) {
            *weights.entry(alias).or_insert(0.0) += iv.weight;
        }
    }
    for (reg, weight) in fixed_overlapping {
        for alias in reginfo.alias_set(reg) {
            *weights.entry(alias).or_insert(0.0) += weight;
        }
    }
    weights
}

/// Inserts `iv` into `list` keeping it sorted by start, the invariant `unhandled`/`fixed` must
/// hold for the earliest-start pick at the top of the loop to be correct.
fn insert_sorted(list: &mut Vec<LiveInterval>, iv: LiveInterval) {
    let pos = list.partition_point(|x| x.start() <= iv.start());
    list.insert(pos, iv);
}

/// Breaks a self-spilled interval into one sub-interval per already-merged live range, so a
/// use/def segment far from the others can still win a register on a later pick even though the
/// interval as a whole lost out. An interval with only one range has nothing to tighten.
fn update_spilled_interval(cur: &LiveInterval) -> Vec<LiveInterval> {
    let ranges = cur.ranges();
    if ranges.len() <= 1 {
        return Vec::new();
    }
    ranges
        .iter()
        .map(|&range| {
            let mut iv = LiveInterval::new(cur.reg);
            iv.add_range(range);
            iv.weight = cur.weight;
            iv
        })
        .collect()
}

/// Records `reg`'s final decision as a physical-register assignment, clearing any earlier spill
/// decision for it so [AllocationResult]'s never-both invariant holds even when `reg` went through
/// more than one decision across re-queued sub-intervals.
fn set_physical(v2p: &mut FxHashMap<Reg, Reg>, v2ss: &mut FxHashMap<Reg, StackSlot>, reg: Reg, preg: Reg) {
    v2ss.remove(&reg);
    v2p.insert(reg, preg);
}

/// The spill counterpart of [set_physical].
fn set_spilled(v2p: &mut FxHashMap<Reg, Reg>, v2ss: &mut FxHashMap<Reg, StackSlot>, reg: Reg, slot: StackSlot) {
    v2p.remove(&reg);
    v2ss.insert(reg, slot);
}

/// Runs the linear-scan algorithm over `intervals` (one per register referenced in the function,
/// built by [crate::live_interval::build_intervals]). `reg_class_of` maps each virtual register to
/// the [weld_machine::RegClass] whose allocation order it must be assigned from; `new_stack_slot`
/// requests a fresh spill slot sized for that class from the embedding machine function.
pub fn allocate(
    reginfo: &impl TargetRegisterInfo,
    mut intervals: Vec<LiveInterval>,
    reg_class_of: impl Fn(Reg) -> Option<weld_machine::RegClass>,
    mut new_stack_slot: impl FnMut(Reg) -> StackSlot,
) -> Result<AllocationResult, RegallocError> {
    intervals.sort_by(|a, b| a.start().cmp(&b.start()));

    let mut unhandled: Vec<LiveInterval> = Vec::new();
    let mut fixed: Vec<LiveInterval> = Vec::new();
    for iv in intervals {
        if reginfo.is_physical(iv.reg) {
            fixed.push(iv);
        } else {
            unhandled.push(iv);
        }
    }

    let mut active: Vec<LiveInterval> = Vec::new();
    let mut inactive: Vec<LiveInterval> = Vec::new();
    let mut handled: Vec<LiveInterval> = Vec::new();
    let mut prt = PhysRegTracker::new(reginfo.num_regs());
    let mut v2p: FxHashMap<Reg, Reg> = FxHashMap::default();
    let mut v2ss: FxHashMap<Reg, StackSlot> = FxHashMap::default();

    while !unhandled.is_empty() || !fixed.is_empty() {
        let cur = match (unhandled.first(), fixed.first()) {
            (Some(u), Some(f)) if u.start() <= f.start() => unhandled.remove(0),
            (Some(_), Some(_)) => fixed.remove(0),
            (Some(_), None) => unhandled.remove(0),
            (None, Some(_)) => fixed.remove(0),
            (None, None) => unreachable!(),
        };

        // processActive: expire into `handled`, or drop into `inactive` on a lifetime hole.
        let mut newly_handled: Vec<LiveInterval> = Vec::new();
        active.retain(|iv| {
            if iv.expired_at(cur.start()) {
                let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
                prt.del_use(reginfo, reg);
                newly_handled.push(iv.clone());
                false
            } else {
                true
            }
        });
        let (still_live, gone_inactive): (Vec<_>, Vec<_>) = active.drain(..).partition(|iv| iv.live_at(cur.start()));
        active = still_live;
        for iv in &gone_inactive {
            let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
            prt.del_use(reginfo, reg);
        }
        inactive.extend(gone_inactive);
        handled.extend(newly_handled);

        // processInactive: the inverse — re-activate if live again, expire into `handled` if not.
        let mut newly_handled_inactive: Vec<LiveInterval> = Vec::new();
        inactive.retain(|iv| {
            if iv.expired_at(cur.start()) {
                newly_handled_inactive.push(iv.clone());
                false
            } else {
                true
            }
        });
        let (reactivated, still_inactive): (Vec<_>, Vec<_>) = inactive.drain(..).partition(|iv| iv.live_at(cur.start()));
        inactive = still_inactive;
        for iv in &reactivated {
            let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
            prt.add_use(reginfo, reg);
        }
        active.extend(reactivated);
        handled.extend(newly_handled_inactive);

        if reginfo.is_physical(cur.reg) {
            prt.add_use(reginfo, cur.reg);
            active.push(cur.clone());
            handled.push(cur);
            continue;
        }

        let class = reg_class_of(cur.reg).ok_or(RegallocError::NoRegisterClass)?;
        let order = reginfo.allocation_order(class);

        let mut free_reg = None;
        for &candidate in order {
            let blocked_by_inactive = inactive.iter().any(|iv| {
                cur.overlaps(iv) && reginfo.are_aliases(candidate, v2p.get(&iv.reg).copied().unwrap_or(iv.reg))
            });
            let blocked_by_fixed =
                fixed.iter().any(|iv| cur.overlaps(iv) && reginfo.are_aliases(candidate, iv.reg));
            if prt.is_avail(candidate) && !blocked_by_inactive && !blocked_by_fixed {
                free_reg = Some(candidate);
                break;
            }
        }

        if let Some(reg) = free_reg {
            set_physical(&mut v2p, &mut v2ss, cur.reg, reg);
            prt.add_use(reginfo, reg);
            active.push(cur);
            continue;
        }

        let fixed_overlapping = fixed
            .iter()
            .filter(|iv| cur.overlaps(iv))
            .map(|iv| (iv.reg, f32::INFINITY));
        let weights = spill_weights(reginfo, &active, &inactive, fixed_overlapping, &v2p);

        let mut min_weight = f32::INFINITY;
        let mut min_reg = None;
        for &candidate in order {
            let w = weights.get(&candidate).copied().unwrap_or(0.0);
            if w < min_weight {
                min_weight = w;
                min_reg = Some(candidate);
            }
        }

        if cur.weight < min_weight {
            // Spill cur itself; re-queue its tightened per-range pieces for another attempt.
            let slot = new_stack_slot(cur.reg);
            let reg = cur.reg;
            for sub in update_spilled_interval(&cur) {
                insert_sorted(&mut unhandled, sub);
            }
            set_spilled(&mut v2p, &mut v2ss, reg, slot);
            continue;
        }

        let Some(min_reg) = min_reg else {
            return Err(RegallocError::AllocationExhausted(cur.reg.index()));
        };

        let mut spilled_any = false;
        let mut earliest_start = u32::MAX;
        active.retain(|iv| {
            let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
            if reginfo.are_aliases(reg, min_reg) && cur.overlaps(iv) {
                prt.del_use(reginfo, reg);
                let slot = new_stack_slot(iv.reg);
                set_spilled(&mut v2p, &mut v2ss, iv.reg, slot);
                spilled_any = true;
                earliest_start = earliest_start.min(iv.start());
                false
            } else {
                true
            }
        });
        inactive.retain(|iv| {
            let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
            if reginfo.are_aliases(reg, min_reg) && cur.overlaps(iv) {
                let slot = new_stack_slot(iv.reg);
                set_spilled(&mut v2p, &mut v2ss, iv.reg, slot);
                spilled_any = true;
                earliest_start = earliest_start.min(iv.start());
                false
            } else {
                true
            }
        });

        if !spilled_any && !prt.is_avail(min_reg) {
            return Err(RegallocError::AllocationExhausted(cur.reg.index()));
        }

        if spilled_any {
            // Roll back every handled, non-fixed interval that started at or after the earliest
            // evicted start: it may have been spilled only because min_reg's neighbor was
            // occupying a register at the time, and that register is free again now.
            let mut still_handled = Vec::with_capacity(handled.len());
            for iv in handled.drain(..) {
                if !reginfo.is_physical(iv.reg) && iv.start() >= earliest_start {
                    v2p.remove(&iv.reg);
                    v2ss.remove(&iv.reg);
                    insert_sorted(&mut unhandled, iv);
                } else {
                    still_handled.push(iv);
                }
            }
            handled = still_handled;

            // Re-scan what remains of handled: anything still live at cur.start shouldn't have
            // been treated as finished (a hole that closed back up), so reactivate it.
            let mut still_handled = Vec::with_capacity(handled.len());
            for iv in handled.drain(..) {
                if iv.live_at(cur.start()) {
                    let reg = v2p.get(&iv.reg).copied().unwrap_or(iv.reg);
                    prt.add_use(reginfo, reg);
                    active.push(iv);
                } else {
                    still_handled.push(iv);
                }
            }
            handled = still_handled;
        }

        set_physical(&mut v2p, &mut v2ss, cur.reg, min_reg);
        prt.add_use(reginfo, min_reg);
        active.push(cur);
    }

    Ok(AllocationResult { assignments: v2p, spills: v2ss })
}

#[cfg(test)]
mod tests {
    use weld_machine::TestTarget;

    use super::*;
    use crate::live_interval::LiveRange;

    fn interval(reg: Reg, start: u32, end: u32, weight: f32) -> LiveInterval {
        let mut iv = LiveInterval::new(reg);
        iv.add_range(LiveRange { start, end });
        iv.weight = weight;
        iv
    }

    fn single_reg_class() -> (TestTarget, weld_machine::RegClass) {
        let mut types = weld_ir::types::TypeInterner::new();
        let i32ty = types.i32();
        let class = weld_machine::RegClass::from_index(0);
        let t = TestTarget::new(1).with_class(i32ty, class, vec![Reg::from_index(0)]);
        (t, class)
    }

    #[test]
    fn two_non_overlapping_intervals_can_share_one_register() {
        let (t, class) = single_reg_class();
        let a = Reg::from_index(10);
        let b = Reg::from_index(11);
        let result = allocate(
            &t,
            vec![interval(a, 0, 4, 1.0), interval(b, 4, 8, 1.0)],
            |_| Some(class),
            |_| unreachable!("no spill expected"),
        )
        .unwrap();
        assert_eq!(result.assignments[&a], Reg::from_index(0));
        assert_eq!(result.assignments[&b], Reg::from_index(0));
    }

    #[test]
    fn overlapping_intervals_exceeding_capacity_spill_the_lighter_one() {
        let (t, class) = single_reg_class();
        let a = Reg::from_index(10);
        let b = Reg::from_index(11);
        let mut next_slot = 0u32;
        let result = allocate(
            &t,
            vec![interval(a, 0, 8, 5.0), interval(b, 2, 6, 1.0)],
            |_| Some(class),
            |_| {
                let s = weld_machine::StackSlot::from_index(next_slot);
                next_slot += 1;
                s
            },
        )
        .unwrap();
        assert!(result.assignments.contains_key(&a) || result.spills.contains_key(&a));
        assert!(result.spills.contains_key(&b) || result.assignments.contains_key(&b));
        assert!(!(result.assignments.contains_key(&a) && result.assignments.contains_key(&b)));
    }
}
