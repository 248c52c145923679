use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::{FxHashMap, FxHashSet};
use weld_ir::{pass::Analysis, Block, ControlFlowGraph, Function};

use crate::dominance::DominatorTree;

/// A natural loop: a back edge `tail -> header` where `header` dominates `tail`, plus the set of
/// blocks reachable from `tail` without passing through `header`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);
entity_impl!(LoopId, "loop");

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: Block,
    /// Every block in the loop body, including the header.
    pub body: FxHashSet<Block>,
    pub children: Vec<LoopId>,
    pub parent: Option<LoopId>,
    pub depth: u32,
}

impl Loop {
    pub fn contains(&self, block: Block) -> bool {
        self.body.contains(&block)
    }
}

/// The forest of natural loops in a function, nested by dominance.
pub struct LoopForest {
    loops: PrimaryMap<LoopId, Loop>,
    top_level: Vec<LoopId>,
    block_loop: FxHashMap<Block, LoopId>,
}

impl LoopForest {
    /// Finds every back edge `tail -> header` (`header` dominates `tail`), merges back edges that
    /// share a header into a single loop, builds each loop's body by flood-filling predecessors
    /// from the tail up to the header (Cooper, Harvey & Kennedy's algorithm), then nests loops by
    /// header dominance.
    pub fn compute(cfg: &impl ControlFlowGraph, dom: &DominatorTree) -> Self {
        let blocks = cfg.blocks();

        // Map from header to the union of all back-edge tails targeting it.
        let mut tails_by_header: FxHashMap<Block, Vec<Block>> = FxHashMap::default();
        for &b in &blocks {
            for succ in cfg.successors(b) {
                if dom.dominates(succ, b) {
                    tails_by_header.entry(succ).or_default().push(b);
                }
            }
        }

        let mut loops = PrimaryMap::new();
        let mut block_loop = FxHashMap::default();

        // Sort headers by dominator-set size so outer loops (smaller dom sets, closer to the
        // root) are constructed before inner ones; this is only needed for deterministic nesting,
        // not for correctness of the body flood-fill itself.
        let mut headers: Vec<Block> = tails_by_header.keys().copied().collect();
        headers.sort_by_key(|&h| dom.dom_set(h).len());

        for header in headers {
            let tails = &tails_by_header[&header];
            let mut body = FxHashSet::default();
            body.insert(header);
            let mut worklist: Vec<Block> = Vec::new();
            for &tail in tails {
                if body.insert(tail) {
                    worklist.push(tail);
                }
            }
            while let Some(b) = worklist.pop() {
                for &p in cfg.predecessors(b) {
                    if body.insert(p) {
                        worklist.push(p);
                    }
                }
            }

            let id = loops.push(Loop {
                header,
                body: body.clone(),
                children: Vec::new(),
                parent: None,
                depth: 0,
            });
            for &b in &body {
                // Headers are processed outer-to-inner (ascending dom-set size), so a block
                // shared by nested loops ends up mapped to the innermost one, processed last.
                block_loop.insert(b, id);
            }
        }

        let mut forest = Self { loops, top_level: Vec::new(), block_loop };
        forest.nest();
        forest
    }

    fn nest(&mut self) {
        let ids: Vec<LoopId> = self.loops.keys().collect();
        for &id in &ids {
            let header = self.loops[id].header;
            let mut parent = None;
            let mut parent_size = usize::MAX;
            for &other in &ids {
                if other == id {
                    continue;
                }
                if self.loops[other].body.contains(&header)
                    && self.loops[other].body.len() < parent_size
                    && self.loops[other].body.len() > self.loops[id].body.len()
                {
                    parent = Some(other);
                    parent_size = self.loops[other].body.len();
                }
            }
            self.loops[id].parent = parent;
            if let Some(p) = parent {
                self.loops[p].children.push(id);
            } else {
                self.top_level.push(id);
            }
        }

        for &id in &ids {
            let mut depth = 0;
            let mut cur = self.loops[id].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = self.loops[p].parent;
            }
            self.loops[id].depth = depth;
        }
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id]
    }

    pub fn top_level(&self) -> &[LoopId] {
        &self.top_level
    }

    pub fn all(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.loops.iter()
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_loop_of(&self, block: Block) -> Option<LoopId> {
        self.block_loop.get(&block).copied()
    }

    pub fn depth_of(&self, block: Block) -> u32 {
        self.innermost_loop_of(block).map_or(0, |id| self.loops[id].depth + 1)
    }
}

impl Analysis for LoopForest {
    fn analyze(func: &Function) -> Self {
        let dom = DominatorTree::compute(func);
        LoopForest::compute(func, &dom)
    }
}

#[cfg(test)]
mod tests {
    use weld_ir::{instruction::InstData, types::TypeInterner, value::Constant};

    use super::*;

    /// entry -> header -> body -> header (back edge) ; header -> exit.
    #[test]
    fn finds_single_natural_loop() {
        let mut types = TypeInterner::new();
        let i32ty = types.i32();
        let mut f = Function::new("f", i32ty);
        let entry = f.append_block();
        let header = f.append_block();
        let body = f.append_block();
        let exit = f.append_block();
        let cond = f.append_argument(types.i1());

        f.append_inst(entry, InstData::Br { dest: header }).unwrap();
        f.append_inst(header, InstData::CondBr { cond, then_blk: body, else_blk: exit }).unwrap();
        f.append_inst(body, InstData::Br { dest: header }).unwrap();
        let zero = f.make_const(i32ty, Constant::Int(0));
        f.append_inst(exit, InstData::Ret { value: Some(zero) }).unwrap();

        let dom = DominatorTree::compute(&f);
        let forest = LoopForest::compute(&f, &dom);

        assert_eq!(forest.all().count(), 1);
        let (id, lp) = forest.all().next().unwrap();
        assert_eq!(lp.header, header);
        assert!(lp.contains(header));
        assert!(lp.contains(body));
        assert!(!lp.contains(entry));
        assert!(!lp.contains(exit));
        assert_eq!(forest.innermost_loop_of(body), Some(id));
        assert_eq!(forest.innermost_loop_of(entry), None);
        assert_eq!(lp.depth, 0);
    }
}
