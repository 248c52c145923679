//! Dominator, dominance-frontier, natural-loop, and live-variable analyses over `weld-ir`
//! functions, plus the single-exit unification utility post-dominance depends on.

pub mod dominance;
pub mod direction;
pub mod frontier;
pub mod liveness;
pub mod loops;

pub use self::{
    direction::{Backward, Direction, Forward},
    dominance::{unify_exits, Dominance, DominatorTree, PostDominatorTree},
    frontier::{DominanceFrontier, ForwardDominanceFrontier, PostDominanceFrontier},
    liveness::LivenessAnalysis,
    loops::{Loop, LoopForest, LoopId},
};
