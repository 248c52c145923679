use std::{
    any::{Any, TypeId},
    cell::RefCell,
    rc::Rc,
};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::function::Function;

/// A cached, on-demand computation over a [Function].
///
/// Analyses are constructed lazily the first time a pass requests them (via
/// [AnalysisManager::get_analysis]) and are cached until invalidated. An analysis is invalidated
/// whenever a pass runs that does not declare it in its `preserves` set, unless the pass also
/// declares `preserves_cfg` and the analysis only depends on CFG shape.
pub trait Analysis: 'static {
    fn analyze(func: &Function) -> Self;
}

/// The set of analyses a just-completed pass claims are still valid.
///
/// A flat, function-at-a-time equivalent of the nested-operation preserved-analyses bookkeeping
/// a multi-level pass manager would need; this one has only one level to track.
#[derive(Default)]
pub struct PreservedAnalyses {
    preserved: SmallVec<[TypeId; 8]>,
    all: bool,
}

impl PreservedAnalyses {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self { preserved: SmallVec::new(), all: true }
    }

    pub fn preserve<A: Analysis>(&mut self) {
        let id = TypeId::of::<A>();
        if !self.preserved.contains(&id) {
            self.preserved.push(id);
        }
    }

    pub fn is_preserved<A: Analysis>(&self) -> bool {
        self.all || self.preserved.contains(&TypeId::of::<A>())
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub(crate) fn preserved_ids(&self) -> &[TypeId] {
        &self.preserved
    }
}

/// Caches analysis results for a single [Function] across a run of the pass manager.
///
/// Cheaply cloned; cache storage is shared via `Rc`.
#[derive(Clone)]
pub struct AnalysisManager {
    cache: Rc<RefCell<FxHashMap<TypeId, Rc<dyn Any>>>>,
}

impl AnalysisManager {
    pub fn new() -> Self {
        Self { cache: Rc::new(RefCell::new(FxHashMap::default())) }
    }

    /// Returns the cached result of `A`, computing and caching it against `func` if absent.
    pub fn get_analysis<A: Analysis>(&self, func: &Function) -> Rc<A> {
        let id = TypeId::of::<A>();
        if let Some(cached) = self.cache.borrow().get(&id) {
            return cached.clone().downcast::<A>().expect("analysis type id collision");
        }
        let computed = Rc::new(A::analyze(func));
        self.cache.borrow_mut().insert(id, computed.clone());
        computed
    }

    /// Drops every cached analysis not named in `preserved`.
    pub fn invalidate(&self, preserved_ids: &[TypeId], all: bool) {
        if all {
            return;
        }
        self.cache.borrow_mut().retain(|id, _| preserved_ids.contains(id));
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

impl Default for AnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}
