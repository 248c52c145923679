use log::{debug, trace};

use super::{
    analysis::{AnalysisManager, PreservedAnalyses},
    config::PipelineConfig,
    statistics::PassStatistics,
};
use crate::{error::CoreError, function::Function, types::TypeInterner};

/// Whether a pass actually changed the function it ran on.
///
/// Distinguishing `Unchanged` from `Changed` lets the pass manager skip re-running
/// fixpoint-driven pipelines once a round reports no further changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassResult {
    Unchanged,
    Changed,
}

impl PassResult {
    pub fn did_change(self) -> bool {
        matches!(self, PassResult::Changed)
    }

    pub fn or(self, other: PassResult) -> PassResult {
        if self.did_change() || other.did_change() {
            PassResult::Changed
        } else {
            PassResult::Unchanged
        }
    }
}

/// Per-run state handed to a [FunctionPass]: its analysis cache and the set of analyses it
/// ends up declaring preserved.
pub struct PassExecutionState<'a> {
    analyses: AnalysisManager,
    preserved: PreservedAnalyses,
    statistics: &'a mut PassStatistics,
}

impl<'a> PassExecutionState<'a> {
    /// Constructs execution state directly, bypassing [FunctionPassManager]. Exposed publicly so
    /// individual passes can be exercised in isolation (their own crate's tests run a single pass
    /// without registering a whole pipeline).
    pub fn new(analyses: AnalysisManager, statistics: &'a mut PassStatistics) -> Self {
        Self { analyses, preserved: PreservedAnalyses::none(), statistics }
    }

    pub fn analysis_manager(&self) -> &AnalysisManager {
        &self.analyses
    }

    pub fn preserved_analyses_mut(&mut self) -> &mut PreservedAnalyses {
        &mut self.preserved
    }

    pub fn statistics_mut(&mut self) -> &mut PassStatistics {
        self.statistics
    }
}

/// A transformation or validation pass over a single [Function].
///
/// Implementations declare, via [FunctionPass::preserves_cfg], whether they are guaranteed not
/// to add, remove, or retarget any basic block or edge; the pass manager uses this to decide
/// whether CFG-derived analyses (dominance, loops) must be invalidated.
pub trait FunctionPass {
    /// The display name of this pass, used in pass-manager trace logging.
    fn name(&self) -> &'static str;

    /// Runs this pass on `func`. `types` is the owning module's type interner, needed by passes
    /// that must know an integer's bit width or a pointer's pointee type (e.g. constant folding's
    /// wraparound arithmetic). Implementations call
    /// [PassExecutionState::preserved_analyses_mut] to declare which analyses remain valid,
    /// and return whether they modified the function.
    fn run(
        &mut self,
        func: &mut Function,
        types: &TypeInterner,
        state: &mut PassExecutionState<'_>,
    ) -> Result<PassResult, CoreError>;

    /// True if this pass never changes block count, predecessor/successor structure, or
    /// terminators. Passes that only rewrite instruction operands in place (e.g. constant
    /// propagation) return `true`; CFG simplification and mem2reg return `false`.
    fn preserves_cfg(&self) -> bool {
        false
    }
}

/// Runs an ordered sequence of [FunctionPass]es over a [Function], invalidating analyses between
/// passes according to each pass's declared preservation set.
///
/// Since this crate's IR has no recursive operation/region structure, there is nothing to nest
/// pass managers over: a nested inner/outer pass-manager pair collapses into this one flat loop.
pub struct FunctionPassManager {
    passes: Vec<Box<dyn FunctionPass>>,
    config: PipelineConfig,
    statistics: PassStatistics,
}

impl FunctionPassManager {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let statistics = PassStatistics::new(config.collect_statistics);
        Self { passes: Vec::new(), config, statistics }
    }

    pub fn add_pass(&mut self, pass: Box<dyn FunctionPass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn statistics(&self) -> &PassStatistics {
        &self.statistics
    }

    /// Runs every registered pass once, in registration order, over `func`.
    pub fn run(&mut self, func: &mut Function, types: &TypeInterner) -> Result<PassResult, CoreError> {
        let analyses = AnalysisManager::new();
        let mut overall = PassResult::Unchanged;
        for pass in &mut self.passes {
            trace!("running pass `{}`", pass.name());
            let mut state = PassExecutionState::new(analyses.clone(), &mut self.statistics);
            let result = pass.run(func, types, &mut state)?;
            analyses.invalidate(state.preserved.preserved_ids(), state.preserved.is_all());
            if result.did_change() {
                debug!("pass `{}` modified the function", pass.name());
            }
            overall = overall.or(result);
        }
        Ok(overall)
    }

    /// Runs every registered pass repeatedly until a full round makes no changes, or the
    /// configured `max_fixpoint_iterations` is reached. Used for fixpoint pipelines such as a
    /// combined constant-propagation/DCE/simplify-cfg loop.
    pub fn run_to_fixpoint(
        &mut self,
        func: &mut Function,
        types: &TypeInterner,
    ) -> Result<PassResult, CoreError> {
        let mut overall = PassResult::Unchanged;
        for _ in 0..self.config.max_fixpoint_iterations {
            let round = self.run(func, types)?;
            overall = overall.or(round);
            if round == PassResult::Unchanged {
                break;
            }
        }
        Ok(overall)
    }
}

impl Default for FunctionPassManager {
    fn default() -> Self {
        Self::new()
    }
}
