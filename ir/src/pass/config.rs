/// Pipeline-wide knobs, constructed by the embedder (there is no driver CLI in scope).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on rounds for [super::FunctionPassManager::run_to_fixpoint] and on any pass's
    /// own internal convergence loop (e.g. CFG simplification).
    pub max_fixpoint_iterations: usize,
    /// Whether [super::PassStatistics] counters are collected at all.
    pub collect_statistics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_fixpoint_iterations: 32, collect_statistics: false }
    }
}
