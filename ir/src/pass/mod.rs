mod analysis;
mod config;
mod manager;
mod statistics;

pub use self::{
    analysis::{Analysis, AnalysisManager, PreservedAnalyses},
    config::PipelineConfig,
    manager::{FunctionPass, FunctionPassManager, PassExecutionState, PassResult},
    statistics::PassStatistics,
};
