#![cfg(test)]

use weld_ir::{
    function::Function,
    pass::{AnalysisManager, FunctionPass, PassExecutionState, PassResult, PassStatistics},
    types::TypeInterner,
    CoreError,
};

/// Runs a single pass in isolation, without a full [weld_ir::pass::FunctionPassManager] pipeline.
pub(crate) fn run_pass(
    pass: &mut dyn FunctionPass,
    func: &mut Function,
    types: &TypeInterner,
) -> Result<PassResult, CoreError> {
    let mut stats = PassStatistics::new(true);
    let mut state = PassExecutionState::new(AnalysisManager::new(), &mut stats);
    pass.run(func, types, &mut state)
}
