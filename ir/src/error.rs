use crate::{Block, Inst, Value};

/// The error kinds produced by the IR model and pass infrastructure.
///
/// Every variant here is fatal: once raised, the pass pipeline unwinds to the module boundary and
/// the module in question is considered unusable.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A mutation would violate one of the IR's well-formedness invariants.
    #[error("IR invariant violated: {0}")]
    IrInvariant(#[from] IrInvariant),

    /// A pass declared a `requires` dependency that the pipeline cannot satisfy, either because
    /// no producer is registered for it, or because resolving it would require a cycle.
    #[error("analysis `{analysis}` is unavailable: {reason}")]
    AnalysisUnavailable {
        analysis: &'static str,
        reason: &'static str,
    },

    /// The machine IR asked the target for a capability it does not implement.
    #[error("target does not support: {0}")]
    TargetCapability(&'static str),

    /// The register allocator ran out of physical registers in a way that should not be possible
    /// by construction (spilling is supposed to always make progress).
    #[error("register allocation exhausted: {0}")]
    RegisterAllocationExhausted(&'static str),

    /// Any other internal inconsistency detected by a pass.
    #[error("pass failed: {0}")]
    PassFatal(&'static str),
}

/// Specific violations of the IR's well-formedness invariants.
#[derive(Debug, thiserror::Error)]
pub enum IrInvariant {
    #[error("attempted to create a use of destroyed value {0}")]
    UseOfDestroyedValue(Value),

    #[error("attempted to insert an instruction after the terminator of {0}")]
    InsertAfterTerminator(Block),

    #[error(
        "phi node in {block} has {actual} incoming operand(s), but {block} has {expected} \
         predecessor(s)"
    )]
    PhiArityMismatch {
        block: Block,
        expected: usize,
        actual: usize,
    },

    #[error("attempted to destroy value {0}, which still has live uses")]
    DestroyedValueStillUsed(Value),

    #[error("block {0} does not end in a terminator instruction")]
    MissingTerminator(Block),

    #[error("non-terminator instruction {inst} follows the terminator of block {block}")]
    InstructionAfterTerminator { block: Block, inst: Inst },
}

pub type Result<T, E = CoreError> = core::result::Result<T, E>;
