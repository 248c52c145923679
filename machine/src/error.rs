use thiserror::Error;

/// Fatal conditions raised while building or manipulating machine IR and target queries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("register {0} has no register class on this target")]
    NoRegisterClass(u32),

    #[error("type has no machine representation on this target")]
    UnrepresentableType,

    #[error("operand slot {0} out of range for this instruction")]
    OperandOutOfRange(u32),

    #[error("block {0} has no terminator")]
    MissingTerminator(u32),
}
