use thiserror::Error;

/// Failure modes of live-interval construction and linear-scan allocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegallocError {
    /// A virtual register has a use with no preceding def reachable on any path, so no interval
    /// could be built for it. Should not happen for machine IR produced by a correct instruction
    /// selector; surfaced rather than silently ignored.
    #[error("register {0} is used without ever being defined")]
    UseWithoutDef(u32),

    /// The allocator spilled and rolled back past the point of making further progress: every
    /// physical register in the interval's class is permanently pinned by a fixed interval that
    /// overlaps it.
    #[error("no register or spill slot available for interval on register {0}")]
    AllocationExhausted(u32),

    /// The target did not provide a register class capable of holding the interval's value.
    #[error("no register class available for this interval")]
    NoRegisterClass,
}
