/// A marker type for abstracting over the direction an analysis walks the CFG: forward (entry
/// toward the exits) or backward (exits toward the entry, i.e. the reverse CFG).
///
/// Sealed to the two concrete directions below.
pub trait Direction: sealed::Direction {}

impl<D: sealed::Direction> Direction for D {}

mod sealed {
    pub trait Direction: Default + Copy + 'static {
        const IS_FORWARD: bool;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct Forward;
    impl Direction for Forward {
        const IS_FORWARD: bool = true;
    }

    #[derive(Debug, Copy, Clone, Default)]
    pub struct Backward;
    impl Direction for Backward {
        const IS_FORWARD: bool = false;
    }
}

pub use self::sealed::{Backward, Forward};

pub(crate) fn is_forward<D: sealed::Direction>() -> bool {
    D::IS_FORWARD
}
