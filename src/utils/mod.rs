//! Small shared building blocks.
//!
//! - [`BitSet`] - dense id sets with wrapping search, used by the worklist,
//!   the dominator tree and the allocators
//! - numeric conversions with the language's wraparound and `NaN` rules

mod bitset;
mod math;

pub use bitset::{BitSet, BitSetIter};
pub use math::{
    is_exact_int32, is_exact_uint32, is_negative_zero, number_to_bool, number_to_string, to_int32,
    to_uint32,
};
