//! CFG-level transformations run around SSA construction.
//!
//! | pass | when |
//! |------|------|
//! | [`cleanup_basic_blocks`] | before SSA, and after optimisation to drop dead cycles |
//! | [`merge_basic_blocks`] | before SSA, and after optimisation |
//! | [`convert_arg_locals`] | before dominators are computed |
//! | [`peel_loops`] | after loop detection, before SSA |
//! | [`split_critical_edges`] | after optimisation, before scheduling |
//! | [`convert_temps`] | instead of everything above when SSA is disabled |

mod arglocals;
mod blocks;
mod edges;
mod peeling;
mod temps;

pub use arglocals::convert_arg_locals;
pub use blocks::{cleanup_basic_blocks, merge_basic_blocks};
pub use edges::{find_critical_edge, split_critical_edges};
pub use peeling::peel_loops;
pub use temps::convert_temps;
