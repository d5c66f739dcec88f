//! The middle end and the compilation driver.
//!
//! # Architecture
//!
//! - [`Optimizer`] - runs the analyses of [`crate::analysis`] and the passes
//!   below over one function, leaving it in scheduled SSA form when possible
//! - [`optimize_ssa`] - the worklist-driven SSA rewrite loop
//! - [`passes`] - CFG-level transformations: block merging and cleanup,
//!   critical-edge splitting, loop peeling, slot conversions
//! - [`BlockScheduler`] - code layout order
//! - [`calculate_optional_jumps`] - jumps the layout makes redundant
//! - [`compile_function`] / [`compile_module`] - the full pipeline down to
//!   [`CompiledFunction`](crate::codegen::CompiledFunction)

pub(crate) mod fold;
mod jumps;
mod optimizer;
pub mod passes;
mod pipeline;
mod scheduler;
mod worklist;

pub use jumps::calculate_optional_jumps;
pub use optimizer::optimize_ssa;
pub use pipeline::{compile_function, compile_module, Optimizer, MAX_SSA_STATEMENTS};
pub use scheduler::{schedule_blocks, BlockScheduler};
pub use worklist::StatementWorklist;
