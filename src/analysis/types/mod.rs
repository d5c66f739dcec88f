//! Type discovery over SSA values.
//!
//! Three passes run back to back once the function is in SSA form:
//!
//! 1. [`TypeInference`] - forward fixed point. Every temp starts unknown;
//!    statements are typed from their operands and re-queued whenever an
//!    operand temp's type changes. Phis union their incoming types and
//!    collapse mixes to `double` (all numeric) or `var`.
//! 2. [`ReverseInference`] - finds values that are only ever consumed by
//!    integer operations and retypes their producing chain as `int32`.
//! 3. [`TypePropagation`] - inserts explicit conversions wherever a consumer
//!    needs a different representation than its producer yields, converting
//!    constants in place instead of materialising conversions where it can.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut worklist = StatementWorklist::new(&function);
//! TypeInference::new(&mut def_uses, &mut worklist).run(&mut function);
//! ReverseInference::new(&mut def_uses).run(&mut function);
//! TypePropagation::new(&mut def_uses, &mut worklist).run(&mut function);
//! ```

mod inference;
mod propagation;
mod reverse;

pub use inference::{propagate_temp_type, TypeInference};
pub use propagation::{convert_const, TypePropagation};
pub use reverse::ReverseInference;
