//! Analyses over the block graph and SSA values.
//!
//! # Architecture
//!
//! - [`DominatorTree`] - immediate dominators, dominance frontiers and
//!   incremental maintenance after edge changes
//! - [`ssa`] - SSA construction: phi placement, renaming and phi cleanup
//! - [`DefUses`] - def-use chains kept current by every SSA rewrite
//! - [`types`] - forward and reverse type inference, conversion insertion
//! - [`has_side_effects`] - decides whether a dead value's computation can go
//! - [`LoopDetection`] - natural loops and their nesting
//! - [`LifeTimeIntervals`] - live ranges over the scheduled statement order
//!
//! # Usage
//!
//! ```rust
//! use ssajit::analysis::{DefUses, DominatorTree};
//! use ssajit::ir::{Expr, FunctionBuilder};
//!
//! let mut b = FunctionBuilder::new("f");
//! let x = b.formal("x");
//! let (then, join) = (b.block(), b.block());
//! b.cjump(x, then, join);
//! b.switch_to(then);
//! b.jump(join);
//! b.switch_to(join);
//! b.ret(Expr::int(0));
//! let function = b.finish()?;
//!
//! let dominators = DominatorTree::new(&function);
//! assert!(dominators.dominates(function.entry(), join));
//! assert!(!dominators.dominates(then, join));
//! # let _ = DefUses::build(&function);
//! # Ok::<(), ssajit::Error>(())
//! ```

mod defuse;
mod dominators;
mod lifetime;
mod loops;
mod sideeffects;
pub mod ssa;
pub mod types;

pub use defuse::{DefUse, DefUses};
pub use dominators::DominatorTree;
pub use lifetime::{LifeRanges, LifeTimeInterval, LifeTimeIntervals, Range};
pub use loops::{LoopDetection, LoopInfo};
pub use sideeffects::has_side_effects;
pub use ssa::{cleanup_phis, convert_to_ssa, verify_ssa};
