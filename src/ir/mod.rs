//! Intermediate representation.
//!
//! A [`Function`] is a control-flow graph of [`BasicBlock`]s holding
//! [`Stmt`]s over [`Expr`] trees. The front end hands over the graph in
//! non-SSA form, with variables addressed through [`ArgLocal`] slots; the
//! optimizer rewrites the same structures in place into SSA form over
//! [`Temp`]s, and the allocators finally turn temps into registers and stack
//! slots.
//!
//! # Key Components
//!
//! - [`Function`] / [`BasicBlock`] - block and statement arenas with edge lists
//! - [`Stmt`] / [`StmtKind`] - phis, moves, expression statements and terminators
//! - [`Expr`] - the closed expression set
//! - [`Type`] - the value-representation lattice
//! - [`FunctionBuilder`] - assembles input CFGs

mod builder;
mod display;
mod expr;
mod function;
mod ids;
mod stmt;
mod types;

pub use builder::FunctionBuilder;
pub use expr::{AluOp, ArgLocal, ArgLocalKind, Builtin, Const, Expr, Name, Temp, TempKind};
pub use function::{BasicBlock, Function};
pub use ids::{BlockId, StmtId};
pub use stmt::{CJump, Move, Phi, Stmt, StmtKind};
pub use types::Type;
