//! Back end: storage assignment, phi elimination and bytecode.
//!
//! A scheduled function leaves the optimizer with virtual registers and,
//! in SSA form, phis. The back end gives every virtual register a home and
//! emits a compact register-machine bytecode:
//!
//! ```text
//! SSA function ──┬─ RegisterAllocator ── convert_out_of_ssa ─┐
//!                ├─ AllocateStackSlots (phis resolved inline) ├─ Assembler ── CompiledFunction
//! non-SSA ───────┴─ convert_temps ────────────────────────────┘
//! ```
//!
//! Parallel copies from phis are sequenced by [`MoveMapping`], which breaks
//! cycles with swaps. Operations that need the engine (name and property
//! access, calls, generic operators on boxed values) are [`RuntimeCall`]s
//! dispatched through the [`Runtime`] trait; [`PrimitiveRuntime`] is a
//! self-contained implementation covering primitives, plain objects and
//! native functions.

mod assembler;
mod bytecode;
mod executor;
mod moves;
mod outofssa;
mod regalloc;
mod runtime;
mod stackslots;

pub(crate) use assembler::Assembler;
pub use assembler::{can_compile, CompiledFunction, FrameLayout, MAX_CALL_ARGS};
pub use bytecode::{Instruction, Opcode, Operand, OPERAND_SIZE};
pub use moves::{overlapping_storage, MoveMapping};
pub use outofssa::convert_out_of_ssa;
pub use regalloc::{Location, RegisterAllocator, RegisterClass, RegisterUsage};
pub use runtime::{
    eval_binop, eval_unop, Completion, NativeFunction, PrimitiveRuntime, Runtime, RuntimeCall, Value,
};
pub use stackslots::AllocateStackSlots;
