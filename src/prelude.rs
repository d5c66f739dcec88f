//! # ssajit Prelude
//!
//! The types needed to build a function, compile it and run the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ssajit operations
pub use crate::Error;

/// The result type used throughout ssajit
pub use crate::Result;

/// Pipeline configuration
pub use crate::Config;

// ================================================================================================
// Building Input
// ================================================================================================

/// Intermediate representation and its builder
pub use crate::ir::{AluOp, BlockId, Builtin, Expr, Function, FunctionBuilder, Temp, Type};

// ================================================================================================
// Compilation and Execution
// ================================================================================================

/// Compilation entry points
pub use crate::{compile_function, compile_module};

/// Compiled code and the runtime it calls into
pub use crate::codegen::{CompiledFunction, Completion, PrimitiveRuntime, Runtime, RuntimeCall, Value};
