// Copyright 2025 The ssajit developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # ssajit
//!
//! The optimizing middle end and code generator of a JIT for a dynamically
//! typed language. Functions arrive as control-flow graphs from a front end,
//! are converted to SSA form, typed, optimized, scheduled and register
//! allocated, and leave as compact register-machine bytecode that an
//! embedder runs through the [`Runtime`] trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use ssajit::prelude::*;
//!
//! // function f(x) { return x + x; }
//! let mut b = FunctionBuilder::new("f");
//! let x = b.formal("x");
//! b.switch_to(b.entry());
//! b.ret(Expr::binop(AluOp::Add, x.clone(), x));
//!
//! let compiled = compile_function(b.finish()?, &Config::default())?;
//! let result = compiled.call(&mut PrimitiveRuntime::new(), &[Value::Int(5)])?;
//! assert_eq!(result.value().map(Value::to_number), Some(10.0));
//! # Ok::<(), ssajit::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        Compilation Pipeline                        │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  ir          Function, blocks, statements, expressions, types      │
//! │    └─ FunctionBuilder           input CFGs from a front end        │
//! │                                                                    │
//! │  analysis    DominatorTree, SSA construction, DefUses,             │
//! │              type inference, loops, life-time intervals            │
//! │                                                                    │
//! │  compiler    Optimizer: SSA rewrite loop, block merging,           │
//! │              loop peeling, critical edges, block scheduling        │
//! │                                                                    │
//! │  codegen     linear scan or stack slots, phi elimination,          │
//! │              bytecode assembler, executor, runtime calls           │
//! │                                                                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`ir`] - the intermediate representation shared by every stage
//! - [`analysis`] - analyses over the block graph and SSA values
//! - [`compiler`] - the middle end and the compilation driver
//! - [`codegen`] - storage assignment, phi elimination and bytecode
//! - [`Config`] - pipeline switches and register file sizes
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Fallback
//!
//! Everything the back end cannot lower is rejected by
//! [`codegen::can_compile`] before the first pass runs, so an embedder can
//! keep interpreting such functions. Functions with exception handlers or
//! more than [`compiler::MAX_SSA_STATEMENTS`] statements still compile, but
//! without SSA optimization.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use ssajit::prelude::*;
///
/// let mut b = FunctionBuilder::new("f");
/// b.switch_to(b.entry());
/// b.ret(Expr::undefined());
/// let results = compile_module(vec![b.finish()?], &Config::disabled());
/// assert!(results[0].is_ok());
/// # Ok::<(), ssajit::Error>(())
/// ```
pub mod prelude;

/// Analyses over the block graph and SSA values.
pub mod analysis;

/// Storage assignment, phi elimination, bytecode and its executor.
pub mod codegen;

/// The optimizer pipeline and the per-function compilation driver.
pub mod compiler;

/// The intermediate representation.
///
/// # Examples
///
/// ```rust
/// use ssajit::ir::{AluOp, Expr, FunctionBuilder};
///
/// // L0: if (x < 1) goto L1 else goto L2; L1: return 1; L2: return x
/// let mut b = FunctionBuilder::new("f");
/// let x = b.formal("x");
/// let (l1, l2) = (b.block(), b.block());
/// b.switch_to(b.entry());
/// b.cjump(Expr::binop(AluOp::Lt, x.clone(), Expr::int(1)), l1, l2);
/// b.switch_to(l1);
/// b.ret(Expr::int(1));
/// b.switch_to(l2);
/// b.ret(x);
/// let f = b.finish()?;
/// assert_eq!(f.block_count(), 3);
/// # Ok::<(), ssajit::Error>(())
/// ```
pub mod ir;

/// Shared building blocks: bit sets and numeric conversions.
pub mod utils;

mod config;

/// Pipeline configuration.
///
/// # Example
///
/// ```rust
/// use ssajit::Config;
///
/// let config = Config::default().with_loop_peeling(false).with_registers(8, 4);
/// assert!(config.uses_register_allocation());
/// assert!(!Config::disabled().uses_register_allocation());
/// ```
pub use config::{Config, MAX_REGISTERS};

/// `ssajit` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ssajit` Error type
///
/// One variant per failure class; compilation errors are per function and
/// leave nothing behind that a fallback path would have to undo.
pub use error::Error;

/// Compilation entry points.
pub use compiler::{compile_function, compile_module};

/// Compiled code and the runtime interface it executes against.
pub use codegen::{CompiledFunction, Completion, PrimitiveRuntime, Runtime, Value};
