//! Convenience builder for assembling input CFGs.
//!
//! Front ends (and tests) describe a function block by block. The builder
//! keeps the edge lists in sync with the terminators it appends and runs
//! [`Function::verify_cfg`] on [`FunctionBuilder::finish`].
//!
//! ```rust
//! use ssajit::ir::{AluOp, Expr, FunctionBuilder};
//!
//! // function f(x) { return x + 1; }
//! let mut b = FunctionBuilder::new("f");
//! let x = b.formal("x");
//! let entry = b.entry();
//! b.switch_to(entry);
//! b.ret(Expr::binop(AluOp::Add, x, Expr::int(1)));
//! let function = b.finish()?;
//! assert_eq!(function.block_count(), 1);
//! # Ok::<(), ssajit::Error>(())
//! ```

use crate::{
    ir::{BlockId, CJump, Expr, Function, Move, StmtId, StmtKind, Temp},
    Result,
};

/// Incrementally builds a [`Function`].
#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// Starts a function with an empty entry block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut function = Function::new(name);
        let entry = function.new_block(None);
        Self {
            function,
            current: entry,
        }
    }

    /// Declares a formal parameter and returns the expression addressing it.
    pub fn formal(&mut self, name: impl Into<String>) -> Expr {
        self.function.formals.push(name.into());
        Expr::formal((self.function.formals.len() - 1) as u32)
    }

    /// Declares a local variable and returns the expression addressing it.
    pub fn local(&mut self, name: impl Into<String>) -> Expr {
        self.function.locals.push(name.into());
        Expr::local((self.function.locals.len() - 1) as u32)
    }

    /// Marks the function as reading its arguments object.
    pub fn uses_arguments_object(&mut self) -> &mut Self {
        self.function.uses_arguments_object = true;
        self
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.function.entry()
    }

    /// Appends a new block.
    pub fn block(&mut self) -> BlockId {
        self.function.new_block(None)
    }

    /// Appends a new block whose exceptions go to `handler`.
    pub fn protected_block(&mut self, handler: BlockId) -> BlockId {
        self.function.has_try = true;
        self.function.new_block(Some(handler))
    }

    /// Appends a new exception handler entry block.
    pub fn handler(&mut self) -> BlockId {
        self.function.has_try = true;
        let block = self.function.new_block(None);
        self.function.block_mut(block).is_exception_handler = true;
        block
    }

    /// Selects the block subsequent statements go to.
    pub fn switch_to(&mut self, block: BlockId) -> &mut Self {
        self.current = block;
        self
    }

    /// Allocates a fresh virtual register.
    pub fn temp(&mut self) -> Temp {
        self.function.new_temp()
    }

    /// Appends `target = source`.
    pub fn mov(&mut self, target: impl Into<Expr>, source: impl Into<Expr>) -> StmtId {
        self.function.append(
            self.current,
            StmtKind::Move(Move {
                target: target.into(),
                source: source.into(),
                swap: false,
            }),
        )
    }

    /// Appends an expression evaluated for its effect.
    pub fn exp(&mut self, expr: Expr) -> StmtId {
        self.function.append(self.current, StmtKind::Exp(expr))
    }

    /// Terminates the current block with a jump.
    pub fn jump(&mut self, target: BlockId) -> StmtId {
        let id = self.function.append(self.current, StmtKind::Jump(target));
        self.function.add_edge(self.current, target);
        id
    }

    /// Terminates the current block with a two-way branch.
    pub fn cjump(&mut self, cond: Expr, iftrue: BlockId, iffalse: BlockId) -> StmtId {
        let id = self.function.append(
            self.current,
            StmtKind::CJump(CJump {
                cond,
                iftrue,
                iffalse,
            }),
        );
        self.function.add_edge(self.current, iftrue);
        self.function.add_edge(self.current, iffalse);
        id
    }

    /// Terminates the current block with a return.
    pub fn ret(&mut self, value: Expr) -> StmtId {
        self.function.append(self.current, StmtKind::Ret(value))
    }

    /// Verifies and returns the function.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a block is protected by a block
    /// that is not an exception handler, and [`crate::Error::InvalidIr`] if a
    /// block lacks a terminator or the edges are inconsistent.
    pub fn finish(self) -> Result<Function> {
        for block in self.function.blocks() {
            if let Some(handler) = block.catch_block {
                if !self.function.block(handler).is_exception_handler {
                    return Err(malformed_error!(
                        "{}: {} is protected by {handler}, which is not a handler",
                        self.function.name,
                        block.id
                    ));
                }
            }
        }
        self.function.verify_cfg()?;
        Ok(self.function)
    }
}
