//! The shared statement worklist.
//!
//! Type inference and the SSA optimizer both iterate to a fixed point over
//! statement ids. [`StatementWorklist`] holds the pending set as a bitmap and
//! hands statements out in id order, continuing after the one processed last
//! and wrapping around, so a rewrite that re-enqueues an earlier statement is
//! picked up on the next sweep instead of immediately.
//!
//! Removing a statement only marks it; [`StatementWorklist::apply_to_function`]
//! drops all marked statements from their blocks in one pass at the end.

use log::trace;

use crate::{
    ir::{Function, StmtId},
    utils::BitSet,
};

/// Pending and removed statements of one function.
#[derive(Debug, Clone)]
pub struct StatementWorklist {
    /// Statements placed in a live block.
    known: BitSet,
    worklist: BitSet,
    removed: BitSet,
    pending: usize,
}

impl StatementWorklist {
    /// Creates a worklist holding every statement of every live block.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        let count = function.statement_count();
        let mut known = BitSet::new(count);
        for block in function.blocks() {
            for &stmt in &block.statements {
                known.insert(stmt.index());
            }
        }
        let mut worklist = Self {
            known,
            worklist: BitSet::new(count),
            removed: BitSet::new(count),
            pending: 0,
        };
        worklist.reset();
        worklist
    }

    /// Puts every known, unremoved statement back on the list.
    pub fn reset(&mut self) {
        self.worklist = self.known.clone();
        self.pending = self.worklist.count();
    }

    fn grow(&mut self, stmt: StmtId) {
        let needed = stmt.index() + 1;
        self.known.grow(needed);
        self.worklist.grow(needed);
        self.removed.grow(needed);
    }

    /// Makes a statement allocated after construction known, and enqueues it.
    pub fn register_new_statement(&mut self, stmt: StmtId) {
        self.grow(stmt);
        self.known.insert(stmt.index());
        self.push(stmt);
    }

    /// Enqueues `stmt` unless it was removed.
    pub fn push(&mut self, stmt: StmtId) {
        if self.removed.contains(stmt.index()) || self.worklist.contains(stmt.index()) {
            return;
        }
        self.grow(stmt);
        self.worklist.insert(stmt.index());
        self.pending += 1;
    }

    /// Enqueues every statement in `stmts`.
    pub fn push_all(&mut self, stmts: impl IntoIterator<Item = StmtId>) {
        for stmt in stmts {
            self.push(stmt);
        }
    }

    /// Dequeues `stmt` without marking it removed.
    pub fn pop(&mut self, stmt: StmtId) {
        if self.worklist.contains(stmt.index()) {
            self.worklist.remove(stmt.index());
            self.pending -= 1;
        }
    }

    /// Marks `stmt` removed. It is never handed out again.
    pub fn remove(&mut self, stmt: StmtId) {
        self.grow(stmt);
        self.pop(stmt);
        self.removed.insert(stmt.index());
        self.known.remove(stmt.index());
    }

    /// Returns `true` if `stmt` was removed.
    #[must_use]
    pub fn is_removed(&self, stmt: StmtId) -> bool {
        self.removed.contains(stmt.index())
    }

    /// Number of statements waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending
    }

    /// Returns `true` when no statement is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Dequeues the next pending statement after `last`, wrapping around.
    pub fn take_next(&mut self, last: Option<StmtId>) -> Option<StmtId> {
        if self.pending == 0 {
            return None;
        }
        let from = last.map_or(0, |s| s.index() + 1);
        let next = self.worklist.find_next(from)?;
        self.worklist.remove(next);
        self.pending -= 1;
        Some(StmtId::new(next))
    }

    /// Drops every removed statement from its block.
    pub fn apply_to_function(&self, function: &mut Function) {
        if self.removed.is_empty() {
            return;
        }
        let mut dropped = 0usize;
        for block in function.block_ids() {
            let statements = &mut function.block_mut(block).statements;
            let before = statements.len();
            statements.retain(|s| !self.removed.contains(s.index()));
            dropped += before - statements.len();
        }
        trace!("{}: dropped {dropped} removed statements", function.name);
    }
}
