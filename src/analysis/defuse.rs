//! Def-use chains for SSA temps.
//!
//! [`DefUses`] records, for every virtual register, its unique defining
//! statement (and that statement's block) plus the statements reading it, and
//! for every statement the temps it reads. The optimizer keeps the table
//! current as it rewrites code: every pass that adds, removes or rewrites a
//! statement goes through these methods, so that "zero uses" reliably means
//! dead and "defined by a constant move" reliably means propagatable.
//!
//! # Basic Usage
//!
//! ```rust,ignore
//! let mut du = DefUses::build(&function);
//!
//! if du.use_count(&t) == 0 {
//!     if let Some(def) = du.def_stmt(&t) {
//!         // dead definition: drop it and revisit the producers it read
//!         let producers = du.remove_def_uses(function.stmt(def));
//!     }
//! }
//! ```

use crate::ir::{BlockId, Function, Stmt, StmtId, StmtKind, Temp, TempKind};

/// Definition and uses of one temp.
#[derive(Debug, Clone, Default)]
pub struct DefUse {
    /// The temp, as first registered.
    pub temp: Option<Temp>,
    /// Defining statement.
    pub def_stmt: Option<StmtId>,
    /// Block holding the defining statement.
    pub def_block: Option<BlockId>,
    /// Statements reading the temp, without duplicates.
    pub uses: Vec<StmtId>,
}

impl DefUse {
    /// Returns `true` once the temp has been registered by a def or a use.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.temp.is_some()
    }

    fn clear(&mut self) {
        self.def_stmt = None;
        self.def_block = None;
        self.uses.clear();
    }
}

/// Def-use table indexed by virtual-register index and statement id.
#[derive(Debug, Clone, Default)]
pub struct DefUses {
    def_uses: Vec<DefUse>,
    uses_per_statement: Vec<Vec<Temp>>,
}

impl DefUses {
    /// Creates an empty table sized for `function`.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        Self {
            def_uses: vec![DefUse::default(); function.temp_count as usize],
            uses_per_statement: vec![Vec::new(); function.statement_count()],
        }
    }

    /// Scans every live statement of an SSA function and records its def and uses.
    #[must_use]
    pub fn build(function: &Function) -> Self {
        let mut du = Self::new(function);
        for block in function.blocks() {
            for stmt in function.statements(block.id) {
                if let Some(def) = stmt.def_temp() {
                    du.add_def(def, stmt.id, block.id);
                }
                stmt.for_each_use(&mut |t| {
                    if t.kind == TempKind::VirtualRegister {
                        du.add_use(*t, stmt.id);
                    }
                });
            }
        }
        du
    }

    fn ensure_temp(&mut self, temp: &Temp) {
        if self.def_uses.len() <= temp.index as usize {
            self.def_uses.resize(temp.index as usize + 1, DefUse::default());
        }
    }

    fn ensure_stmt(&mut self, stmt: StmtId) {
        if self.uses_per_statement.len() <= stmt.index() {
            self.uses_per_statement.resize(stmt.index() + 1, Vec::new());
        }
    }

    /// Drops the use lists of temps that lost their definition.
    pub fn cleanup(&mut self) {
        for du in &mut self.def_uses {
            if du.is_valid() && du.def_stmt.is_none() {
                du.clear();
            }
        }
    }

    /// Number of statement slots tracked.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.uses_per_statement.len()
    }

    /// Number of temp slots tracked.
    #[must_use]
    pub fn temp_count(&self) -> usize {
        self.def_uses.len()
    }

    /// Records `stmt` in `block` as the definition of `temp`.
    pub fn add_def(&mut self, temp: Temp, stmt: StmtId, block: BlockId) {
        debug_assert_eq!(temp.kind, TempKind::VirtualRegister);
        self.ensure_temp(&temp);
        let du = &mut self.def_uses[temp.index as usize];
        debug_assert!(du.def_stmt.is_none(), "{temp} defined twice");
        du.temp = Some(temp);
        du.def_stmt = Some(stmt);
        du.def_block = Some(block);
    }

    /// Every registered temp that still has a definition.
    #[must_use]
    pub fn defs(&self) -> Vec<Temp> {
        self.def_uses
            .iter()
            .filter(|du| du.def_stmt.is_some())
            .filter_map(|du| du.temp)
            .collect()
    }

    /// Every registered temp, defined or not.
    #[must_use]
    pub fn temps(&self) -> Vec<Temp> {
        self.def_uses.iter().filter_map(|du| du.temp).collect()
    }

    /// Forgets the definition and all uses of `temp`.
    pub fn remove_def(&mut self, temp: &Temp) {
        if let Some(du) = self.def_uses.get_mut(temp.index as usize) {
            du.clear();
        }
    }

    /// Adds every statement in `uses` as a use of `temp`.
    pub fn add_uses(&mut self, temp: &Temp, uses: &[StmtId]) {
        for &stmt in uses {
            self.add_use(*temp, stmt);
        }
    }

    /// Records that `stmt` reads `temp`.
    pub fn add_use(&mut self, temp: Temp, stmt: StmtId) {
        self.ensure_temp(&temp);
        self.ensure_stmt(stmt);
        let du = &mut self.def_uses[temp.index as usize];
        if du.temp.is_none() {
            du.temp = Some(temp);
        }
        if !du.uses.contains(&stmt) {
            du.uses.push(stmt);
        }
        self.uses_per_statement[stmt.index()].push(temp);
    }

    /// Number of statements reading `temp`.
    #[must_use]
    pub fn use_count(&self, temp: &Temp) -> usize {
        self.def_uses
            .get(temp.index as usize)
            .map_or(0, |du| du.uses.len())
    }

    /// Statements reading `temp`.
    #[must_use]
    pub fn uses(&self, temp: &Temp) -> &[StmtId] {
        self.def_uses
            .get(temp.index as usize)
            .map_or(&[], |du| du.uses.as_slice())
    }

    /// The statement defining `temp`.
    #[must_use]
    pub fn def_stmt(&self, temp: &Temp) -> Option<StmtId> {
        self.def_uses.get(temp.index as usize)?.def_stmt
    }

    /// The block holding the statement defining `temp`.
    #[must_use]
    pub fn def_block(&self, temp: &Temp) -> Option<BlockId> {
        self.def_uses.get(temp.index as usize)?.def_block
    }

    /// Moves every definition recorded in block `from` to block `to`.
    pub fn replace_basic_block(&mut self, from: BlockId, to: BlockId) {
        for du in &mut self.def_uses {
            if du.def_block == Some(from) {
                du.def_block = Some(to);
            }
        }
    }

    /// Removes `stmt` from the uses of `temp`.
    pub fn remove_use(&mut self, stmt: StmtId, temp: &Temp) {
        if let Some(du) = self.def_uses.get_mut(temp.index as usize) {
            du.uses.retain(|&s| s != stmt);
        }
        if let Some(used) = self.uses_per_statement.get_mut(stmt.index()) {
            used.retain(|t| t != temp);
        }
    }

    /// Re-reads the uses of a rewritten statement, replacing what was recorded.
    pub fn refresh_uses(&mut self, stmt: &Stmt) {
        self.ensure_stmt(stmt.id);
        for temp in std::mem::take(&mut self.uses_per_statement[stmt.id.index()]) {
            if let Some(du) = self.def_uses.get_mut(temp.index as usize) {
                du.uses.retain(|&s| s != stmt.id);
            }
        }
        stmt.for_each_use(&mut |t| {
            if t.kind == TempKind::VirtualRegister {
                self.add_use(*t, stmt.id);
            }
        });
    }

    /// Makes room for a statement allocated after the table was built.
    pub fn register_new_statement(&mut self, stmt: StmtId) {
        self.ensure_stmt(stmt);
    }

    /// Temps read by `stmt`, with repetitions.
    #[must_use]
    pub fn used_vars(&self, stmt: StmtId) -> &[Temp] {
        self.uses_per_statement
            .get(stmt.index())
            .map_or(&[], Vec::as_slice)
    }

    /// Removes all uses of `stmt` and, if it defines a temp, that definition.
    ///
    /// Returns the defining statements of the temps it read; they may have
    /// become dead and should be revisited.
    pub fn remove_def_uses(&mut self, stmt: &Stmt) -> Vec<StmtId> {
        let used = std::mem::take(&mut self.uses_per_statement[stmt.id.index()]);
        let mut def_stmts = Vec::with_capacity(used.len());
        for temp in &used {
            if let Some(def) = self.def_stmt(temp) {
                def_stmts.push(def);
            }
            if let Some(du) = self.def_uses.get_mut(temp.index as usize) {
                du.uses.retain(|&s| s != stmt.id);
            }
        }
        match &stmt.kind {
            StmtKind::Phi(phi) => self.remove_def(&phi.target),
            StmtKind::Move(m) => {
                if let Some(t) = m.target.as_temp() {
                    if t.kind == TempKind::VirtualRegister && !m.swap {
                        self.remove_def(t);
                    }
                }
            }
            _ => {}
        }
        def_stmts
    }

    /// Updates the type recorded for `temp`.
    pub fn set_type(&mut self, temp: &Temp) {
        if let Some(du) = self.def_uses.get_mut(temp.index as usize) {
            if let Some(recorded) = du.temp.as_mut() {
                recorded.ty = temp.ty;
            }
        }
    }
}
