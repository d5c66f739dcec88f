//! Functions and basic blocks.
//!
//! A [`Function`] owns two arenas: basic blocks indexed by [`BlockId`] and
//! statements indexed by [`StmtId`]. Blocks list their statements by id and
//! refer to neighbouring blocks by id, so the block graph can be rewired
//! freely without ownership cycles.
//!
//! # Edge invariants
//!
//! - A block's successor list has zero entries (ends in `Ret`), one (ends in
//!   `Jump`) or two (ends in `CJump`, true edge first).
//! - A block appears in a successor's predecessor list once per edge to it.
//! - Every phi has exactly one incoming value per predecessor edge, in
//!   predecessor order.
//! - Block 0 is the entry and has no predecessors.
//!
//! [`Function::verify_cfg`] checks all of the above.

use crate::{
    ir::{BlockId, Expr, Stmt, StmtId, StmtKind, Temp},
    Error, Result,
};

/// A basic block.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Position in the function's block arena.
    pub id: BlockId,
    /// Statements in execution order; phis first, terminator last.
    pub statements: Vec<StmtId>,
    /// Predecessor edges.
    pub preds: Vec<BlockId>,
    /// Successor edges.
    pub succs: Vec<BlockId>,
    /// Handler that receives exceptions thrown in this block.
    pub catch_block: Option<BlockId>,
    /// This block is the entry of an exception handler. Handlers are never purged.
    pub is_exception_handler: bool,
    /// The block was deleted; its arena slot stays until renumbering.
    pub removed: bool,
    /// The block is a loop header.
    pub group_start: bool,
    /// Header of the innermost loop containing this block.
    pub containing_group: Option<BlockId>,
}

impl Default for BlockId {
    fn default() -> Self {
        BlockId::new(0)
    }
}

/// The unit of compilation.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// Name used in diagnostics.
    pub name: String,
    /// Formal parameter names.
    pub formals: Vec<String>,
    /// Local variable names.
    pub locals: Vec<String>,
    /// The body reads the implicit arguments object, so formals must stay in their slots.
    pub uses_arguments_object: bool,
    /// The body contains a try statement.
    pub has_try: bool,
    /// Locals may be captured by nested closures or reached by dynamic scope
    /// lookups, so they must stay in their frame slots.
    pub variables_can_escape: bool,
    /// Number of virtual registers allocated so far.
    pub temp_count: u32,
    blocks: Vec<BasicBlock>,
    stmts: Vec<Stmt>,
}

impl Function {
    /// Creates an empty function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Size of the block arena, removed blocks included.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks not marked removed.
    #[must_use]
    pub fn live_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.removed).count()
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns the block with the given id, mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Iterates over the live blocks in arena order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| !b.removed)
    }

    /// Ids of the live blocks in arena order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(|b| b.id).collect()
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    /// Appends a new, empty block.
    pub fn new_block(&mut self, catch_block: Option<BlockId>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            catch_block,
            ..BasicBlock::default()
        });
        id
    }

    /// Marks a block removed and drops its statement and edge lists.
    ///
    /// Neighbours are not touched; callers unlink edges first.
    pub fn remove_block(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.index()];
        block.removed = true;
        block.statements.clear();
        block.preds.clear();
        block.succs.clear();
    }

    /// Size of the statement arena. Every statement id is below this.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.stmts.len()
    }

    /// Returns the statement with the given id.
    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    /// Returns the statement with the given id, mutably.
    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    /// Allocates a statement without placing it in a block.
    pub fn new_stmt(&mut self, kind: StmtKind) -> StmtId {
        let id = StmtId::new(self.stmts.len());
        self.stmts.push(Stmt { id, kind });
        id
    }

    /// Allocates a statement at the end of `block`.
    pub fn append(&mut self, block: BlockId, kind: StmtKind) -> StmtId {
        let id = self.new_stmt(kind);
        self.blocks[block.index()].statements.push(id);
        id
    }

    /// Allocates a statement at the start of `block`.
    pub fn prepend(&mut self, block: BlockId, kind: StmtKind) -> StmtId {
        let id = self.new_stmt(kind);
        self.blocks[block.index()].statements.insert(0, id);
        id
    }

    /// Allocates a statement directly before `before` in `block`.
    pub fn insert_before(&mut self, block: BlockId, before: StmtId, kind: StmtKind) -> StmtId {
        let id = self.new_stmt(kind);
        let statements = &mut self.blocks[block.index()].statements;
        let pos = statements
            .iter()
            .position(|&s| s == before)
            .unwrap_or(statements.len());
        statements.insert(pos, id);
        id
    }

    /// Allocates a statement directly before the terminator of `block`.
    pub fn insert_before_terminator(&mut self, block: BlockId, kind: StmtKind) -> StmtId {
        let id = self.new_stmt(kind);
        self.place_before_terminator(block, id);
        id
    }

    /// Places an already allocated statement before the terminator of `block`.
    pub fn place_before_terminator(&mut self, block: BlockId, id: StmtId) {
        let pos = match self.terminator(block) {
            Some(_) => self.blocks[block.index()].statements.len() - 1,
            None => self.blocks[block.index()].statements.len(),
        };
        self.blocks[block.index()].statements.insert(pos, id);
    }

    /// Removes a statement from its block. The arena slot stays valid.
    pub fn remove_statement(&mut self, block: BlockId, id: StmtId) {
        self.blocks[block.index()].statements.retain(|&s| s != id);
    }

    /// The terminating statement of `block`, if it has one.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<StmtId> {
        let last = *self.blocks[block.index()].statements.last()?;
        self.stmt(last).is_terminator().then_some(last)
    }

    /// Iterates over the statements of `block`.
    pub fn statements(&self, block: BlockId) -> impl Iterator<Item = &Stmt> {
        self.blocks[block.index()]
            .statements
            .iter()
            .map(|&id| &self.stmts[id.index()])
    }

    /// Ids of the leading phis of `block`.
    #[must_use]
    pub fn phis(&self, block: BlockId) -> Vec<StmtId> {
        self.statements(block)
            .take_while(|s| s.as_phi().is_some())
            .map(|s| s.id)
            .collect()
    }

    /// Allocates a fresh virtual register.
    pub fn new_temp(&mut self) -> Temp {
        let temp = Temp::virtual_reg(self.temp_count);
        self.temp_count += 1;
        temp
    }

    /// Records an edge `from -> to` in both adjacency lists.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    /// Removes the phi operands for predecessor slot `index` of `block`.
    ///
    /// Returns the removed operands so callers can drop their uses.
    pub fn remove_phi_operands(&mut self, block: BlockId, index: usize) -> Vec<(StmtId, Expr)> {
        let mut removed = Vec::new();
        for phi in self.phis(block) {
            if let StmtKind::Phi(p) = &mut self.stmts[phi.index()].kind {
                if index < p.incoming.len() {
                    removed.push((phi, p.incoming.remove(index)));
                }
            }
        }
        removed
    }

    /// Compacts the block arena into `order`, which must list every live block.
    ///
    /// Removed blocks are dropped and all block references (edges, handlers,
    /// loop groups, jump targets) are rewritten. Returns the old-to-new id map.
    pub fn renumber_blocks(&mut self, order: &[BlockId]) -> Vec<Option<BlockId>> {
        debug_assert_eq!(order.len(), self.live_block_count());
        let mut remap = vec![None; self.blocks.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old.index()] = Some(BlockId::new(new));
        }
        let map = |id: BlockId| remap[id.index()].unwrap_or(id);

        let mut old_blocks: Vec<Option<BasicBlock>> =
            std::mem::take(&mut self.blocks).into_iter().map(Some).collect();
        for &old in order {
            if let Some(mut block) = old_blocks[old.index()].take() {
                block.id = map(old);
                block.preds.iter_mut().for_each(|p| *p = map(*p));
                block.succs.iter_mut().for_each(|s| *s = map(*s));
                block.catch_block = block.catch_block.map(map);
                block.containing_group = block.containing_group.map(map);
                for &stmt in &block.statements {
                    match &mut self.stmts[stmt.index()].kind {
                        StmtKind::Jump(target) => *target = map(*target),
                        StmtKind::CJump(cj) => {
                            cj.iftrue = map(cj.iftrue);
                            cj.iffalse = map(cj.iffalse);
                        }
                        _ => {}
                    }
                }
                self.blocks.push(block);
            }
        }
        remap
    }

    /// Checks the edge, terminator and phi-arity invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIr`] describing the first violation found.
    pub fn verify_cfg(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidIr(format!("{}: {msg}", self.name)));

        if let Some(entry) = self.blocks.first() {
            if !entry.preds.is_empty() {
                return invalid("entry block has predecessors".to_string());
            }
        }

        for block in self.blocks() {
            let id = block.id;
            let count = block.statements.len();
            let mut seen_non_phi = false;
            for (pos, stmt) in self.statements(id).enumerate() {
                if stmt.is_terminator() && pos + 1 != count {
                    return invalid(format!("{id}: terminator {} is not last", stmt.id));
                }
                match &stmt.kind {
                    StmtKind::Phi(phi) => {
                        if seen_non_phi {
                            return invalid(format!("{id}: phi {} after non-phi", stmt.id));
                        }
                        if phi.incoming.len() != block.preds.len() {
                            return invalid(format!(
                                "{id}: phi {} has {} operands for {} predecessors",
                                stmt.id,
                                phi.incoming.len(),
                                block.preds.len()
                            ));
                        }
                    }
                    _ => seen_non_phi = true,
                }
            }

            let expected: Vec<BlockId> = match self.terminator(id).map(|t| &self.stmt(t).kind) {
                Some(StmtKind::Jump(target)) => vec![*target],
                Some(StmtKind::CJump(cj)) => vec![cj.iftrue, cj.iffalse],
                Some(_) => Vec::new(),
                None => return invalid(format!("{id}: block has no terminator")),
            };
            if expected != block.succs {
                return invalid(format!(
                    "{id}: successors {:?} do not match terminator targets {expected:?}",
                    block.succs
                ));
            }

            for &succ in &block.succs {
                let succ_block = self.block(succ);
                if succ_block.removed {
                    return invalid(format!("{id}: edge to removed block {succ}"));
                }
                let edges = block.succs.iter().filter(|&&s| s == succ).count();
                let back = succ_block.preds.iter().filter(|&&p| p == id).count();
                if edges != back {
                    return invalid(format!("{id}: {edges} edges to {succ} but {back} back-links"));
                }
            }
            for &pred in &block.preds {
                if self.block(pred).removed || !self.block(pred).succs.contains(&id) {
                    return invalid(format!("{id}: stale predecessor {pred}"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CJump, Move, Phi};

    // L0 -> L1 -> L2
    fn straight_line() -> Function {
        let mut f = Function::new("f");
        let b0 = f.new_block(None);
        let b1 = f.new_block(None);
        let b2 = f.new_block(None);
        f.append(b0, StmtKind::Jump(b1));
        f.add_edge(b0, b1);
        f.append(b1, StmtKind::Jump(b2));
        f.add_edge(b1, b2);
        f.append(b2, StmtKind::Ret(Expr::undefined()));
        f
    }

    #[test]
    fn test_verify_accepts_well_formed() {
        assert!(straight_line().verify_cfg().is_ok());
    }

    #[test]
    fn test_verify_rejects_phi_arity() {
        let mut f = straight_line();
        let t = f.new_temp();
        f.prepend(
            BlockId::new(2),
            StmtKind::Phi(Phi {
                target: t,
                incoming: vec![],
            }),
        );
        assert!(matches!(f.verify_cfg(), Err(Error::InvalidIr(_))));
    }

    #[test]
    fn test_verify_rejects_successor_mismatch() {
        let mut f = straight_line();
        let b0 = BlockId::new(0);
        let jump = f.terminator(b0).unwrap();
        f.stmt_mut(jump).kind = StmtKind::CJump(CJump {
            cond: Expr::boolean(true),
            iftrue: BlockId::new(1),
            iffalse: BlockId::new(2),
        });
        assert!(f.verify_cfg().is_err());
    }

    #[test]
    fn test_insert_before_terminator() {
        let mut f = straight_line();
        let t = f.new_temp();
        let b1 = BlockId::new(1);
        let mv = f.insert_before_terminator(
            b1,
            StmtKind::Move(Move {
                target: Expr::Temp(t),
                source: Expr::int(1),
                swap: false,
            }),
        );
        assert_eq!(f.block(b1).statements.first(), Some(&mv));
        assert!(f.terminator(b1).is_some());
    }

    #[test]
    fn test_renumber_blocks() {
        let mut f = straight_line();
        // drop L1 by routing L0 -> L2
        let b0 = BlockId::new(0);
        let b2 = BlockId::new(2);
        let jump = f.terminator(b0).unwrap();
        f.stmt_mut(jump).kind = StmtKind::Jump(b2);
        f.block_mut(b0).succs = vec![b2];
        f.block_mut(b2).preds = vec![b0];
        f.remove_block(BlockId::new(1));

        let remap = f.renumber_blocks(&[b0, b2]);
        assert_eq!(remap[2], Some(BlockId::new(1)));
        assert_eq!(f.block_count(), 2);
        assert_eq!(f.block(b0).succs, vec![BlockId::new(1)]);
        assert!(matches!(f.stmt(jump).kind, StmtKind::Jump(t) if t == BlockId::new(1)));
        assert!(f.verify_cfg().is_ok());
    }
}
