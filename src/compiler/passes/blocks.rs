//! Unreachable-block removal and straight-line block merging.

use log::debug;

use crate::{
    analysis::{DefUses, DominatorTree},
    ir::{BlockId, Expr, Function, Move, StmtKind},
    utils::BitSet,
};

/// Removes every block not reachable from the entry or from an exception handler.
///
/// Reachable successors of a removed block lose the matching predecessor
/// entries together with the phi operands for those edges. When `def_uses` is
/// given, the statements of removed blocks drop their defs and uses.
///
/// Returns the number of blocks removed.
pub fn cleanup_basic_blocks(function: &mut Function, mut def_uses: Option<&mut DefUses>) -> usize {
    let count = function.block_count();
    let mut reachable = BitSet::new(count);
    let mut postponed: Vec<BlockId> = function
        .blocks()
        .filter(|b| b.id == function.entry() || b.is_exception_handler)
        .map(|b| b.id)
        .collect();

    while let Some(block) = postponed.pop() {
        if function.block(block).removed || reachable.contains(block.index()) {
            continue;
        }
        reachable.insert(block.index());
        for &succ in &function.block(block).succs {
            if !reachable.contains(succ.index()) {
                postponed.push(succ);
            }
        }
    }

    let mut removed = 0;
    for block in function.block_ids() {
        if reachable.contains(block.index()) {
            continue;
        }

        let succs = function.block(block).succs.clone();
        for succ in succs {
            if function.block(succ).removed || !reachable.contains(succ.index()) {
                continue;
            }
            // one entry per edge; later slots first so earlier indices stay valid
            while let Some(idx) = function.block(succ).preds.iter().rposition(|&p| p == block) {
                function.block_mut(succ).preds.remove(idx);
                for (phi, operand) in function.remove_phi_operands(succ, idx) {
                    if let Some(du) = def_uses.as_deref_mut() {
                        for temp in operand.temps() {
                            du.remove_use(phi, &temp);
                        }
                    }
                }
            }
        }

        if let Some(du) = def_uses.as_deref_mut() {
            for &stmt in &function.block(block).statements {
                du.remove_def_uses(function.stmt(stmt));
            }
        }
        function.remove_block(block);
        removed += 1;
    }

    if removed > 0 {
        debug!("{}: removed {removed} unreachable blocks", function.name);
    }
    removed
}

/// Appends a block to its predecessor when the predecessor has a single
/// successor and the block a single predecessor.
///
/// Loop headers are kept so that `containing_group` links stay valid, and
/// functions with exception handlers are left alone. Chains collapse in one
/// call. `def_uses` and `dominators`, when given, are kept consistent.
///
/// Returns the number of blocks merged away.
pub fn merge_basic_blocks(
    function: &mut Function,
    mut def_uses: Option<&mut DefUses>,
    mut dominators: Option<&mut DominatorTree>,
) -> usize {
    if function.has_try {
        return 0;
    }

    let mut merged = 0;
    let mut i = 0;
    while i < function.block_count() {
        let block = BlockId::new(i);
        let bb = function.block(block);
        if bb.removed || bb.succs.len() != 1 {
            i += 1;
            continue;
        }
        let successor = bb.succs[0];
        let succ_bb = function.block(successor);
        if successor == block || succ_bb.preds.len() != 1 || succ_bb.group_start {
            i += 1;
            continue;
        }

        debug_assert!(matches!(
            function.terminator(block).map(|t| &function.stmt(t).kind),
            Some(StmtKind::Jump(_))
        ));
        if let Some(jump) = function.terminator(block) {
            function.remove_statement(block, jump);
        }

        // a single-operand phi is a plain copy once it is mid-block
        for phi in function.phis(successor) {
            let stmt = function.stmt_mut(phi);
            let copy = match &mut stmt.kind {
                StmtKind::Phi(p) => StmtKind::Move(Move {
                    target: Expr::Temp(p.target),
                    source: p.incoming.pop().unwrap_or_else(Expr::undefined),
                    swap: false,
                }),
                _ => continue,
            };
            stmt.kind = copy;
        }

        let moved = std::mem::take(&mut function.block_mut(successor).statements);
        function.block_mut(block).statements.extend(moved);
        let new_succs = std::mem::take(&mut function.block_mut(successor).succs);
        for &next in &new_succs {
            for pred in &mut function.block_mut(next).preds {
                if *pred == successor {
                    *pred = block;
                }
            }
        }
        function.block_mut(block).succs = new_succs;

        if let Some(du) = def_uses.as_deref_mut() {
            du.replace_basic_block(successor, block);
        }
        if let Some(dt) = dominators.as_deref_mut() {
            dt.merge_into_predecessor(successor);
        }
        function.remove_block(successor);
        merged += 1;
        // stay on this block so chains collapse
    }

    if merged > 0 {
        debug!("{}: merged {merged} blocks", function.name);
    }
    merged
}
