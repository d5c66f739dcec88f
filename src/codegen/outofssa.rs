//! Phi elimination.

use log::debug;

use crate::{
    codegen::MoveMapping,
    ir::{Function, StmtKind},
};

/// Replaces every phi with moves at the end of its predecessors.
///
/// The function must be free of critical edges, so a block feeding phis has
/// a single successor and the moves run only on that edge. Each block's
/// moves form one parallel copy, ordered by [`MoveMapping`]. Returns the
/// number of phis removed.
pub fn convert_out_of_ssa(function: &mut Function) -> usize {
    for block in function.block_ids() {
        let mut moves = MoveMapping::new();
        for &succ in &function.block(block).succs {
            let Some(pred_index) = function.block(succ).preds.iter().position(|&p| p == block)
            else {
                continue;
            };
            for stmt in function.statements(succ) {
                let StmtKind::Phi(phi) = &stmt.kind else {
                    break;
                };
                if let Some(incoming) = phi.incoming.get(pred_index) {
                    moves.add(incoming.clone(), phi.target);
                }
            }
        }
        if moves.is_empty() {
            continue;
        }
        debug_assert_eq!(
            function.block(block).succs.len(),
            1,
            "{block} feeds phis over a critical edge"
        );
        moves.order();
        moves.insert_moves(function, block);
    }

    let mut removed = 0;
    for block in function.block_ids() {
        for phi in function.phis(block) {
            function.remove_statement(block, phi);
            removed += 1;
        }
    }
    debug!("{}: removed {removed} phis", function.name);
    removed
}
