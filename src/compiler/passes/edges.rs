//! Critical-edge splitting.
//!
//! An edge is critical when its source has several successors and its target
//! several predecessors. Phi elimination places copies at the end of the
//! predecessor, which is only correct when that predecessor leads nowhere
//! else, so every critical edge gets an empty block holding just a jump.
//!
//! ```text
//!   A   B            A    B
//!   |\ /             |\   |
//!   | X      =>      | N  |
//!   |/ \             |  \ |
//!   C   D            C    D
//! ```

use log::debug;

use crate::{
    analysis::{DefUses, DominatorTree},
    ir::{BlockId, Function, StmtKind},
};

/// Splits every critical edge, keeping the dominator tree and loop groups current.
///
/// New blocks inherit the exception handler of the edge target. Returns the
/// number of blocks inserted.
pub fn split_critical_edges(
    function: &mut Function,
    dominators: &mut DominatorTree,
    def_uses: &mut DefUses,
) -> usize {
    let mut inserted = 0;
    for to in function.block_ids() {
        if function.block(to).preds.len() < 2 {
            continue;
        }

        for in_idx in 0..function.block(to).preds.len() {
            let from = function.block(to).preds[in_idx];
            if function.block(from).succs.len() < 2 {
                continue;
            }

            // with a double edge both out slots lead to `to`; take the first
            // one not yet split
            let Some(out_idx) = function.block(from).succs.iter().position(|&s| s == to) else {
                continue;
            };

            let catch_block = function.block(to).catch_block;
            let new_block = function.new_block(catch_block);
            let jump = function.append(new_block, StmtKind::Jump(to));
            def_uses.register_new_statement(jump);

            function.block_mut(from).succs[out_idx] = new_block;
            function.block_mut(new_block).preds.push(from);
            function.block_mut(to).preds[in_idx] = new_block;
            function.block_mut(new_block).succs.push(to);

            let group = if from == to {
                Some(to)
            } else if function.block(to).group_start {
                let mut container = function.block(from).containing_group;
                while let Some(c) = container {
                    if c == to {
                        break;
                    }
                    container = function.block(c).containing_group;
                }
                if container == Some(to) {
                    Some(to)
                } else {
                    function.block(to).containing_group
                }
            } else {
                function.block(to).containing_group
            };
            function.block_mut(new_block).containing_group = group;

            if let Some(terminator) = function.terminator(from) {
                function.stmt_mut(terminator).set_successor(out_idx, new_block);
            }

            dominators.set_immediate_dominator(new_block, Some(from));
            let to_needs_new_idom = function
                .block(to)
                .preds
                .iter()
                .all(|&pred| pred == new_block || dominators.dominates(to, pred));
            if to_needs_new_idom {
                dominators.set_immediate_dominator(to, Some(new_block));
            }
            inserted += 1;
        }
    }

    if inserted > 0 {
        debug!("{}: split {inserted} critical edges", function.name);
    }
    inserted
}

/// Returns the first critical edge found, if any.
#[must_use]
pub fn find_critical_edge(function: &Function) -> Option<(BlockId, BlockId)> {
    function.blocks().find_map(|block| {
        if block.succs.len() < 2 {
            return None;
        }
        block
            .succs
            .iter()
            .find(|&&succ| function.block(succ).preds.len() > 1)
            .map(|&succ| (block.id, succ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Phi};

    #[test]
    fn test_split_diamond_shortcut() {
        // L0 -> L1, L0 -> L2, L1 -> L2: the edge L0 -> L2 is critical
        let mut f = crate::test::cfg(3, &[(0, 1), (0, 2), (1, 2)]);
        let t = f.new_temp();
        f.prepend(
            BlockId::new(2),
            StmtKind::Phi(Phi {
                target: t,
                incoming: vec![Expr::int(1), Expr::int(2)],
            }),
        );
        let mut dt = DominatorTree::new(&f);
        let mut du = DefUses::build(&f);

        assert_eq!(find_critical_edge(&f), Some((BlockId::new(0), BlockId::new(2))));
        assert_eq!(split_critical_edges(&mut f, &mut dt, &mut du), 1);
        assert_eq!(find_critical_edge(&f), None);
        assert!(f.verify_cfg().is_ok());

        let split = BlockId::new(3);
        assert_eq!(f.block(BlockId::new(2)).preds, vec![split, BlockId::new(1)]);
        assert_eq!(dt.immediate_dominator(split), Some(BlockId::new(0)));
        assert_eq!(dt.immediate_dominator(BlockId::new(2)), Some(BlockId::new(0)));
        assert!(dt.verify(&f).is_ok());
    }

    #[test]
    fn test_split_backedge_stays_in_loop() {
        // L0 -> L1 -> {L2, L3}; L2 -> {L1, L3}
        let mut f = crate::test::cfg(4, &[(0, 1), (1, 2), (1, 3), (2, 1), (2, 3)]);
        let header = BlockId::new(1);
        f.block_mut(header).group_start = true;
        f.block_mut(BlockId::new(2)).containing_group = Some(header);
        let mut dt = DominatorTree::new(&f);
        let mut du = DefUses::build(&f);

        assert_eq!(split_critical_edges(&mut f, &mut dt, &mut du), 3);
        assert!(find_critical_edge(&f).is_none());
        assert!(f.verify_cfg().is_ok());
        assert!(dt.verify(&f).is_ok());

        // L4 carries the back edge, L5 and L6 the two exits
        assert_eq!(f.block(BlockId::new(4)).containing_group, Some(header));
        assert_eq!(f.block(BlockId::new(5)).containing_group, None);
        assert_eq!(f.block(BlockId::new(6)).containing_group, None);
        assert_eq!(dt.immediate_dominator(BlockId::new(3)), Some(header));
    }
}
