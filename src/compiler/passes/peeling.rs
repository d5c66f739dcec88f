//! Loop peeling.
//!
//! The first iteration of every innermost loop is unrolled once: the loop's
//! blocks are cloned, the original blocks become the peeled first iteration,
//! and the clones become the loop proper. Every back edge (from the original
//! body or from the clones) is redirected to the cloned header, so the
//! original header is entered once, from outside. Type inference and the
//! allocator can then treat the first iteration, where values are often still
//! constants, apart from the steady state.
//!
//! ```text
//!         |                      |
//!         v                      v
//!   +-> [H] --> exit           [H] ----------> exit
//!   |    |                      |               ^
//!   +-- [B]           =>       [B]              |
//!                               |               |
//!                               v               |
//!                         +-> [H'] -------------+
//!                         |    |
//!                         +-- [B']
//! ```
//!
//! Runs before SSA construction, so no phis need to be cloned or split.

use log::debug;

use crate::{
    analysis::{DominatorTree, LoopDetection, LoopInfo},
    ir::{BlockId, Function},
    utils::BitSet,
};

/// Peels every innermost loop once. Returns the number of loops peeled.
pub fn peel_loops(function: &mut Function, dominators: &mut DominatorTree, loops: &LoopDetection) -> usize {
    let inner: Vec<LoopInfo> = loops.innermost_loops().into_iter().cloned().collect();
    for info in &inner {
        peel_loop(function, dominators, info);
    }
    if !inner.is_empty() {
        debug!("{}: peeled {} loops", function.name, inner.len());
    }
    inner.len()
}

/// Copies `original` with all statements. The copy's edges point at the
/// same successors as the original's.
fn clone_block(function: &mut Function, original: BlockId) -> BlockId {
    let catch_block = function.block(original).catch_block;
    let copy = function.new_block(catch_block);
    for stmt in function.block(original).statements.clone() {
        let kind = function.stmt(stmt).kind.clone();
        function.append(copy, kind);
    }
    for succ in function.block(original).succs.clone() {
        function.add_edge(copy, succ);
    }
    copy
}

/// Points the edges of `block` that enter the original loop body at the
/// matching copies. Targets outside the body are recorded in `exits`.
fn rewire(
    function: &mut Function,
    block: BlockId,
    from: &[BlockId],
    to: &[BlockId],
    exits: &mut Vec<BlockId>,
) {
    for i in 0..function.block(block).succs.len() {
        let out = function.block(block).succs[i];
        match from.iter().position(|&b| b == out) {
            None => {
                if !exits.contains(&out) {
                    exits.push(out);
                }
            }
            Some(idx) => {
                let preds = &mut function.block_mut(out).preds;
                if let Some(pos) = preds.iter().position(|&p| p == block) {
                    preds.remove(pos);
                }
                let new_to = to[idx];
                function.block_mut(new_to).preds.push(block);
                function.block_mut(block).succs[i] = new_to;
                if let Some(terminator) = function.terminator(block) {
                    function.stmt_mut(terminator).set_successor(i, new_to);
                }
            }
        }
    }
}

fn peel_loop(function: &mut Function, dominators: &mut DominatorTree, info: &LoopInfo) {
    let header = info.header;
    let outer = function.block(header).containing_group;

    let new_header = clone_block(function, header);
    function.block_mut(new_header).containing_group = outer;
    function.block_mut(new_header).group_start = true;
    let new_body: Vec<BlockId> = info
        .body
        .iter()
        .map(|&block| {
            let copy = clone_block(function, block);
            function.block_mut(copy).containing_group = Some(new_header);
            copy
        })
        .collect();

    // back edges, including those of the copies, move to the new header
    for pred in function.block(header).preds.clone() {
        if pred != new_header && !new_body.contains(&pred) && !dominators.dominates_or_equal(header, pred) {
            continue;
        }
        let preds = &mut function.block_mut(header).preds;
        if let Some(pos) = preds.iter().position(|&p| p == pred) {
            preds.remove(pos);
        }
        function.block_mut(new_header).preds.push(pred);

        let Some(slot) = function.block(pred).succs.iter().position(|&s| s == header) else {
            continue;
        };
        function.block_mut(pred).succs[slot] = new_header;
        if let Some(terminator) = function.terminator(pred) {
            function.stmt_mut(terminator).set_successor(slot, new_header);
        }
    }

    let mut exits = vec![new_header];
    rewire(function, new_header, &info.body, &new_body, &mut exits);
    for &copy in &new_body {
        rewire(function, copy, &info.body, &new_body, &mut exits);
    }

    // the original blocks now run once
    function.block_mut(header).group_start = false;
    for &block in &info.body {
        function.block_mut(block).containing_group = outer;
    }

    for (&original, &copy) in info.body.iter().zip(&new_body) {
        let idom = dominators.immediate_dominator(original).map(|idom| {
            if idom == header {
                new_header
            } else {
                info.body
                    .iter()
                    .position(|&b| b == idom)
                    .map_or(idom, |idx| new_body[idx])
            }
        });
        dominators.set_immediate_dominator(copy, idom);
    }

    let mut siblings = BitSet::new(function.block_count());
    for &exit in &exits {
        dominators.collect_siblings(function, exit, &mut siblings);
    }
    dominators.recalculate_idoms(function, &siblings, Some(header));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Expr, StmtKind},
        test::sum_loop,
    };

    #[test]
    fn test_peel_sum_loop() {
        let mut f = sum_loop();
        let mut dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        assert_eq!(peel_loops(&mut f, &mut dt, &loops), 1);
        assert!(f.verify_cfg().is_ok());
        assert!(dt.verify(&f).is_ok());

        // L1/L2 run once, L4/L5 form the loop
        let (h, b, exit) = (BlockId::new(1), BlockId::new(2), BlockId::new(3));
        let (h2, b2) = (BlockId::new(4), BlockId::new(5));
        assert_eq!(f.block(h).preds, vec![BlockId::new(0)]);
        assert_eq!(f.block(b).succs, vec![h2]);
        assert_eq!(f.block(h2).preds, vec![b, b2]);
        assert_eq!(f.block(h2).succs, vec![b2, exit]);
        assert!(f.block(h2).group_start && !f.block(h).group_start);
        assert_eq!(f.block(b2).containing_group, Some(h2));
        assert_eq!(f.block(b).containing_group, None);
        assert_eq!(f.block(exit).preds.len(), 2);

        let again = LoopDetection::run(&mut f, &dt);
        assert_eq!(again.loops().len(), 1);
        assert_eq!(again.loops()[0].header, h2);
    }

    #[test]
    fn test_peel_self_loop() {
        // L0 -> L1 -> {L1, L2}
        let mut f = crate::test::cfg(3, &[(0, 1), (1, 1), (1, 2)]);
        let mut dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        assert_eq!(peel_loops(&mut f, &mut dt, &loops), 1);
        assert!(f.verify_cfg().is_ok());
        assert!(dt.verify(&f).is_ok());

        // L1 runs once, its copy L3 is the loop
        let (h, exit, h2) = (BlockId::new(1), BlockId::new(2), BlockId::new(3));
        assert_eq!(f.block(h).preds, vec![BlockId::new(0)]);
        assert_eq!(f.block(h).succs, vec![h2, exit]);
        assert_eq!(f.block(h2).succs, vec![h2, exit]);
        assert_eq!(dt.immediate_dominator(h2), Some(h));

        let again = LoopDetection::run(&mut f, &dt);
        assert_eq!(again.loops().len(), 1);
        assert_eq!(again.loops()[0].header, h2);
    }

    #[test]
    fn test_peeled_statements_are_copies() {
        let mut f = sum_loop();
        let mut dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        peel_loops(&mut f, &mut dt, &loops);
        let original: Vec<StmtKind> = f.statements(BlockId::new(2)).map(|s| s.kind.clone()).collect();
        let copy: Vec<StmtKind> = f.statements(BlockId::new(5)).map(|s| s.kind.clone()).collect();
        assert_eq!(original.len(), copy.len());
        assert_eq!(original[..original.len() - 1], copy[..copy.len() - 1]);
        assert!(matches!(f.stmt(f.terminator(BlockId::new(3)).unwrap()).kind, StmtKind::Ret(Expr::ArgLocal(_))));
    }
}
