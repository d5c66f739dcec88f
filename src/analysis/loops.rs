//! Natural loop detection on the dominator tree.
//!
//! A block is a loop header when one of its predecessors is dominated by it
//! (or is the block itself); that edge is a back edge. Blocks are visited deepest
//! first in the dominator tree, so inner loops are found before the loops
//! containing them and get folded into the outer body as a unit.
//!
//! Loop membership is written straight into the blocks: `group_start` marks a
//! header and `containing_group` points every member (nested headers
//! included) at the header of its innermost loop. [`LoopDetection`] then
//! rebuilds the loop tree from those links.
//!
//! Two back edges into the same header yield a single loop. A block jumping
//! to itself is a loop with an empty body.

use log::debug;

use crate::{
    analysis::DominatorTree,
    ir::{BlockId, Function},
};

/// One natural loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    /// Entry block, target of every back edge.
    pub header: BlockId,
    /// Blocks whose innermost loop is this one, in block order. Headers of
    /// nested loops are listed; their bodies are not.
    pub body: Vec<BlockId>,
    /// Indices of directly nested loops.
    pub nested: Vec<usize>,
    /// Index of the enclosing loop.
    pub parent: Option<usize>,
}

/// The loops of a function, outer loops after the loops they contain.
#[derive(Debug, Clone, Default)]
pub struct LoopDetection {
    loops: Vec<LoopInfo>,
}

impl LoopDetection {
    /// Marks loop headers and membership in `function` and collects the loop tree.
    pub fn run(function: &mut Function, dominators: &DominatorTree) -> Self {
        for id in function.block_ids() {
            let block = function.block_mut(id);
            block.group_start = false;
            block.containing_group = None;
        }

        let mut backedges = Vec::new();
        for block in dominators.df_node_iter_order(function) {
            backedges.clear();
            backedges.extend(
                function
                    .block(block)
                    .preds
                    .iter()
                    .copied()
                    .filter(|&pred| dominators.dominates_or_equal(block, pred)),
            );
            if !backedges.is_empty() {
                sub_loop(function, dominators, block, &backedges);
            }
        }

        let detection = Self::collect(function);
        debug!("{}: {} loops", function.name, detection.loops.len());
        detection
    }

    fn collect(function: &Function) -> Self {
        let mut detection = Self::default();
        for block in function.blocks() {
            if let Some(header) = block.containing_group {
                let idx = detection.find_or_add(header);
                detection.loops[idx].body.push(block.id);
            }
        }
        for block in function.blocks().filter(|b| b.group_start) {
            detection.find_or_add(block.id);
        }
        for idx in 0..detection.loops.len() {
            let header = detection.loops[idx].header;
            if let Some(outer) = function.block(header).containing_group {
                let parent = detection.find_or_add(outer);
                detection.loops[idx].parent = Some(parent);
                detection.loops[parent].nested.push(idx);
            }
        }
        detection
    }

    fn find_or_add(&mut self, header: BlockId) -> usize {
        if let Some(idx) = self.loops.iter().position(|l| l.header == header) {
            return idx;
        }
        self.loops.push(LoopInfo {
            header,
            body: Vec::new(),
            nested: Vec::new(),
            parent: None,
        });
        self.loops.len() - 1
    }

    /// Every loop found.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Loops without nested loops.
    #[must_use]
    pub fn innermost_loops(&self) -> Vec<&LoopInfo> {
        self.loops.iter().filter(|l| l.nested.is_empty()).collect()
    }

    /// The loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: BlockId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }
}

/// Claims every block on a path from a back edge source back to `header`.
///
/// A block already inside another loop stands for that loop's outermost
/// header, which becomes nested in this one.
fn sub_loop(function: &mut Function, dominators: &DominatorTree, header: BlockId, backedges: &[BlockId]) {
    function.block_mut(header).group_start = true;

    let mut worklist: Vec<BlockId> = backedges.to_vec();
    while let Some(mut pred) = worklist.pop() {
        // only blocks under the header belong to a natural loop
        if !dominators.dominates_or_equal(header, pred) {
            continue;
        }
        if let Some(mut subloop) = function.block(pred).containing_group {
            while let Some(parent) = function.block(subloop).containing_group {
                subloop = parent;
            }
            if subloop == header {
                continue;
            }
            function.block_mut(subloop).containing_group = Some(header);
            pred = subloop;
            for &pred_in in &function.block(pred).preds {
                if function.block(pred_in).containing_group != Some(subloop) {
                    worklist.push(pred_in);
                }
            }
        } else {
            if pred == header {
                continue;
            }
            function.block_mut(pred).containing_group = Some(header);
            worklist.extend(function.block(pred).preds.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{cfg, sum_loop};

    #[test]
    fn test_single_loop() {
        let mut f = sum_loop();
        let dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);

        let header = BlockId::new(1);
        assert_eq!(loops.loops().len(), 1);
        assert_eq!(loops.loops()[0].header, header);
        assert_eq!(loops.loops()[0].body, vec![BlockId::new(2)]);
        assert!(f.block(header).group_start);
        assert_eq!(f.block(BlockId::new(2)).containing_group, Some(header));
        assert_eq!(f.block(BlockId::new(3)).containing_group, None);
    }

    #[test]
    fn test_nested_loops() {
        // L0 -> L1 -> L2 -> L3 -> L2, L3 -> L4 -> L1, L1 -> L5
        //
        // outer loop {L1, L2, L3, L4}, inner loop {L2, L3}
        let mut f = cfg(6, &[(0, 1), (1, 2), (1, 5), (2, 3), (3, 2), (3, 4), (4, 1)]);
        let dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);

        assert_eq!(loops.loops().len(), 2);
        let inner = loops.loop_for_header(BlockId::new(2)).unwrap();
        let outer = loops.loop_for_header(BlockId::new(1)).unwrap();
        assert_eq!(inner.body, vec![BlockId::new(3)]);
        assert_eq!(outer.body, vec![BlockId::new(2), BlockId::new(4)]);
        assert_eq!(inner.parent.map(|p| loops.loops()[p].header), Some(BlockId::new(1)));
        assert_eq!(outer.nested.len(), 1);

        let innermost: Vec<BlockId> = loops.innermost_loops().iter().map(|l| l.header).collect();
        assert_eq!(innermost, vec![BlockId::new(2)]);
    }

    #[test]
    fn test_two_backedges_one_loop() {
        // L0 -> L1 -> {L2, L3}; L2 -> L1; L3 -> {L1, L4}
        let mut f = cfg(5, &[(0, 1), (1, 2), (1, 3), (2, 1), (3, 1), (3, 4)]);
        let dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        assert_eq!(loops.loops().len(), 1);
        assert_eq!(loops.loops()[0].body, vec![BlockId::new(2), BlockId::new(3)]);
    }

    #[test]
    fn test_self_loop_is_a_loop() {
        // L0 -> L1 -> {L1, L2}
        let mut f = cfg(3, &[(0, 1), (1, 1), (1, 2)]);
        let dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        assert_eq!(loops.loops().len(), 1);
        assert_eq!(loops.loops()[0].header, BlockId::new(1));
        assert!(loops.loops()[0].body.is_empty());
        assert!(f.block(BlockId::new(1)).group_start);
        assert_eq!(f.block(BlockId::new(1)).containing_group, None);
        assert_eq!(f.block(BlockId::new(2)).containing_group, None);
    }

    #[test]
    fn test_self_loop_nested_in_outer_loop() {
        // L0 -> L1 -> L2 -> {L2, L3}; L3 -> {L1, L4}
        let mut f = cfg(5, &[(0, 1), (1, 2), (2, 2), (2, 3), (3, 1), (3, 4)]);
        let dt = DominatorTree::new(&f);
        let loops = LoopDetection::run(&mut f, &dt);
        assert_eq!(loops.loops().len(), 2);
        let inner = loops.loop_for_header(BlockId::new(2)).unwrap();
        assert_eq!(inner.parent.map(|p| loops.loops()[p].header), Some(BlockId::new(1)));
        assert_eq!(f.block(BlockId::new(2)).containing_group, Some(BlockId::new(1)));
    }
}
