//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! A block `d` **dominates** a block `n` if every path from the entry to `n`
//! passes through `d`. The **immediate dominator** of `n` is the closest strict
//! dominator; linking every block to its immediate dominator yields the
//! dominator tree, rooted at the entry block.
//!
//! Besides the from-scratch computation, [`DominatorTree`] supports:
//!
//! - dominance frontiers, used to place phis during SSA construction
//! - a depth-sorted iteration order (dominated blocks before their dominators),
//!   used by loop detection
//! - incremental maintenance after edges are removed, split or rerouted
//!   ([`DominatorTree::recalculate_idoms`]), falling back to a full
//!   recomputation whenever the incremental walk runs into a cycle
//!
//! # Algorithm
//!
//! Depth-first numbering is followed by the semidominator pass using a
//! path-compressed ancestor forest, after which each block's immediate
//! dominator is either its semidominator or, through the "same dominator"
//! link, the immediate dominator of another block. All traversals use explicit
//! work stacks so that deeply nested control flow cannot overflow the stack.
//!
//! # Examples
//!
//! ```rust,ignore
//! // Diamond CFG:
//! //      L0
//! //     /  \
//! //    L1  L2
//! //     \  /
//! //      L3
//! let tree = DominatorTree::new(&function);
//! assert!(tree.dominates(l0, l3));
//! assert!(!tree.dominates(l1, l3));
//! assert_eq!(tree.immediate_dominator(l3), Some(l0));
//! ```

use log::warn;

use crate::{
    ir::{BlockId, Function},
    utils::BitSet,
    Error, Result,
};

const INVALID: usize = usize::MAX;

/// Immediate dominators, and optionally dominance frontiers, of a function's blocks.
#[derive(Debug, Clone, Default)]
pub struct DominatorTree {
    /// Immediate dominator per block index; `INVALID` for the entry and for
    /// blocks not in the tree.
    idom: Vec<usize>,
    /// Dominance frontier per block index. Empty until computed.
    frontiers: Vec<BitSet>,
}

impl DominatorTree {
    /// Computes the immediate dominators of every block reachable from the entry.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        let mut lt = LengauerTarjan::new(function.block_count());
        lt.compute(function);
        Self {
            idom: lt.idom,
            frontiers: Vec::new(),
        }
    }

    /// Returns the immediate dominator of `block`, or `None` for the entry.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        match self.idom.get(block.index()) {
            Some(&idx) if idx != INVALID => Some(BlockId::new(idx)),
            _ => None,
        }
    }

    /// Returns `true` if `dominator` strictly dominates `dominated`.
    ///
    /// A block does not dominate itself.
    #[must_use]
    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        self.dominates_index(dominator.index(), dominated.index())
    }

    /// Returns `true` if `dominator == dominated` or `dominator` strictly dominates `dominated`.
    #[must_use]
    pub fn dominates_or_equal(&self, dominator: BlockId, dominated: BlockId) -> bool {
        dominator == dominated || self.dominates(dominator, dominated)
    }

    fn dominates_index(&self, dominator: usize, dominated: usize) -> bool {
        if dominator == dominated {
            return false;
        }
        let mut it = self.idom.get(dominated).copied().unwrap_or(INVALID);
        while it != INVALID {
            if it == dominator {
                return true;
            }
            it = self.idom[it];
        }
        false
    }

    /// Children of every block in the dominator tree, indexed by block.
    ///
    /// Children appear in block order. Removed blocks have no children and
    /// appear in no list.
    #[must_use]
    pub fn children(&self, function: &Function) -> Vec<Vec<BlockId>> {
        let mut children = vec![Vec::new(); function.block_count()];
        for block in function.blocks() {
            if let Some(dominator) = self.immediate_dominator(block.id) {
                children[dominator.index()].push(block.id);
            }
        }
        children
    }

    /// Computes the dominance frontier of every live block.
    ///
    /// Frontiers are filled bottom-up over the dominator tree: a block's
    /// frontier holds its successors it does not immediately dominate, plus
    /// the frontier members of its children that it does not strictly dominate.
    pub fn compute_frontiers(&mut self, function: &Function) {
        let count = function.block_count();
        let children = self.children(function);
        self.frontiers = vec![BitSet::new(count); count];

        let mut todo: Vec<Vec<BlockId>> = children.clone();
        let mut done = BitSet::new(count);
        let mut worklist: Vec<BlockId> = function.block_ids();

        while let Some(&node) = worklist.last() {
            if done.contains(node.index()) {
                worklist.pop();
                continue;
            }

            let pending = &mut todo[node.index()];
            while let Some(&child) = pending.first() {
                if done.contains(child.index()) {
                    pending.remove(0);
                } else {
                    worklist.push(child);
                    break;
                }
            }
            if !todo[node.index()].is_empty() {
                continue;
            }

            let mut frontier = BitSet::new(count);
            for &succ in &function.block(node).succs {
                if self.idom.get(succ.index()).copied() != Some(node.index()) {
                    frontier.insert(succ.index());
                }
            }
            for &child in &children[node.index()] {
                for w in self.frontiers[child.index()].iter() {
                    if w == node.index() || !self.dominates_index(node.index(), w) {
                        frontier.insert(w);
                    }
                }
            }
            self.frontiers[node.index()] = frontier;
            done.insert(node.index());
            worklist.pop();
        }
    }

    /// Returns the dominance frontier of `block`.
    ///
    /// Empty unless [`DominatorTree::compute_frontiers`] has run.
    #[must_use]
    pub fn frontier(&self, block: BlockId) -> Vec<BlockId> {
        self.frontiers
            .get(block.index())
            .map(|set| set.iter().map(BlockId::new).collect())
            .unwrap_or_default()
    }

    /// Overwrites the immediate dominator of `block`, growing the table for new blocks.
    pub fn set_immediate_dominator(&mut self, block: BlockId, dominator: Option<BlockId>) {
        if block.index() >= self.idom.len() {
            self.idom.resize(block.index() + 1, INVALID);
        }
        self.idom[block.index()] = dominator.map_or(INVALID, BlockId::index);
    }

    /// Adds `node` and every live block sharing its immediate dominator to `siblings`.
    pub fn collect_siblings(&self, function: &Function, node: BlockId, siblings: &mut BitSet) {
        siblings.grow(function.block_count());
        siblings.insert(node.index());
        let Some(dominator) = self.immediate_dominator(node) else {
            return;
        };
        for block in function.blocks() {
            if self.immediate_dominator(block.id) == Some(dominator) {
                siblings.insert(block.id.index());
            }
        }
    }

    /// Reparents the dominator-tree children of `successor` to its own immediate
    /// dominator, for when `successor` is merged into its predecessor.
    pub fn merge_into_predecessor(&mut self, successor: BlockId) {
        let Some(&succ_dom) = self.idom.get(successor.index()) else {
            return;
        };
        for idx in &mut self.idom {
            if *idx == successor.index() {
                *idx = succ_dom;
            }
        }
    }

    /// Depth of every block in the tree; the entry has depth 0.
    ///
    /// Removed and unreachable blocks have no depth.
    #[must_use]
    pub fn node_depths(&self, function: &Function) -> Vec<Option<usize>> {
        let mut depths = vec![None; function.block_count()];
        if depths.is_empty() {
            return depths;
        }
        depths[0] = Some(0);

        let mut chain = Vec::with_capacity(8);
        for block in function.blocks() {
            if depths[block.id.index()].is_some() {
                continue;
            }
            // climb to the first dominator with a known depth, then unwind
            chain.clear();
            let mut it = block.id.index();
            let mut depth = None;
            while it != INVALID {
                if let Some(d) = depths[it] {
                    depth = Some(d);
                    break;
                }
                chain.push(it);
                it = self.idom.get(it).copied().unwrap_or(INVALID);
            }
            let Some(mut depth) = depth else {
                continue;
            };
            for &idx in chain.iter().rev() {
                depth += 1;
                depths[idx] = Some(depth);
            }
        }
        depths
    }

    /// Live blocks sorted deepest-first in the dominator tree.
    ///
    /// Every block comes after all blocks it dominates and before all blocks
    /// dominating it; the order among blocks at the same depth is unspecified.
    #[must_use]
    pub fn df_node_iter_order(&self, function: &Function) -> Vec<BlockId> {
        let depths = self.node_depths(function);
        let mut order: Vec<BlockId> = function
            .block_ids()
            .into_iter()
            .filter(|b| depths[b.index()].is_some())
            .collect();
        order.sort_by(|a, b| depths[b.index()].cmp(&depths[a.index()]));
        order
    }

    /// Recomputes the immediate dominators of `nodes` after edges were removed
    /// or rerouted.
    ///
    /// Each node's new immediate dominator is the lowest common ancestor of
    /// the dominator chains of its surviving forward predecessors; a node whose
    /// chain passes through another node still awaiting recalculation waits for
    /// that node first. Chains are only walked up to `limit` when given. If the
    /// walk meets a dependency cycle (an edge change inside a loop), the tree
    /// is recomputed from scratch instead.
    pub fn recalculate_idoms(&mut self, function: &Function, nodes: &BitSet, limit: Option<BlockId>) {
        if self.idom.len() < function.block_count() {
            self.idom.resize(function.block_count(), INVALID);
        }
        let limit = limit.map_or(INVALID, BlockId::index);
        let mut todo = nodes.clone();
        todo.grow(function.block_count());
        let mut postponed = BitSet::new(function.block_count());

        while let Some(node) = todo.find_next(0) {
            if self
                .recalculate_idom(function, node, &mut todo, &mut postponed, limit)
                .is_none()
            {
                warn!(
                    "{}: incremental dominator update hit a cycle, recomputing",
                    function.name
                );
                *self = Self::new(function);
                return;
            }
        }
    }

    /// Returns `None` when the incremental update has to be abandoned.
    fn recalculate_idom(
        &mut self,
        function: &Function,
        start: usize,
        todo: &mut BitSet,
        postponed: &mut BitSet,
        limit: usize,
    ) -> Option<()> {
        todo.remove(start);
        let mut stack = vec![start];

        while let Some(&node) = stack.last() {
            postponed.remove(node);
            let preds = &function.block(BlockId::new(node)).preds;
            if preds.len() == 1 {
                self.idom[node] = preds[0].index();
                stack.pop();
                continue;
            }

            match self.pending_dependency(function, node, todo, postponed, limit) {
                Dependency::Cycle => return None,
                Dependency::Pending(next) => {
                    postponed.insert(node);
                    todo.remove(next);
                    stack.push(next);
                    continue;
                }
                Dependency::Ready => {}
            }

            let mut best: Vec<usize> = Vec::new();
            let mut seen_any = false;
            for pred in self.forward_preds(function, node) {
                let mut chain = self.chain(pred, limit);
                chain.reverse();
                if !seen_any {
                    best = chain;
                    seen_any = true;
                } else {
                    let common = best
                        .iter()
                        .zip(chain.iter())
                        .take_while(|(a, b)| a == b)
                        .count();
                    best.truncate(common);
                }
            }
            self.idom[node] = *best.last()?;
            stack.pop();
        }
        Some(())
    }

    /// Predecessors of `node` that are not back-edge sources under the current tree.
    fn forward_preds(&self, function: &Function, node: usize) -> Vec<usize> {
        function
            .block(BlockId::new(node))
            .preds
            .iter()
            .map(|p| p.index())
            .filter(|&p| p != node && !self.dominates_index(node, p))
            .collect()
    }

    /// The dominator chain of `from`, nearest first, ending at `limit` or the root.
    fn chain(&self, from: usize, limit: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut it = from;
        while it != INVALID {
            chain.push(it);
            if it == limit {
                break;
            }
            it = self.idom[it];
        }
        chain
    }

    fn pending_dependency(
        &self,
        function: &Function,
        node: usize,
        todo: &BitSet,
        postponed: &BitSet,
        limit: usize,
    ) -> Dependency {
        for pred in self.forward_preds(function, node) {
            let mut it = pred;
            while it != INVALID {
                if it == limit {
                    break;
                }
                if postponed.contains(it) {
                    return Dependency::Cycle;
                }
                if todo.contains(it) {
                    return Dependency::Pending(it);
                }
                it = self.idom[it];
            }
        }
        Dependency::Ready
    }

    /// Checks that the maintained tree equals a from-scratch computation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIr`] naming the first block whose immediate
    /// dominator differs.
    pub fn verify(&self, function: &Function) -> Result<()> {
        let fresh = Self::new(function);
        for block in function.blocks() {
            let expected = fresh.immediate_dominator(block.id);
            let actual = self.immediate_dominator(block.id);
            if expected != actual {
                return Err(Error::InvalidIr(format!(
                    "{}: immediate dominator of {} is {actual:?}, expected {expected:?}",
                    function.name, block.id
                )));
            }
        }
        Ok(())
    }
}

enum Dependency {
    Ready,
    Pending(usize),
    Cycle,
}

/// Internal state for the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    /// Number of blocks numbered so far
    n: usize,
    /// DFS number per block (`INVALID` = not visited)
    dfnum: Vec<usize>,
    /// Block with each DFS number
    vertex: Vec<usize>,
    /// Parent in the DFS spanning tree
    parent: Vec<usize>,
    /// Ancestor in the link-eval forest
    ancestor: Vec<usize>,
    /// Block with the lowest semidominator on the path to the ancestor
    best: Vec<usize>,
    /// Semidominator
    semi: Vec<usize>,
    /// Block whose immediate dominator this block shares
    samedom: Vec<usize>,
    /// Result
    idom: Vec<usize>,
}

impl LengauerTarjan {
    fn new(count: usize) -> Self {
        Self {
            n: 0,
            dfnum: vec![INVALID; count],
            vertex: vec![INVALID; count],
            parent: vec![INVALID; count],
            ancestor: vec![INVALID; count],
            best: vec![INVALID; count],
            semi: vec![INVALID; count],
            samedom: vec![INVALID; count],
            idom: vec![INVALID; count],
        }
    }

    fn compute(&mut self, function: &Function) {
        if function.block_count() == 0 {
            return;
        }
        debug_assert!(function.block(function.entry()).preds.is_empty());

        self.dfs(function, function.entry().index());
        debug_assert_eq!(self.n, function.live_block_count(), "unreachable blocks in CFG");

        let mut bucket: Vec<Vec<usize>> = vec![Vec::new(); self.dfnum.len()];
        let mut worklist = Vec::new();

        for i in (1..self.n).rev() {
            let n = self.vertex[i];
            let p = self.parent[n];
            let mut s = p;

            for v in &function.block(BlockId::new(n)).preds {
                let v = v.index();
                if self.dfnum[v] == INVALID {
                    continue;
                }
                let ss = if self.dfnum[v] <= self.dfnum[n] {
                    v
                } else {
                    let ancestor = self.ancestor_with_lowest_semi(v, &mut worklist);
                    self.semi[ancestor]
                };
                if self.dfnum[ss] < self.dfnum[s] {
                    s = ss;
                }
            }
            self.semi[n] = s;
            bucket[s].push(n);
            self.link(p, n);

            for v in std::mem::take(&mut bucket[p]) {
                let y = self.ancestor_with_lowest_semi(v, &mut worklist);
                if self.semi[y] == self.semi[v] {
                    self.idom[v] = self.semi[v];
                } else {
                    self.samedom[v] = y;
                }
            }
        }

        for i in 1..self.n {
            let n = self.vertex[i];
            let sdn = self.samedom[n];
            if sdn != INVALID {
                self.idom[n] = self.idom[sdn];
            }
        }
    }

    /// Numbers blocks in depth-first pre-order, following the first successor
    /// directly and deferring the others.
    fn dfs(&mut self, function: &Function, start: usize) {
        let mut worklist: Vec<(usize, usize)> = Vec::new();
        let mut todo = (start, INVALID);

        loop {
            let (node, parent) = todo;
            if self.dfnum[node] == INVALID {
                self.dfnum[node] = self.n;
                self.vertex[self.n] = node;
                self.parent[node] = parent;
                self.n += 1;

                let out = &function.block(BlockId::new(node)).succs;
                for succ in out.iter().skip(1).rev() {
                    worklist.push((succ.index(), node));
                }
                if let Some(first) = out.first() {
                    todo = (first.index(), node);
                    continue;
                }
            }

            match worklist.pop() {
                Some(next) => todo = next,
                None => break,
            }
        }
    }

    /// Evaluates `v` in the link-eval forest with iterative path compression.
    fn ancestor_with_lowest_semi(&mut self, v: usize, worklist: &mut Vec<usize>) -> usize {
        worklist.clear();
        let mut it = v;
        while it != INVALID {
            worklist.push(it);
            it = self.ancestor[it];
        }

        if worklist.len() < 2 {
            return self.best[v];
        }

        let mut b = INVALID;
        let last = worklist[worklist.len() - 1];
        for &bb in worklist[..worklist.len() - 1].iter().rev() {
            self.ancestor[bb] = last;
            let best = self.best[bb];
            if b != INVALID && self.dfnum[self.semi[b]] < self.dfnum[self.semi[best]] {
                self.best[bb] = b;
            } else {
                b = best;
            }
        }
        b
    }

    fn link(&mut self, p: usize, n: usize) {
        self.ancestor[n] = p;
        self.best[n] = n;
    }
}
