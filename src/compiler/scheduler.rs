//! Block scheduling.
//!
//! Lays the blocks of a function out in the order code is generated. The
//! order keeps loop bodies contiguous and follows successors depth-first, so
//! that life-time intervals have few holes and most jumps fall through.
//!
//! A block becomes ready once every incoming edge is scheduled or is a back
//! edge. Entering a loop header suspends the surrounding work: the whole
//! loop, nested loops included, is emitted before anything outside it.
//! Pending successors are kept on one stack per loop nesting level.

use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::{
    analysis::DominatorTree,
    ir::{BlockId, Function},
    utils::BitSet,
};

/// Pending blocks of one loop level; `group` is `None` outside all loops.
#[derive(Debug, Default)]
struct WorkForGroup {
    group: Option<BlockId>,
    postponed: Vec<BlockId>,
}

impl WorkForGroup {
    fn new(group: Option<BlockId>) -> Self {
        Self {
            group,
            postponed: Vec::new(),
        }
    }
}

/// Computes the code layout order of a function's blocks.
///
/// Loop membership must have been recorded by
/// [`LoopDetection`](crate::analysis::LoopDetection) (and kept current by the
/// CFG passes since).
pub struct BlockScheduler<'a> {
    function: &'a Function,
    dominators: &'a DominatorTree,
    current: WorkForGroup,
    postponed_groups: Vec<WorkForGroup>,
    sequence: Vec<BlockId>,
    emitted: BitSet,
    loop_ends: FxHashMap<BlockId, BlockId>,
}

impl<'a> BlockScheduler<'a> {
    /// Creates a scheduler over the current block graph.
    #[must_use]
    pub fn new(function: &'a Function, dominators: &'a DominatorTree) -> Self {
        Self {
            function,
            dominators,
            current: WorkForGroup::default(),
            postponed_groups: Vec::new(),
            sequence: Vec::with_capacity(function.live_block_count()),
            emitted: BitSet::new(function.block_count()),
            loop_ends: FxHashMap::default(),
        }
    }

    /// Returns the block order and, for every loop header, the last block of
    /// its loop in that order.
    #[must_use]
    pub fn schedule(mut self) -> (Vec<BlockId>, FxHashMap<BlockId, BlockId>) {
        let mut next = Some(self.function.entry());
        while let Some(block) = next {
            self.emit(block);
            for &succ in self.function.block(block).succs.iter().rev() {
                if !self.emitted.contains(succ.index()) {
                    self.postpone(succ);
                }
            }
            next = self.pick_next();
        }

        if self.sequence.len() != self.function.live_block_count() {
            warn!(
                "{}: {} blocks left unscheduled, appending them in block order",
                self.function.name,
                self.function.live_block_count() - self.sequence.len()
            );
            for block in self.function.block_ids() {
                self.emit(block);
            }
        }
        (self.sequence, self.loop_ends)
    }

    fn emit(&mut self, block: BlockId) {
        debug_assert!(!self.function.block(block).removed);
        if self.emitted.contains(block.index()) {
            return;
        }
        self.sequence.push(block);
        self.emitted.insert(block.index());
    }

    fn postpone(&mut self, block: BlockId) {
        let group = self.function.block(block).containing_group;
        if self.current.group == group {
            self.current.postponed.push(block);
            return;
        }
        if let Some(work) = self
            .postponed_groups
            .iter_mut()
            .rev()
            .find(|work| work.group == group)
        {
            work.postponed.push(block);
            return;
        }
        debug_assert!(false, "{block} belongs to no open loop");
    }

    fn pick_next(&mut self) -> Option<BlockId> {
        loop {
            while self.current.postponed.is_empty() {
                let outer = self.postponed_groups.pop()?;
                if let (Some(header), Some(&last)) = (self.current.group, self.sequence.last()) {
                    self.loop_ends.insert(header, last);
                }
                self.current = outer;
            }
            let Some(next) = self.current.postponed.pop() else {
                continue;
            };
            if !self.emitted.contains(next.index()) && self.check_candidate(next) {
                return Some(next);
            }
        }
    }

    /// A block is ready when each predecessor is emitted, is itself, or is
    /// dominated by it (a back edge). A ready loop header opens its loop.
    fn check_candidate(&mut self, candidate: BlockId) -> bool {
        let block = self.function.block(candidate);
        let ready = block.preds.iter().all(|&pred| {
            self.emitted.contains(pred.index())
                || pred == candidate
                || self.dominators.dominates(candidate, pred)
        });
        if !ready {
            return false;
        }
        if block.group_start {
            let outer = std::mem::replace(&mut self.current, WorkForGroup::new(Some(candidate)));
            self.postponed_groups.push(outer);
        }
        true
    }
}

/// Schedules the blocks of `function` and renumbers them into that order.
///
/// Returns the last block of every loop keyed by its header, both in the new
/// numbering. The dominator tree and def-use block records still use the
/// old numbering afterwards.
pub fn schedule_blocks(
    function: &mut Function,
    dominators: &DominatorTree,
) -> FxHashMap<BlockId, BlockId> {
    let (order, loop_ends) = BlockScheduler::new(function, dominators).schedule();
    let remap = function.renumber_blocks(&order);
    let new_id = |id: BlockId| remap[id.index()].unwrap_or(id);
    debug!(
        "{}: scheduled {} blocks, {} loops",
        function.name,
        order.len(),
        loop_ends.len()
    );
    loop_ends
        .into_iter()
        .map(|(header, last)| (new_id(header), new_id(last)))
        .collect()
}
