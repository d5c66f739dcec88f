//! Life-time intervals over the scheduled statement order.
//!
//! Statements are numbered once the blocks have their final layout:
//!
//! - phis get no position
//! - every other statement gets the next even number (`last + 2`); that is
//!   where its operands are read, and the value it defines starts one later
//! - a block starts at `last + 1`, just before its first numbered statement,
//!   and ends at the position of its last statement
//!
//! So in
//!
//! ```text
//!  2: %1 = 1
//!  4: %2 = 2
//!  6: %3 = %1 + %2
//!  8: return %3
//! ```
//!
//! the intervals are `%1: [3-6]`, `%2: [5-6]`, `%3: [7-8]`. A result never
//! overlaps the operands feeding it, and a phi target starting at its block's
//! start never overlaps definitions in the predecessors, so the moves that
//! replace phis can go at the end of those predecessors.
//!
//! [`LifeRanges`] computes the intervals with one backward pass per block,
//! blocks in reverse layout order.

use std::fmt;

use log::debug;
use rustc_hash::FxHashMap;

use crate::ir::{BlockId, Function, StmtId, StmtKind, Temp, TempKind};

/// An inclusive span of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First position.
    pub start: u32,
    /// Last position.
    pub end: u32,
}

impl Range {
    /// Creates a range; `start <= end`.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `position` lies in the range.
    #[must_use]
    pub const fn covers(&self, position: u32) -> bool {
        self.start <= position && position <= self.end
    }
}

/// The positions at which one temp holds a live value.
///
/// Ranges are sorted, disjoint and never adjacent: [`add_range`](Self::add_range)
/// coalesces as it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct LifeTimeInterval {
    temp: Temp,
    ranges: Vec<Range>,
    reg: Option<u32>,
    split_from_interval: bool,
}

impl LifeTimeInterval {
    /// An interval with no ranges yet.
    #[must_use]
    pub fn new(temp: Temp) -> Self {
        Self {
            temp,
            ranges: Vec::new(),
            reg: None,
            split_from_interval: false,
        }
    }

    /// The temp this interval belongs to.
    #[must_use]
    pub fn temp(&self) -> Temp {
        self.temp
    }

    /// Replaces the recorded temp, e.g. with the defining occurrence and its type.
    pub fn set_temp(&mut self, temp: Temp) {
        self.temp = temp;
    }

    /// The ranges in position order.
    #[must_use]
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Returns `true` if the interval covers no position.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// First covered position, or 0 for an empty interval.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.ranges.first().map_or(0, |r| r.start)
    }

    /// Last covered position, or 0 for an empty interval.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Register assigned by an allocator.
    #[must_use]
    pub fn reg(&self) -> Option<u32> {
        self.reg
    }

    /// Records the register assigned to this interval.
    pub fn set_reg(&mut self, reg: u32) {
        self.reg = Some(reg);
    }

    /// Returns `true` for the tail half produced by [`split`](Self::split).
    #[must_use]
    pub fn is_split_from_interval(&self) -> bool {
        self.split_from_interval
    }

    /// Moves the start of the interval to the definition at `from`.
    ///
    /// A value that is defined but never read gets the single position `from`.
    pub fn set_from(&mut self, from: u32) {
        match self.ranges.first_mut() {
            Some(first) => first.start = from,
            None => self.ranges.push(Range::new(from, from)),
        }
    }

    /// Adds `[from, to]`, merging with the first range when they overlap or touch.
    ///
    /// Ranges are added walking the blocks backwards, so a new range either
    /// extends the first one or goes in front of it.
    pub fn add_range(&mut self, from: u32, to: u32) {
        debug_assert!(from <= to, "backwards range {from}-{to}");
        let Some(first) = self.ranges.first_mut() else {
            self.ranges.push(Range::new(from, to));
            return;
        };

        if to + 1 >= first.start && first.end + 1 >= from {
            first.start = first.start.min(from);
            first.end = first.end.max(to);
            while self.ranges.len() > 1 {
                let (p, next) = (self.ranges[0], self.ranges[1]);
                if p.end + 1 < next.start || next.end + 1 < p.start {
                    break;
                }
                self.ranges[1] = Range::new(p.start.min(next.start), p.end.max(next.end));
                self.ranges.remove(0);
            }
        } else if to < first.start {
            self.ranges.insert(0, Range::new(from, to));
        } else {
            debug_assert!(from > self.end());
            self.ranges.push(Range::new(from, to));
        }
    }

    /// Returns `true` if some range contains `position`.
    #[must_use]
    pub fn covers(&self, position: u32) -> bool {
        self.ranges.iter().any(|r| r.covers(position))
    }

    /// Returns `true` if both intervals cover a common position.
    #[must_use]
    pub fn overlaps(&self, other: &LifeTimeInterval) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            if a.end < b.start {
                i += 1;
            } else if b.end < a.start {
                j += 1;
            } else {
                return true;
            }
        }
        false
    }

    /// Cuts the interval at `at`.
    ///
    /// `self` keeps everything up to and including `at`. The returned tail
    /// resumes at `new_start`, dropping any ranges before it, or is empty
    /// when `new_start` is `None` (the value is not needed after `at`). An
    /// interval starting after `at` is left alone and the tail is empty.
    pub fn split(&mut self, at: u32, new_start: Option<u32>) -> LifeTimeInterval {
        debug_assert!(new_start.map_or(true, |s| at < s));
        let mut tail = LifeTimeInterval {
            split_from_interval: true,
            ..LifeTimeInterval::new(self.temp)
        };
        if self.ranges.is_empty() || at < self.start() {
            return tail;
        }

        // index of the first range not entirely before `at`
        let cut = self
            .ranges
            .iter()
            .position(|r| r.end >= at)
            .unwrap_or(self.ranges.len());
        let mut rest = self.ranges.split_off(cut);
        if let Some(first) = rest.first() {
            if first.start <= at {
                // `at` is inside this range: it continues in both halves
                self.ranges.push(Range::new(first.start, at));
                if first.end == at {
                    rest.remove(0);
                }
            }
        }

        if let Some(new_start) = new_start {
            rest.retain(|r| r.end >= new_start);
            if let Some(first) = rest.first_mut() {
                first.start = first.start.max(new_start);
            }
            tail.ranges = rest;
        }
        tail
    }
}

impl fmt::Display for LifeTimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ends at {} with ranges ", self.temp, self.end())?;
        if self.ranges.is_empty() {
            f.write_str("(none)")?;
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} - {}", range.start, range.end)?;
        }
        if let Some(reg) = self.reg {
            write!(f, " (register {reg})")?;
        }
        Ok(())
    }
}

/// Statement and block positions of a scheduled function, plus the
/// intervals of its temps sorted by start.
#[derive(Debug, Clone, Default)]
pub struct LifeTimeIntervals {
    block_positions: Vec<Option<Range>>,
    statement_positions: Vec<Option<u32>>,
    last_position: u32,
    intervals: Vec<LifeTimeInterval>,
}

impl LifeTimeIntervals {
    /// Numbers the statements of `function` in block order.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        let mut this = Self {
            block_positions: vec![None; function.block_count()],
            statement_positions: vec![None; function.statement_count()],
            last_position: 0,
            intervals: Vec::new(),
        };
        this.renumber(function);
        this
    }

    fn renumber(&mut self, function: &Function) {
        for block in function.blocks() {
            let start = self.last_position + 1;
            for stmt in function.statements(block.id) {
                if stmt.as_phi().is_some() {
                    continue;
                }
                self.last_position += 2;
                self.statement_positions[stmt.id.index()] = Some(self.last_position);
            }
            self.block_positions[block.id.index()] = Some(Range::new(start, self.last_position));
        }
    }

    /// Use position of a statement; `None` for phis and unplaced statements.
    #[must_use]
    pub fn position_for_statement(&self, stmt: StmtId) -> Option<u32> {
        self.statement_positions.get(stmt.index()).copied().flatten()
    }

    /// Position just before the first statement of `block`.
    #[must_use]
    pub fn start_position(&self, block: BlockId) -> u32 {
        self.block_range(block).start
    }

    /// Position of the last statement of `block`.
    #[must_use]
    pub fn end_position(&self, block: BlockId) -> u32 {
        self.block_range(block).end
    }

    fn block_range(&self, block: BlockId) -> Range {
        let range = self.block_positions.get(block.index()).copied().flatten();
        debug_assert!(range.is_some(), "{block} was not numbered");
        range.unwrap_or(Range::new(0, 0))
    }

    /// Highest position handed out.
    #[must_use]
    pub fn last_position(&self) -> u32 {
        self.last_position
    }

    /// The intervals, ordered by start and then by temp.
    #[must_use]
    pub fn intervals(&self) -> &[LifeTimeInterval] {
        &self.intervals
    }

    /// Takes the intervals out, ordered as in [`intervals`](Self::intervals).
    #[must_use]
    pub fn into_intervals(self) -> Vec<LifeTimeInterval> {
        self.intervals
    }

    /// Adds an interval, keeping the order.
    pub fn add(&mut self, interval: LifeTimeInterval) {
        let key = (interval.start(), interval.temp.index);
        let pos = self
            .intervals
            .partition_point(|i| (i.start(), i.temp.index) <= key);
        self.intervals.insert(pos, interval);
    }
}

/// Computes the life-time interval of every virtual register.
///
/// The function must be in SSA form, free of critical edges and scheduled:
/// block order in the arena is the layout order.
#[derive(Debug)]
pub struct LifeRanges {
    positions: LifeTimeIntervals,
    intervals: Vec<Option<LifeTimeInterval>>,
    live_in: Vec<Vec<Temp>>,
}

impl LifeRanges {
    /// Builds the intervals. `loop_ends` maps each loop header to the last
    /// block of its loop, as returned by the block scheduler.
    #[must_use]
    pub fn new(function: &Function, loop_ends: &FxHashMap<BlockId, BlockId>) -> Self {
        let mut this = Self {
            positions: LifeTimeIntervals::new(function),
            intervals: vec![None; function.temp_count as usize],
            live_in: vec![Vec::new(); function.block_count()],
        };
        let blocks = function.block_ids();
        for &block in blocks.iter().rev() {
            let loop_end = loop_ends.get(&block).copied();
            this.build_intervals(function, block, loop_end);
        }
        debug!(
            "{}: {} positions, {} intervals",
            function.name,
            this.positions.last_position(),
            this.intervals.iter().flatten().count()
        );
        this
    }

    /// Temps live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> &[Temp] {
        &self.live_in[block.index()]
    }

    /// The numbering together with every interval, sorted by start.
    #[must_use]
    pub fn intervals(self) -> LifeTimeIntervals {
        let Self {
            mut positions,
            intervals,
            ..
        } = self;
        let mut sorted: Vec<LifeTimeInterval> = intervals.into_iter().flatten().collect();
        sorted.sort_by_key(|i| (i.start(), i.temp.index));
        positions.intervals = sorted;
        positions
    }

    fn interval(&mut self, temp: &Temp) -> &mut LifeTimeInterval {
        debug_assert_eq!(temp.kind, TempKind::VirtualRegister);
        let index = temp.index as usize;
        if index >= self.intervals.len() {
            self.intervals.resize(index + 1, None);
        }
        self.intervals[index].get_or_insert_with(|| LifeTimeInterval::new(*temp))
    }

    fn use_position(&self, stmt: StmtId) -> u32 {
        let position = self.positions.position_for_statement(stmt);
        debug_assert!(position.is_some(), "{stmt} has no position");
        position.unwrap_or(0)
    }

    fn build_intervals(&mut self, function: &Function, block: BlockId, loop_end: Option<BlockId>) {
        let bb = function.block(block);
        let mut live: Vec<Temp> = Vec::new();
        let insert = |live: &mut Vec<Temp>, temp: Temp| {
            if !live.contains(&temp) {
                live.push(temp);
            }
        };

        for &succ in &bb.succs {
            for &temp in &self.live_in[succ.index()] {
                insert(&mut live, temp);
            }
            let Some(pred_index) = function.block(succ).preds.iter().position(|&p| p == block)
            else {
                continue;
            };
            for stmt in function.statements(succ) {
                let Some(phi) = stmt.as_phi() else {
                    break;
                };
                if let Some(temp) = phi.incoming.get(pred_index).and_then(|e| e.as_temp()) {
                    self.interval(temp);
                    insert(&mut live, *temp);
                }
            }
        }

        let (start, end) = (
            self.positions.start_position(block),
            self.positions.end_position(block),
        );
        for temp in &live {
            self.interval(temp).add_range(start, end);
        }

        for stmt in function.statements(block).collect::<Vec<_>>().into_iter().rev() {
            if let StmtKind::Phi(phi) = &stmt.kind {
                let target = phi.target;
                match live.iter().position(|t| *t == target) {
                    Some(pos) => {
                        live.remove(pos);
                    }
                    // defined but never read
                    None => self.interval(&target).set_from(start),
                }
                self.interval(&target).set_temp(target);
                continue;
            }

            let use_position = self.use_position(stmt.id);
            if let Some(output) = stmt.def_temp() {
                let interval = self.interval(&output);
                interval.set_from(use_position + 1);
                interval.set_temp(output);
                live.retain(|t| *t != output);
            }
            stmt.for_each_use(&mut |input| {
                self.interval(input).add_range(start, use_position);
                insert(&mut live, *input);
            });
        }

        if let Some(loop_end) = loop_end {
            if let Some(terminator) = function.terminator(loop_end) {
                let back_edge = self.use_position(terminator);
                for temp in &live {
                    self.interval(temp).add_range(start, back_edge);
                }
            }
        }

        self.live_in[block.index()] = live;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::LoopDetection,
        compiler::schedule_blocks,
        ir::Expr,
        test::{cfg, sum_loop, to_ssa},
    };

    fn interval(ranges: &[(u32, u32)]) -> LifeTimeInterval {
        let mut lti = LifeTimeInterval::new(Temp::virtual_reg(0));
        for &(from, to) in ranges.iter().rev() {
            lti.add_range(from, to);
        }
        lti
    }

    #[test]
    fn test_add_range_coalesces() {
        let mut lti = LifeTimeInterval::new(Temp::virtual_reg(0));
        lti.add_range(10, 12);
        lti.add_range(1, 4);
        assert_eq!(lti.ranges(), &[Range::new(1, 4), Range::new(10, 12)]);

        // fills the hole exactly: 5..=9 touches both neighbours
        lti.add_range(5, 9);
        assert_eq!(lti.ranges(), &[Range::new(1, 12)]);
        assert_eq!((lti.start(), lti.end()), (1, 12));

        lti.add_range(3, 6);
        assert_eq!(lti.ranges(), &[Range::new(1, 12)]);
    }

    #[test]
    fn test_set_from_without_uses() {
        let mut lti = LifeTimeInterval::new(Temp::virtual_reg(4));
        lti.set_from(7);
        assert_eq!(lti.ranges(), &[Range::new(7, 7)]);
        assert_eq!(lti.end(), 7);

        lti.add_range(7, 10);
        lti.set_from(9);
        assert_eq!(lti.ranges(), &[Range::new(9, 10)]);
    }

    #[test]
    fn test_split_inside_and_between_ranges() {
        let mut lti = interval(&[(1, 10), (20, 30)]);
        let tail = lti.split(5, Some(22));
        assert_eq!(lti.ranges(), &[Range::new(1, 5)]);
        assert_eq!(tail.ranges(), &[Range::new(22, 30)]);
        assert!(tail.is_split_from_interval());
        assert!(!lti.overlaps(&tail));

        let mut lti = interval(&[(1, 10), (20, 30)]);
        let tail = lti.split(15, None);
        assert_eq!(lti.ranges(), &[Range::new(1, 10)]);
        assert!(tail.is_empty());

        let mut lti = interval(&[(8, 10)]);
        assert!(lti.split(3, Some(9)).is_empty());
        assert_eq!(lti.ranges(), &[Range::new(8, 10)]);
    }

    #[test]
    fn test_overlaps() {
        let a = interval(&[(1, 4), (10, 12)]);
        assert!(a.overlaps(&interval(&[(12, 20)])));
        assert!(!a.overlaps(&interval(&[(5, 9)])));
        assert!(!a.overlaps(&interval(&[(13, 14)])));
        assert!(a.covers(11) && !a.covers(7));
    }

    #[test]
    fn test_numbering() {
        // L0 -> L1 -> L2, one statement each
        let f = cfg(3, &[(0, 1), (1, 2)]);
        let positions = LifeTimeIntervals::new(&f);
        for (block, (start, end)) in [(1, 2), (3, 4), (5, 6)].into_iter().enumerate() {
            let id = BlockId::new(block);
            assert_eq!(positions.start_position(id), start);
            assert_eq!(positions.end_position(id), end);
            let terminator = f.terminator(id).unwrap();
            assert_eq!(positions.position_for_statement(terminator), Some(end));
        }
        assert_eq!(positions.last_position(), 6);
    }

    #[test]
    fn test_loop_values_live_across_back_edge() {
        //  L0 -> L1 -> {L2, L3}; L2 -> L1
        let mut f = sum_loop();
        let (dt, _) = to_ssa(&mut f);
        LoopDetection::run(&mut f, &dt);
        let loop_ends = schedule_blocks(&mut f, &dt);
        assert_eq!(loop_ends.get(&BlockId::new(1)), Some(&BlockId::new(2)));

        let ranges = LifeRanges::new(&f, &loop_ends);
        let header = BlockId::new(1);
        assert_eq!(ranges.live_in(BlockId::new(0)), &[] as &[Temp]);

        // the bound is read in the header only, yet stays live through the body
        let cond = f.terminator(header).map(|t| f.stmt(t).kind.clone());
        let Some(StmtKind::CJump(cj)) = cond else {
            panic!("header does not end in a branch");
        };
        let Expr::Binop { right, .. } = &cj.cond else {
            panic!("unexpected condition {}", cj.cond);
        };
        let bound = *right.as_temp().unwrap();
        assert!(ranges.live_in(header).contains(&bound));

        let intervals = ranges.intervals();
        let latch_jump = f.terminator(BlockId::new(2)).unwrap();
        let latch_position = intervals.position_for_statement(latch_jump).unwrap();
        let lti = intervals
            .intervals()
            .iter()
            .find(|i| i.temp() == bound)
            .unwrap();
        assert!(lti.covers(latch_position));

        let mut previous = 0;
        for lti in intervals.intervals() {
            assert!(lti.start() >= previous, "intervals out of order");
            previous = lti.start();
            for pair in lti.ranges().windows(2) {
                assert!(pair[0].end + 1 < pair[1].start, "{lti}");
            }
        }
    }
}
