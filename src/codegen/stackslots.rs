//! Stack-slot assignment from life-time intervals.
//!
//! Used when no register allocator runs on an SSA function. Values whose
//! intervals do not overlap share a slot, so the frame stays close to the
//! maximum number of simultaneously live values instead of one slot per
//! temp.

use log::debug;
use rustc_hash::FxHashMap;

use crate::{
    analysis::LifeTimeIntervals,
    codegen::MoveMapping,
    ir::{BlockId, Expr, Function, StmtId, StmtKind, Temp, TempKind},
    utils::BitSet,
};

/// Assigns stack slots in one forward walk over the scheduled statements.
///
/// Before each statement, intervals that ended before its use position give
/// their slot back and intervals starting at or before its def position take
/// the lowest free one. Phi targets and the operand arriving on an edge are
/// activated early, when the jump along that edge is reached, and the phis
/// become moves in front of that jump.
pub struct AllocateStackSlots<'a> {
    intervals: &'a LifeTimeIntervals,
    interval_for_temp: FxHashMap<u32, usize>,
    /// Not yet activated, latest start first.
    unhandled: Vec<usize>,
    live: Vec<usize>,
    slot_for_temp: FxHashMap<u32, u32>,
    in_use: BitSet,
    slot_count: u32,
}

impl<'a> AllocateStackSlots<'a> {
    /// Prepares an allocation over `intervals`.
    #[must_use]
    pub fn new(intervals: &'a LifeTimeIntervals) -> Self {
        let all = intervals.intervals();
        let interval_for_temp = all
            .iter()
            .enumerate()
            .map(|(i, lti)| (lti.temp().index, i))
            .collect();
        Self {
            intervals,
            interval_for_temp,
            unhandled: (0..all.len()).rev().collect(),
            live: Vec::new(),
            slot_for_temp: FxHashMap::default(),
            in_use: BitSet::new(32),
            slot_count: 0,
        }
    }

    /// The slot a virtual register was given.
    #[must_use]
    pub fn slot_for(&self, temp: &Temp) -> Option<u32> {
        self.slot_for_temp.get(&temp.index).copied()
    }

    /// Rewrites every virtual register of `function` into its stack slot and
    /// replaces the phis with moves. Returns the number of slots used.
    pub fn run(&mut self, function: &mut Function) -> u32 {
        for block in function.block_ids() {
            for id in function.block(block).statements.clone() {
                self.process(function, block, id);
            }
        }
        for block in function.block_ids() {
            for phi in function.phis(block) {
                function.remove_statement(block, phi);
            }
        }
        debug!(
            "{}: {} stack slots for {} intervals",
            function.name,
            self.slot_count,
            self.intervals.intervals().len()
        );
        self.slot_count
    }

    fn process(&mut self, function: &mut Function, block: BlockId, id: StmtId) {
        if let StmtKind::Jump(target) = function.stmt(id).kind {
            self.resolve_phis(function, block, target);
        }

        // phis have no position; their moves are rewritten when inserted
        let Some(use_position) = self.intervals.position_for_statement(id) else {
            return;
        };
        let def_position = use_position + 1;
        let all: &'a LifeTimeIntervals = self.intervals;
        let intervals = all.intervals();

        let mut i = 0;
        while i < self.live.len() {
            let lti = &intervals[self.live[i]];
            if lti.end() < use_position {
                if let Some(&slot) = self.slot_for_temp.get(&lti.temp().index) {
                    self.in_use.remove(slot as usize);
                }
                self.live.swap_remove(i);
            } else {
                i += 1;
            }
        }

        while let Some(&next) = self.unhandled.last() {
            if intervals[next].start() > def_position {
                break;
            }
            self.unhandled.pop();
            self.activate(next);
        }

        let slots = &self.slot_for_temp;
        function.stmt_mut(id).for_each_temp_mut(&mut |temp| {
            if temp.kind != TempKind::VirtualRegister {
                return;
            }
            debug_assert!(slots.contains_key(&temp.index), "{temp} has no slot");
            if let Some(&slot) = slots.get(&temp.index) {
                *temp = Temp::stack_slot(slot, temp.ty);
            }
        });
    }

    /// Activates every value crossing the edge `block -> target` and inserts
    /// the moves replacing the phis of `target` on that edge.
    fn resolve_phis(&mut self, function: &mut Function, block: BlockId, target: BlockId) {
        let Some(pred_index) = function.block(target).preds.iter().position(|&p| p == block)
        else {
            return;
        };

        let mut moves = MoveMapping::new();
        for phi_id in function.phis(target) {
            let Some(phi) = function.stmt(phi_id).as_phi() else {
                continue;
            };
            let Some(incoming) = phi.incoming.get(pred_index).cloned() else {
                continue;
            };
            let target = phi.target;
            // only the operand flowing along this edge is live at the jump
            self.force_activation(&target);
            if let Some(t) = incoming.as_temp() {
                self.force_activation(t);
            }
            let to = self.rewrite_temp(target);
            moves.add(self.rewrite(incoming), to);
        }
        moves.order();
        moves.insert_moves(function, block);
    }

    fn rewrite_temp(&self, temp: Temp) -> Temp {
        match self.slot_for_temp.get(&temp.index) {
            Some(&slot) if temp.kind == TempKind::VirtualRegister => Temp::stack_slot(slot, temp.ty),
            _ => temp,
        }
    }

    fn rewrite(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Temp(t) => Expr::Temp(self.rewrite_temp(t)),
            other => other,
        }
    }

    fn force_activation(&mut self, temp: &Temp) {
        if self.slot_for_temp.contains_key(&temp.index) {
            return;
        }
        let Some(&index) = self.interval_for_temp.get(&temp.index) else {
            debug_assert!(false, "{temp} has no interval");
            self.allocate(temp.index);
            return;
        };
        if let Some(pos) = self.unhandled.iter().rposition(|&i| i == index) {
            self.unhandled.remove(pos);
        }
        self.activate(index);
    }

    fn activate(&mut self, index: usize) {
        self.live.push(index);
        let temp = self.intervals.intervals()[index].temp();
        self.allocate(temp.index);
    }

    fn allocate(&mut self, temp: u32) {
        if self.slot_for_temp.contains_key(&temp) {
            return;
        }
        let slot = self.in_use.first_clear();
        if slot >= self.in_use.len() {
            self.in_use.grow(slot + 1);
        }
        self.in_use.insert(slot);
        self.slot_for_temp.insert(temp, slot as u32);
        self.slot_count = self.slot_count.max(slot as u32 + 1);
    }
}
