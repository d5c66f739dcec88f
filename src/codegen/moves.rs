//! Sequentialization of parallel copies.
//!
//! The phis of a block read all their incoming values at the same instant.
//! Replacing them with moves at the end of a predecessor needs an order in
//! which no move overwrites a location another move still has to read.
//!
//! A move depends on every move reading its destination: those must run
//! first. Since each location is written by at most one move, following
//! dependencies either ends at moves nobody depends on, or comes back to a
//! move already being scheduled. The second case is a cycle, which is broken
//! by turning the moves along it into swaps and dropping the move that closed
//! it: after the swaps its value is already in place.

use std::fmt;

use log::trace;

use crate::ir::{BlockId, Expr, Function, Move, StmtKind, Temp, TempKind};

/// Returns `true` if both temps name the same storage.
///
/// Registers of the general and floating-point banks never overlap, even
/// with equal indices.
#[must_use]
pub fn overlapping_storage(a: &Temp, b: &Temp) -> bool {
    if a.kind != b.kind || a.index != b.index {
        return false;
    }
    a.kind != TempKind::PhysicalRegister || a.is_fp() == b.is_fp()
}

#[derive(Debug, Clone)]
struct ParallelMove {
    from: Expr,
    to: Temp,
    swap: bool,
}

impl ParallelMove {
    fn reads(&self, location: &Temp) -> bool {
        self.from
            .as_temp()
            .is_some_and(|from| overlapping_storage(from, location))
    }

    /// Same destination storage and same source, registers compared by bank.
    fn duplicates(&self, other: &ParallelMove) -> bool {
        if !overlapping_storage(&self.to, &other.to) {
            return false;
        }
        match (self.from.as_temp(), other.from.as_temp()) {
            (Some(a), Some(b)) => overlapping_storage(a, b),
            (None, None) => self.from == other.from,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    NormalMove,
    NeedsSwap,
}

/// A set of moves that take effect simultaneously.
#[derive(Debug, Clone, Default)]
pub struct MoveMapping {
    moves: Vec<ParallelMove>,
}

impl MoveMapping {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if there is nothing to move.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Number of moves, swaps included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Adds `to = from`. Moves within one storage location and duplicates
    /// are dropped.
    pub fn add(&mut self, from: Expr, to: Temp) {
        if from.as_temp().is_some_and(|t| overlapping_storage(t, &to)) {
            return;
        }
        let candidate = ParallelMove {
            from,
            to,
            swap: false,
        };
        if self.moves.iter().any(|m| m.duplicates(&candidate)) {
            return;
        }
        debug_assert!(
            !self
                .moves
                .iter()
                .any(|m| overlapping_storage(&m.to, &candidate.to)),
            "{} is written twice",
            candidate.to
        );
        self.moves.push(candidate);
    }

    /// Puts the moves into an order that can run one after another.
    ///
    /// Plain moves come first, swaps last.
    pub fn order(&mut self) {
        let mut todo = std::mem::take(&mut self.moves);
        let mut delayed = Vec::new();
        let mut output = Vec::with_capacity(todo.len());
        let mut swaps = Vec::new();

        while !todo.is_empty() {
            let next = todo.remove(0);
            Self::schedule(next, &mut todo, &mut delayed, &mut output, &mut swaps);
        }
        debug_assert!(delayed.is_empty());

        output.extend(swaps);
        self.moves = output;
    }

    fn schedule(
        m: ParallelMove,
        todo: &mut Vec<ParallelMove>,
        delayed: &mut Vec<ParallelMove>,
        output: &mut Vec<ParallelMove>,
        swaps: &mut Vec<ParallelMove>,
    ) -> Action {
        let closes_cycle = delayed.iter().any(|d| d.reads(&m.to));
        let mut in_cycle = false;

        delayed.push(m.clone());
        while let Some(pos) = todo.iter().position(|d| d.reads(&m.to)) {
            let dependency = todo.remove(pos);
            if Self::schedule(dependency, todo, delayed, output, swaps) == Action::NeedsSwap {
                in_cycle = true;
            }
        }
        delayed.pop();

        if closes_cycle {
            return Action::NeedsSwap;
        }
        if in_cycle {
            swaps.push(ParallelMove { swap: true, ..m });
            return Action::NeedsSwap;
        }
        output.push(m);
        Action::NormalMove
    }

    /// Inserts the moves, in their current order, before the terminator of `block`.
    pub fn insert_moves(&self, function: &mut Function, block: BlockId) {
        for m in &self.moves {
            trace!("{}: {block}: {m}", function.name);
            function.insert_before_terminator(
                block,
                StmtKind::Move(Move {
                    target: Expr::Temp(m.to),
                    source: m.from.clone(),
                    swap: m.swap,
                }),
            );
        }
    }
}

impl fmt::Display for ParallelMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.swap { "<=>" } else { "<-" };
        write!(f, "{} {arrow} {}", self.to, self.from)
    }
}

impl fmt::Display for MoveMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.moves.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::ir::{Const, Type};

    fn reg(index: u32) -> Temp {
        Temp::physical(index, Type::SINT32)
    }

    /// Runs the ordered moves over registers initialised with their own index.
    fn run(mapping: &MoveMapping) -> FxHashMap<Temp, f64> {
        let mut state: FxHashMap<Temp, f64> = (0..8).map(|i| (reg(i), f64::from(i))).collect();
        for m in &mapping.moves {
            match (&m.from, m.swap) {
                (Expr::Temp(from), true) => {
                    let (a, b) = (state[from], state[&m.to]);
                    state.insert(*from, b);
                    state.insert(m.to, a);
                }
                (Expr::Temp(from), false) => {
                    let value = state[from];
                    state.insert(m.to, value);
                }
                (Expr::Const(c), false) => {
                    state.insert(m.to, c.value);
                }
                (other, _) => panic!("unexpected move source {other}"),
            }
        }
        state
    }

    #[test]
    fn test_two_cycle_becomes_swap() {
        let mut mapping = MoveMapping::new();
        mapping.add(reg(2).into(), reg(1));
        mapping.add(reg(1).into(), reg(2));
        mapping.order();

        assert_eq!(mapping.len(), 1);
        assert!(mapping.moves[0].swap);
        let state = run(&mapping);
        assert_eq!(state[&reg(1)], 2.0);
        assert_eq!(state[&reg(2)], 1.0);
    }

    #[test]
    fn test_three_cycle_with_tails() {
        // r1 <- r2, r2 <- r3, r3 <- r1 rotate; r4 and r5 copy out of the
        // cycle and r6 takes a constant
        let mut mapping = MoveMapping::new();
        mapping.add(reg(2).into(), reg(1));
        mapping.add(reg(3).into(), reg(2));
        mapping.add(reg(1).into(), reg(3));
        mapping.add(reg(1).into(), reg(4));
        mapping.add(reg(4).into(), reg(5));
        mapping.add(Const::int32(42).into(), reg(6));
        mapping.order();

        let state = run(&mapping);
        assert_eq!(state[&reg(1)], 2.0);
        assert_eq!(state[&reg(2)], 3.0);
        assert_eq!(state[&reg(3)], 1.0);
        assert_eq!(state[&reg(4)], 1.0);
        assert_eq!(state[&reg(5)], 4.0);
        assert_eq!(state[&reg(6)], 42.0);
        assert_eq!(mapping.moves.iter().filter(|m| m.swap).count(), 2);
    }

    #[test]
    fn test_chain_is_ordered_without_swaps() {
        // r3 <- r2 must run before r2 <- r1
        let mut mapping = MoveMapping::new();
        mapping.add(reg(1).into(), reg(2));
        mapping.add(reg(2).into(), reg(3));
        mapping.order();

        assert!(mapping.moves.iter().all(|m| !m.swap));
        let state = run(&mapping);
        assert_eq!(state[&reg(2)], 1.0);
        assert_eq!(state[&reg(3)], 2.0);
    }

    #[test]
    fn test_same_storage_is_dropped() {
        let mut mapping = MoveMapping::new();
        mapping.add(Temp::stack_slot(3, Type::VAR).into(), Temp::stack_slot(3, Type::DOUBLE));
        mapping.add(reg(1).into(), reg(2));
        mapping.add(reg(1).into(), reg(2));
        assert_eq!(mapping.len(), 1);

        // general and floating-point registers with the same index differ
        assert!(!overlapping_storage(
            &Temp::physical(0, Type::DOUBLE),
            &Temp::physical(0, Type::SINT32)
        ));
        mapping.add(Temp::physical(0, Type::DOUBLE).into(), Temp::physical(0, Type::BOOL));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_gp_and_fp_moves_with_equal_indices_are_kept() {
        let (fr1, fr2) = (Temp::physical(1, Type::DOUBLE), Temp::physical(2, Type::DOUBLE));
        let mut mapping = MoveMapping::new();
        mapping.add(fr1.into(), fr2);
        mapping.add(reg(1).into(), reg(2));
        mapping.add(fr1.into(), fr2);
        assert_eq!(mapping.len(), 2);

        mapping.order();
        assert!(mapping.moves.iter().all(|m| !m.swap));
        assert!(mapping.moves.iter().any(|m| m.to.is_fp()));
        assert!(mapping.moves.iter().any(|m| !m.to.is_fp()));
    }
}
