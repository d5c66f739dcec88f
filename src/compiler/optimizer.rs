//! The SSA rewrite loop.
//!
//! [`optimize_ssa`] drains the [`StatementWorklist`] to a fixed point,
//! applying local rewrites to each statement and re-enqueueing whatever a
//! rewrite may have enabled:
//!
//! | statement | rewrite |
//! |-----------|---------|
//! | phi without uses | removed |
//! | phi over one constant | constant propagated, phi removed |
//! | phi with one operand | operand propagated, phi removed |
//! | move of a constant conversion | conversion folded |
//! | move without uses | removed, or kept as an expression statement if its source has effects |
//! | move of a constant or a temp | propagated into every use, move removed |
//! | move of an operator | folded or simplified ([`fold::simplify`](super::fold::simplify)) |
//! | branch on a constant | turned into a jump; the untaken edge is unlinked and unreachable blocks purged |
//! | branch on a constant comparison | comparison folded |
//!
//! Every rewrite goes through [`DefUses`], so def-use chains stay exact and
//! "no uses" can be trusted for dead-code elimination. Every rewrite either
//! removes a statement or replaces an operand by a strictly simpler one, so
//! the loop terminates.

use std::collections::VecDeque;

use log::debug;

use crate::{
    analysis::{has_side_effects, types::convert_const, DefUses, DominatorTree},
    compiler::{
        fold::{self, same_const},
        StatementWorklist,
    },
    ir::{BlockId, Const, Expr, Function, StmtId, StmtKind, Temp},
    utils::BitSet,
};

/// Runs the worklist-driven SSA optimizations. Returns the number of rewrites.
///
/// The function must be in SSA form without critical-edge splitting having
/// run yet; the dominator tree is kept current as blocks are purged.
pub fn optimize_ssa(
    function: &mut Function,
    def_uses: &mut DefUses,
    dominators: &mut DominatorTree,
    worklist: &mut StatementWorklist,
) -> usize {
    let mut optimizer = SsaOptimizer {
        function,
        def_uses,
        dominators,
        worklist,
        rewrites: 0,
        purged: 0,
    };
    optimizer.run();
    let SsaOptimizer {
        function,
        rewrites,
        purged,
        ..
    } = optimizer;
    debug!(
        "{}: {rewrites} SSA rewrites, {purged} blocks purged",
        function.name
    );
    rewrites
}

struct SsaOptimizer<'a> {
    function: &'a mut Function,
    def_uses: &'a mut DefUses,
    dominators: &'a mut DominatorTree,
    worklist: &'a mut StatementWorklist,
    rewrites: usize,
    purged: usize,
}

impl SsaOptimizer<'_> {
    fn run(&mut self) {
        let mut last = None;
        while let Some(id) = self.worklist.take_next(last) {
            last = Some(id);
            let changed = match self.function.stmt(id).kind.clone() {
                StmtKind::Phi(phi) => self.visit_phi(id, phi.target, &phi.incoming),
                StmtKind::Move(m) => match m.target {
                    Expr::Temp(target) if !m.swap => self.visit_move(id, target, m.source),
                    _ => false,
                },
                StmtKind::CJump(cj) => self.visit_cjump(id, cj.cond, cj.iftrue, cj.iffalse),
                StmtKind::Exp(_) | StmtKind::Jump(_) | StmtKind::Ret(_) => false,
            };
            if changed {
                self.rewrites += 1;
            }
        }
        self.worklist.apply_to_function(self.function);
    }

    fn visit_phi(&mut self, id: StmtId, target: Temp, incoming: &[Expr]) -> bool {
        if self.def_uses.use_count(&target) == 0 {
            self.remove(id);
            return true;
        }

        if let Some(c) = const_phi(incoming) {
            self.propagate(id, target, &Expr::Const(c));
            return true;
        }

        if let [single] = incoming {
            if single.as_temp() == Some(&target) {
                return false;
            }
            self.propagate(id, target, single);
            return true;
        }
        false
    }

    fn visit_move(&mut self, id: StmtId, target: Temp, source: Expr) -> bool {
        if let Expr::Convert { expr, ty } = &source {
            match &**expr {
                Expr::Const(c) => {
                    let mut c = *c;
                    convert_const(&mut c, *ty);
                    self.set_source(id, Expr::Const(c));
                    return true;
                }
                Expr::Temp(t) if t.ty == *ty => {
                    self.set_source(id, Expr::Temp(*t));
                    return true;
                }
                _ => {}
            }
        }

        if self.def_uses.use_count(&target) == 0 {
            self.eliminate_dead_move(id, source);
            return true;
        }

        match source {
            Expr::Const(_) | Expr::Temp(_) => {
                self.propagate(id, target, &source);
                true
            }
            Expr::Unop { .. } | Expr::Binop { .. } => {
                let mut simplified = source;
                if fold::simplify(&mut simplified) || fold::try_optimizing_comparison(&mut simplified)
                {
                    self.set_source(id, simplified);
                    return true;
                }
                // shift counts may have been masked in place
                self.write_source(id, simplified);
                false
            }
            _ => false,
        }
    }

    fn visit_cjump(&mut self, id: StmtId, cond: Expr, iftrue: BlockId, iffalse: BlockId) -> bool {
        match cond {
            Expr::Const(c) => {
                let Some(block) = self.block_of_terminator(id) else {
                    return false;
                };
                let (taken, untaken) = if fold::const_to_bool(&c) {
                    (iftrue, iffalse)
                } else {
                    (iffalse, iftrue)
                };
                self.function.stmt_mut(id).kind = StmtKind::Jump(taken);
                self.unlink(block, untaken);
                true
            }
            mut cond @ Expr::Binop { .. } => {
                if !fold::try_optimizing_comparison(&mut cond) {
                    return false;
                }
                if let StmtKind::CJump(cj) = &mut self.function.stmt_mut(id).kind {
                    cj.cond = cond;
                }
                self.def_uses.refresh_uses(self.function.stmt(id));
                self.worklist.push(id);
                true
            }
            _ => false,
        }
    }

    /// Replaces the source of move `id`, updates its uses and revisits it.
    fn set_source(&mut self, id: StmtId, source: Expr) {
        self.write_source(id, source);
        let producers: Vec<StmtId> = self
            .def_uses
            .used_vars(id)
            .iter()
            .filter_map(|t| self.def_uses.def_stmt(t))
            .collect();
        self.def_uses.refresh_uses(self.function.stmt(id));
        // operands that dropped out may have lost their last use
        self.worklist.push_all(producers);
        self.worklist.push(id);
    }

    fn write_source(&mut self, id: StmtId, source: Expr) {
        if let StmtKind::Move(m) = &mut self.function.stmt_mut(id).kind {
            m.source = source;
        }
    }

    /// Drops a move whose target is never read. A source with side effects
    /// is still evaluated, as an expression statement.
    fn eliminate_dead_move(&mut self, id: StmtId, source: Expr) {
        if has_side_effects(&source) {
            self.def_uses.remove_def_uses(self.function.stmt(id));
            self.function.stmt_mut(id).kind = StmtKind::Exp(source);
            self.def_uses.refresh_uses(self.function.stmt(id));
        } else {
            self.remove(id);
        }
    }

    /// Removes statement `id` with its def and uses, revisiting the producers
    /// of its operands.
    fn remove(&mut self, id: StmtId) {
        let producers = self.def_uses.remove_def_uses(self.function.stmt(id));
        self.worklist.push_all(producers);
        self.worklist.remove(id);
    }

    /// Rewrites every read of `temp` to `replacement`, then removes its
    /// definition `id`.
    fn propagate(&mut self, id: StmtId, temp: Temp, replacement: &Expr) {
        let uses: Vec<StmtId> = self
            .def_uses
            .uses(&temp)
            .iter()
            .copied()
            .filter(|&u| u != id)
            .collect();
        self.remove(id);
        for use_id in uses {
            self.function.stmt_mut(use_id).replace_use(&temp, replacement);
            self.def_uses.refresh_uses(self.function.stmt(use_id));
            self.worklist.push(use_id);
        }
    }

    fn block_of_terminator(&self, id: StmtId) -> Option<BlockId> {
        self.function
            .blocks()
            .find(|b| b.statements.last() == Some(&id))
            .map(|b| b.id)
    }

    /// Removes one `from -> to` edge, purging whatever became unreachable.
    ///
    /// Exception handlers are never purged; they are entered from the
    /// runtime, not only through their recorded edges.
    fn unlink(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.function.block_mut(from).succs;
        if let Some(pos) = succs.iter().position(|&s| s == to) {
            succs.remove(pos);
        }
        self.remove_incoming_edge(from, to);

        let mut siblings = BitSet::new(self.function.block_count());
        if self.is_reachable(to) {
            self.dominators
                .collect_siblings(self.function, to, &mut siblings);
        } else {
            let mut queue = VecDeque::from([to]);
            while let Some(block) = queue.pop_front() {
                if self.function.block(block).removed {
                    continue;
                }
                for pred in self.function.block(block).preds.clone() {
                    self.function.block_mut(pred).succs.retain(|&s| s != block);
                }
                for succ in self.function.block(block).succs.clone() {
                    if self.function.block(succ).removed {
                        continue;
                    }
                    self.remove_incoming_edge(block, succ);
                    if self.is_reachable(succ) {
                        self.dominators
                            .collect_siblings(self.function, succ, &mut siblings);
                    } else {
                        queue.push_back(succ);
                    }
                }
                for stmt in self.function.block(block).statements.clone() {
                    self.remove(stmt);
                }
                siblings.remove(block.index());
                self.dominators.set_immediate_dominator(block, None);
                self.function.remove_block(block);
                self.purged += 1;
            }
        }
        self.dominators
            .recalculate_idoms(self.function, &siblings, None);
    }

    /// Drops `from` from the predecessors of `to` together with the matching
    /// phi operands.
    fn remove_incoming_edge(&mut self, from: BlockId, to: BlockId) {
        let Some(index) = self.function.block(to).preds.iter().position(|&p| p == from) else {
            return;
        };
        self.function.block_mut(to).preds.remove(index);
        for (phi, operand) in self.function.remove_phi_operands(to, index) {
            if self.worklist.is_removed(phi) {
                continue;
            }
            operand.for_each_temp(&mut |t| {
                if let Some(def) = self.def_uses.def_stmt(t) {
                    self.worklist.push(def);
                }
            });
            self.def_uses.refresh_uses(self.function.stmt(phi));
            self.worklist.push(phi);
        }
    }

    /// A block stays reachable while it has a live predecessor that it does
    /// not dominate. Handlers always count as reachable.
    fn is_reachable(&self, block: BlockId) -> bool {
        let b = self.function.block(block);
        b.is_exception_handler
            || b.preds.iter().any(|&pred| {
                !self.function.block(pred).removed && !self.dominators.dominates_or_equal(block, pred)
            })
    }
}

/// The constant every operand of a phi agrees on.
fn const_phi(incoming: &[Expr]) -> Option<Const> {
    let (first, rest) = incoming.split_first()?;
    let first = *first.as_const()?;
    rest.iter()
        .all(|e| e.as_const().is_some_and(|c| same_const(&first, c)))
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::verify_ssa,
        ir::{AluOp, FunctionBuilder, Type},
        test::to_ssa,
    };

    fn optimize(f: &mut Function) -> (DominatorTree, DefUses) {
        let (mut dt, mut du) = to_ssa(f);
        let mut worklist = StatementWorklist::new(f);
        optimize_ssa(f, &mut du, &mut dt, &mut worklist);
        (dt, du)
    }

    /// Every recorded use belongs to a statement still placed in a block.
    fn assert_no_dangling_uses(f: &Function, du: &DefUses) {
        let placed: Vec<StmtId> = f.blocks().flat_map(|b| b.statements.clone()).collect();
        for temp in du.temps() {
            for u in du.uses(&temp) {
                assert!(placed.contains(u), "{temp} used by removed statement {u}");
            }
        }
    }

    #[test]
    fn test_dead_code_round_trip() {
        // t0 = 1; t1 = t0 + 2; return 0
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let (t0, t1) = (b.temp(), b.temp());
        b.mov(t0, Expr::int(1));
        b.mov(t1, Expr::binop(AluOp::Add, t0.into(), Expr::int(2)));
        b.ret(Expr::int(0));
        let mut f = b.finish().unwrap();

        let (_, du) = optimize(&mut f);
        assert_eq!(f.block(f.entry()).statements.len(), 1);
        assert_eq!(du.use_count(&Temp::virtual_reg(0)), 0);
        assert!(du.defs().is_empty());
        assert_no_dangling_uses(&f, &du);
    }

    #[test]
    fn test_dead_call_is_kept_for_its_effect() {
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let (t0, t1) = (b.temp(), b.temp());
        b.mov(t0, Expr::int(1));
        b.mov(t1, Expr::call(Expr::name("g"), vec![t0.into()]));
        b.ret(Expr::undefined());
        let mut f = b.finish().unwrap();

        let (_, du) = optimize(&mut f);
        let first = f.statements(f.entry()).next().unwrap();
        assert!(matches!(&first.kind, StmtKind::Exp(Expr::Call { args, .. }) if args[0] == Expr::int(1)));
        assert_no_dangling_uses(&f, &du);
    }

    #[test]
    fn test_constant_folding_reaches_return() {
        // a = 1.5; b = a * 2; c = ~0; return b + c
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let (ta, tb, tc, td) = (b.temp(), b.temp(), b.temp(), b.temp());
        b.mov(ta, Expr::number(1.5));
        b.mov(tb, Expr::binop(AluOp::Mul, ta.into(), Expr::int(2)));
        b.mov(tc, Expr::unop(AluOp::Compl, Expr::int(0)));
        b.mov(td, Expr::binop(AluOp::Add, tb.into(), tc.into()));
        b.ret(td.into());
        let mut f = b.finish().unwrap();

        let (_, du) = optimize(&mut f);
        let ret = f.stmt(f.terminator(f.entry()).unwrap());
        match &ret.kind {
            StmtKind::Ret(Expr::Const(c)) => {
                assert_eq!(c.value, 2.0);
                assert_eq!(c.ty, Type::DOUBLE);
            }
            other => panic!("expected a folded return, got {other:?}"),
        }
        assert_no_dangling_uses(&f, &du);
    }

    #[test]
    fn test_constant_branch_purges_untaken_arm() {
        // L0: c = true; if (c) L1 else L2
        // L1: r = 1; goto L3
        // L2: r = 2; goto L3
        // L3: return r
        let mut b = FunctionBuilder::new("f");
        let c = b.local("c");
        let r = b.local("r");
        let (then, other, join) = (b.block(), b.block(), b.block());
        b.switch_to(b.entry());
        b.mov(c.clone(), Expr::boolean(true));
        b.cjump(c, then, other);
        b.switch_to(then);
        b.mov(r.clone(), Expr::int(1));
        b.jump(join);
        b.switch_to(other);
        b.mov(r.clone(), Expr::int(2));
        b.jump(join);
        b.switch_to(join);
        b.ret(r);
        let mut f = b.finish().unwrap();

        let (dt, du) = optimize(&mut f);
        assert!(f.block(other).removed);
        assert!(matches!(
            f.stmt(f.terminator(f.entry()).unwrap()).kind,
            StmtKind::Jump(t) if t == then
        ));
        assert_eq!(f.block(join).preds, vec![then]);
        assert!(f.phis(join).is_empty());
        assert!(matches!(
            &f.stmt(f.terminator(join).unwrap()).kind,
            StmtKind::Ret(Expr::Const(c)) if c.value == 1.0
        ));
        f.verify_cfg().unwrap();
        dt.verify(&f).unwrap();
        assert_no_dangling_uses(&f, &du);
    }

    #[test]
    fn test_phi_over_one_constant_disappears() {
        // both arms store 7
        let mut b = FunctionBuilder::new("f");
        let x = b.formal("x");
        let r = b.local("r");
        let (then, other, join) = (b.block(), b.block(), b.block());
        b.switch_to(b.entry());
        b.cjump(x, then, other);
        b.switch_to(then);
        b.mov(r.clone(), Expr::int(7));
        b.jump(join);
        b.switch_to(other);
        b.mov(r.clone(), Expr::number(7.0));
        b.jump(join);
        b.switch_to(join);
        b.ret(r);
        let mut f = b.finish().unwrap();

        let (dt, du) = optimize(&mut f);
        assert!(f.phis(join).is_empty());
        assert!(matches!(
            &f.stmt(f.terminator(join).unwrap()).kind,
            StmtKind::Ret(Expr::Const(c)) if c.value == 7.0
        ));
        verify_ssa(&f, &dt, &du).unwrap();
    }

    #[test]
    fn test_loop_phis_survive() {
        let mut f = crate::test::sum_loop();
        let (dt, du) = optimize(&mut f);
        let header = BlockId::new(1);
        assert_eq!(f.phis(header).len(), 2);
        verify_ssa(&f, &dt, &du).unwrap();
        assert_no_dangling_uses(&f, &du);
    }
}
