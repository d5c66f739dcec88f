//! Statements.

use crate::ir::{BlockId, Expr, StmtId, Temp};

/// A phi: selects one incoming value per predecessor edge.
///
/// `incoming[i]` is the value flowing in along the block's `i`-th predecessor
/// edge, so `incoming.len()` always equals the block's predecessor count.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// Defined value.
    pub target: Temp,
    /// One value per predecessor edge.
    pub incoming: Vec<Expr>,
}

/// An assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    /// Destination: a temp, a frame slot, a name, a member or a subscript.
    pub target: Expr,
    /// Assigned value.
    pub source: Expr,
    /// Exchange `target` and `source` instead of copying. Only emitted when
    /// breaking parallel-copy cycles, where both sides are temps.
    pub swap: bool,
}

/// A two-way branch.
#[derive(Debug, Clone, PartialEq)]
pub struct CJump {
    /// Branch condition.
    pub cond: Expr,
    /// Target when the condition is true; successor 0.
    pub iftrue: BlockId,
    /// Target when the condition is false; successor 1.
    pub iffalse: BlockId,
}

/// The kinds of statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// SSA merge.
    Phi(Phi),
    /// Assignment.
    Move(Move),
    /// Expression evaluated for its effect.
    Exp(Expr),
    /// Unconditional branch.
    Jump(BlockId),
    /// Conditional branch.
    CJump(CJump),
    /// Function return.
    Ret(Expr),
}

/// A statement with its stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Arena id, used to key all side tables.
    pub id: StmtId,
    /// Payload.
    pub kind: StmtKind,
}

impl Stmt {
    /// Returns `true` for jumps, branches and returns.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Jump(_) | StmtKind::CJump(_) | StmtKind::Ret(_)
        )
    }

    /// Returns the phi payload, if any.
    #[must_use]
    pub fn as_phi(&self) -> Option<&Phi> {
        match &self.kind {
            StmtKind::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    /// Returns the move payload, if any.
    #[must_use]
    pub fn as_move(&self) -> Option<&Move> {
        match &self.kind {
            StmtKind::Move(m) => Some(m),
            _ => None,
        }
    }

    /// The temp this statement defines.
    #[must_use]
    pub fn def_temp(&self) -> Option<Temp> {
        match &self.kind {
            StmtKind::Phi(phi) => Some(phi.target),
            StmtKind::Move(Move {
                target: Expr::Temp(t),
                ..
            }) => Some(*t),
            _ => None,
        }
    }

    /// Calls `f` for every temp this statement reads.
    ///
    /// For a move into a temp only the source is visited; for a move into a
    /// member or subscript the target's operands are reads too.
    pub fn for_each_use(&self, f: &mut impl FnMut(&Temp)) {
        match &self.kind {
            StmtKind::Phi(phi) => phi.incoming.iter().for_each(|e| e.for_each_temp(f)),
            StmtKind::Move(m) => {
                m.source.for_each_temp(f);
                match &m.target {
                    Expr::Temp(t) if m.swap => f(t),
                    Expr::Temp(_) => {}
                    target => target.for_each_temp(f),
                }
            }
            StmtKind::Exp(e) | StmtKind::Ret(e) => e.for_each_temp(f),
            StmtKind::CJump(cj) => cj.cond.for_each_temp(f),
            StmtKind::Jump(_) => {}
        }
    }

    /// Collects the temps this statement reads.
    #[must_use]
    pub fn uses(&self) -> Vec<Temp> {
        let mut uses = Vec::new();
        self.for_each_use(&mut |t| uses.push(*t));
        uses
    }

    /// Calls `f` for every temp occurrence, definitions included.
    pub fn for_each_temp_mut(&mut self, f: &mut impl FnMut(&mut Temp)) {
        match &mut self.kind {
            StmtKind::Phi(phi) => {
                f(&mut phi.target);
                phi.incoming.iter_mut().for_each(|e| e.for_each_temp_mut(f));
            }
            StmtKind::Move(m) => {
                m.source.for_each_temp_mut(f);
                m.target.for_each_temp_mut(f);
            }
            StmtKind::Exp(e) | StmtKind::Ret(e) => e.for_each_temp_mut(f),
            StmtKind::CJump(cj) => cj.cond.for_each_temp_mut(f),
            StmtKind::Jump(_) => {}
        }
    }

    /// Calls `f` on every top-level expression: phi operands, move target and
    /// source, and the operand of expression statements, branches and returns.
    pub fn for_each_expr_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match &mut self.kind {
            StmtKind::Phi(phi) => phi.incoming.iter_mut().for_each(f),
            StmtKind::Move(m) => {
                f(&mut m.target);
                f(&mut m.source);
            }
            StmtKind::Exp(e) | StmtKind::Ret(e) => f(e),
            StmtKind::CJump(cj) => f(&mut cj.cond),
            StmtKind::Jump(_) => {}
        }
    }

    /// Replaces every read of `target` with `replacement`. Definitions are untouched.
    ///
    /// Returns the number of occurrences replaced.
    pub fn replace_use(&mut self, target: &Temp, replacement: &Expr) -> usize {
        match &mut self.kind {
            StmtKind::Phi(phi) => phi
                .incoming
                .iter_mut()
                .map(|e| e.replace_temp(target, replacement))
                .sum(),
            StmtKind::Move(m) => {
                let mut count = m.source.replace_temp(target, replacement);
                if !matches!(m.target, Expr::Temp(_)) {
                    count += m.target.replace_temp(target, replacement);
                }
                count
            }
            StmtKind::Exp(e) | StmtKind::Ret(e) => e.replace_temp(target, replacement),
            StmtKind::CJump(cj) => cj.cond.replace_temp(target, replacement),
            StmtKind::Jump(_) => 0,
        }
    }

    /// Points successor edge `index` (0 for a jump or the true edge, 1 for the
    /// false edge) at `to`.
    pub fn set_successor(&mut self, index: usize, to: BlockId) {
        match (&mut self.kind, index) {
            (StmtKind::Jump(target), 0) => *target = to,
            (StmtKind::CJump(cj), 0) => cj.iftrue = to,
            (StmtKind::CJump(cj), 1) => cj.iffalse = to,
            _ => debug_assert!(false, "statement has no successor {index}"),
        }
    }

    /// Retargets every jump or branch edge from `from` to `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match &mut self.kind {
            StmtKind::Jump(target) if *target == from => *target = to,
            StmtKind::CJump(cj) => {
                if cj.iftrue == from {
                    cj.iftrue = to;
                }
                if cj.iffalse == from {
                    cj.iffalse = to;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AluOp, Type};

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt {
            id: StmtId::new(0),
            kind,
        }
    }

    #[test]
    fn test_defs_and_uses() {
        let (a, b, c) = (Temp::virtual_reg(0), Temp::virtual_reg(1), Temp::virtual_reg(2));
        let s = stmt(StmtKind::Move(Move {
            target: Expr::Temp(c),
            source: Expr::binop(AluOp::Add, Expr::Temp(a), Expr::Temp(b)),
            swap: false,
        }));
        assert_eq!(s.def_temp(), Some(c));
        assert_eq!(s.uses(), vec![a, b]);

        let store = stmt(StmtKind::Move(Move {
            target: Expr::member(Expr::Temp(a), "x"),
            source: Expr::Temp(b),
            swap: false,
        }));
        assert_eq!(store.def_temp(), None);
        assert_eq!(store.uses(), vec![b, a]);
    }

    #[test]
    fn test_replace_use_keeps_definition() {
        let a = Temp::virtual_reg(0);
        let mut s = stmt(StmtKind::Move(Move {
            target: Expr::Temp(a),
            source: Expr::binop(AluOp::Mul, Expr::Temp(a), Expr::Temp(a)),
            swap: false,
        }));
        assert_eq!(s.replace_use(&a, &Expr::number(2.0)), 2);
        assert_eq!(s.def_temp(), Some(a));
        assert!(s.uses().is_empty());
        assert_eq!(
            s.as_move().map(|m| m.source.ty()),
            Some(Type::UNKNOWN)
        );
    }

    #[test]
    fn test_retarget() {
        let mut s = stmt(StmtKind::CJump(CJump {
            cond: Expr::boolean(true),
            iftrue: BlockId::new(1),
            iffalse: BlockId::new(1),
        }));
        s.retarget(BlockId::new(1), BlockId::new(4));
        assert!(matches!(
            s.kind,
            StmtKind::CJump(CJump { iftrue, iffalse, .. })
                if iftrue == BlockId::new(4) && iffalse == BlockId::new(4)
        ));
    }
}
