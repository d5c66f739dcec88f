//! Reverse type inference: narrowing values consumed only as integers.
//!
//! Code written as bit-twiddling (`(a + b) | 0`, `~~x`) computes values in
//! doubles that are immediately truncated to int32 again. When every consumer
//! of a value is an integer operation, the value itself can be produced as an
//! int32, and so can the chain of temps, complements and integer additions
//! feeding it.

use log::debug;

use crate::{
    analysis::{types::propagate_temp_type, DefUses},
    ir::{AluOp, Expr, Function, StmtKind, Temp, Type},
};

/// Retypes integer-only value chains as `int32`.
pub struct ReverseInference<'a> {
    def_uses: &'a mut DefUses,
}

impl<'a> ReverseInference<'a> {
    /// Creates a pass over the temps recorded in `def_uses`.
    pub fn new(def_uses: &'a mut DefUses) -> Self {
        Self { def_uses }
    }

    /// Runs the pass. Returns the number of temps narrowed.
    pub fn run(self, function: &mut Function) -> usize {
        let mut known_ok: Vec<Temp> = Vec::new();
        let mut candidates = self.def_uses.defs();
        while let Some(temp) = candidates.pop() {
            if known_ok.contains(&temp) || !self.is_used_as_int32(function, &temp, &known_ok) {
                continue;
            }
            let Some(def) = self.def_uses.def_stmt(&temp) else {
                continue;
            };
            let Some(m) = function.stmt(def).as_move() else {
                continue;
            };
            match m.target.as_temp() {
                Some(target) if *target == temp && target.ty != Type::SINT32 => {}
                _ => continue,
            }

            match &m.source {
                Expr::Temp(t) => candidates.push(*t),
                Expr::Binop { op, left, right, .. } => match op {
                    AluOp::Add | AluOp::Sub | AluOp::Mul => {
                        if left.ty() != Type::SINT32 || right.ty() != Type::SINT32 {
                            continue;
                        }
                    }
                    // `>>>` yields uint32, which has no int32 representation
                    AluOp::URShift => continue,
                    op if op.is_bitwise() => {
                        candidates.extend(left.as_temp().copied());
                        candidates.extend(right.as_temp().copied());
                    }
                    _ => continue,
                },
                Expr::Unop { op, expr, .. } => {
                    if matches!(op, AluOp::Compl | AluOp::UPlus) {
                        candidates.extend(expr.as_temp().copied());
                    }
                }
                _ => continue,
            }
            known_ok.push(temp);
        }

        for temp in &known_ok {
            propagate_temp_type(function, self.def_uses, temp, Type::SINT32);
            let Some(def) = self.def_uses.def_stmt(temp) else {
                continue;
            };
            if let StmtKind::Move(m) = &mut function.stmt_mut(def).kind {
                match &mut m.source {
                    Expr::Convert { ty, .. } | Expr::Binop { ty, .. } => *ty = Type::SINT32,
                    Expr::Unop { op, ty, .. } if *op != AluOp::UMinus => *ty = Type::SINT32,
                    _ => {}
                }
            }
        }
        if !known_ok.is_empty() {
            debug!("{}: narrowed {} temps to int32", function.name, known_ok.len());
        }
        known_ok.len()
    }

    /// Returns `true` if every use of `temp` truncates it to an integer
    /// anyway, or copies it into a temp already known to be one.
    fn is_used_as_int32(&self, function: &Function, temp: &Temp, known_ok: &[Temp]) -> bool {
        let uses = self.def_uses.uses(temp);
        if uses.is_empty() {
            return false;
        }
        uses.iter().all(|&id| {
            let Some(m) = function.stmt(id).as_move() else {
                return false;
            };
            let target_ok = m.target.as_temp().is_some_and(|t| known_ok.contains(t));
            match &m.source {
                Expr::Temp(_) => target_ok,
                Expr::Convert { .. } => true,
                Expr::Binop { op, .. } => match op {
                    AluOp::Add | AluOp::Sub | AluOp::Mul => target_ok,
                    op => op.is_bitwise(),
                },
                Expr::Unop { op, .. } => match op {
                    AluOp::UPlus => target_ok,
                    op => *op == AluOp::Compl,
                },
                _ => false,
            }
        })
    }
}
