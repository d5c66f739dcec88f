//! Side-effect classification for dead-code elimination.
//!
//! An expression has a side effect when evaluating it may run user code
//! (calls, constructors, getters, `valueOf`/`toString` on boxed operands),
//! throw, or allocate an observable object. Temps, constants, slots and
//! arithmetic on primitive values do not.

use crate::ir::{AluOp, Expr, Name, Type};

/// Returns `true` if evaluating `expr` can be observed beyond its result.
#[must_use]
pub fn has_side_effects(expr: &Expr) -> bool {
    match expr {
        Expr::Const(_) | Expr::String(_) | Expr::RegExp { .. } | Expr::Temp(_) | Expr::ArgLocal(_) => false,
        Expr::Name(name) => name_has_side_effects(name),
        Expr::Closure(_) => true,
        Expr::Convert { expr, .. } => has_side_effects(expr) || may_call_user_code(expr.ty()),
        Expr::Unop { op, expr, .. } => {
            has_side_effects(expr)
                || (matches!(
                    op,
                    AluOp::UPlus | AluOp::UMinus | AluOp::Not | AluOp::Increment | AluOp::Decrement
                ) && may_call_user_code(expr.ty()))
        }
        Expr::Binop { left, right, .. } => {
            has_side_effects(left)
                || has_side_effects(right)
                || may_call_user_code(left.ty())
                || may_call_user_code(right.ty())
        }
        Expr::Member {
            free_of_side_effects: true,
            base,
            ..
        } => has_side_effects(base),
        Expr::Subscript { .. } | Expr::Member { .. } | Expr::Call { .. } | Expr::New { .. } => true,
    }
}

fn name_has_side_effects(name: &Name) -> bool {
    if name.free_of_side_effects {
        return false;
    }
    name.builtin.is_none() || name.id.as_deref().is_some_and(|id| id != "this")
}

/// Converting or operating on a boxed value may invoke `valueOf` or `toString`.
/// Untyped operands are treated the same way.
fn may_call_user_code(ty: Type) -> bool {
    ty.is_boxed() || ty.is_unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builtin, Temp};

    fn typed(index: u32, ty: Type) -> Expr {
        Expr::Temp(Temp::virtual_reg(index).with_type(ty))
    }

    #[test]
    fn test_pure_arithmetic() {
        let e = Expr::binop(AluOp::Add, typed(0, Type::DOUBLE), Expr::number(1.0));
        assert!(!has_side_effects(&e));
        assert!(!has_side_effects(&Expr::unop(AluOp::UMinus, typed(1, Type::SINT32))));
        assert!(!has_side_effects(&Expr::convert(typed(1, Type::SINT32), Type::DOUBLE)));
    }

    #[test]
    fn test_boxed_operands_may_run_code() {
        let e = Expr::binop(AluOp::Add, typed(0, Type::VAR), Expr::number(1.0));
        assert!(has_side_effects(&e));
        assert!(has_side_effects(&Expr::convert(typed(0, Type::STRING), Type::DOUBLE)));
        assert!(has_side_effects(&Expr::unop(AluOp::UPlus, typed(0, Type::OBJECT))));
        // complement converts too, but only the listed operators count
        assert!(!has_side_effects(&Expr::unop(AluOp::Compl, typed(0, Type::VAR))));
    }

    #[test]
    fn test_lookups_and_calls() {
        assert!(has_side_effects(&Expr::name("x")));
        assert!(has_side_effects(&Expr::call(Expr::name("f"), vec![])));
        assert!(has_side_effects(&Expr::member(typed(0, Type::VAR), "length")));
        assert!(has_side_effects(&Expr::Closure(0)));
        assert!(!has_side_effects(&Expr::builtin(Builtin::CaughtException)));

        let mut free = Expr::name("Math");
        if let Expr::Name(n) = &mut free {
            n.free_of_side_effects = true;
        }
        assert!(!has_side_effects(&free));
    }
}
