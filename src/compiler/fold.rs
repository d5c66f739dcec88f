//! Constant folding.
//!
//! Evaluates operators over [`Const`] operands at compile time with the same
//! semantics the runtime uses: double arithmetic with IEEE-754 rules,
//! ECMAScript `ToInt32`/`ToUint32` wraparound for bitwise operators and
//! unordered comparisons against `NaN`.
//!
//! Only primitive constants fold. Strings, objects and untyped values can
//! run user code when converted and are never touched.

use crate::{
    ir::{AluOp, Const, Expr, Type},
    utils::{is_exact_int32, is_exact_uint32, number_to_bool, to_int32, to_uint32},
};

/// ECMAScript `ToNumber` for a primitive constant.
#[must_use]
pub fn const_to_number(c: &Const) -> f64 {
    match c.ty {
        Type::NULL => 0.0,
        Type::UNDEFINED => f64::NAN,
        _ => c.value,
    }
}

/// ECMAScript `ToBoolean` for a primitive constant.
#[must_use]
pub fn const_to_bool(c: &Const) -> bool {
    match c.ty {
        Type::NULL | Type::UNDEFINED => false,
        _ => number_to_bool(c.value),
    }
}

/// Two constants are the same value for phi and branch purposes: equal
/// payloads and either the same type or both numeric.
#[must_use]
pub fn same_const(a: &Const, b: &Const) -> bool {
    let same_value = a.value == b.value || (a.value.is_nan() && b.value.is_nan());
    same_value && (a.ty == b.ty || (a.ty.is_number() && b.ty.is_number()))
}

fn is_foldable(c: &Const) -> bool {
    !c.ty.is_boxed() && !c.ty.is_unknown()
}

/// A numeric result, kept in `preferred` when the value fits it exactly.
fn number(value: f64, preferred: Type) -> Const {
    let ty = match preferred {
        Type::SINT32 if is_exact_int32(value) => Type::SINT32,
        Type::UINT32 if is_exact_uint32(value) => Type::UINT32,
        _ => Type::DOUBLE,
    };
    Const { ty, value }
}

/// Folds a unary operator over a numeric or boolean constant.
///
/// `result_ty` is the type inference assigned to the operator node; unary
/// plus adopts it.
#[must_use]
pub fn fold_unop(op: AluOp, operand: &Const, result_ty: Type) -> Option<Const> {
    if !operand.ty.is_number() && operand.ty != Type::BOOL {
        return None;
    }
    let value = operand.value;
    let folded = match op {
        AluOp::Not => Const::boolean(!number_to_bool(value)),
        AluOp::UMinus => {
            // -0 is not an int32
            if value == 0.0 {
                Const::number(-value)
            } else {
                number(-value, operand.ty)
            }
        }
        AluOp::UPlus => match result_ty {
            ty if ty.is_number() => number(value, ty),
            _ => *operand,
        },
        AluOp::Compl => Const::int32(!to_int32(value)),
        AluOp::Increment => number(value + 1.0, operand.ty),
        AluOp::Decrement => number(value - 1.0, operand.ty),
        _ => return None,
    };
    Some(folded)
}

/// Evaluates a relational or equality operator over two primitive constants.
#[must_use]
pub fn compare(op: AluOp, left: &Const, right: &Const) -> Option<bool> {
    if !is_foldable(left) || !is_foldable(right) {
        return None;
    }
    let nullish = |c: &Const| c.ty == Type::NULL || c.ty == Type::UNDEFINED;
    let (l, r) = (const_to_number(left), const_to_number(right));
    let result = match op {
        AluOp::Gt => l > r,
        AluOp::Lt => l < r,
        AluOp::Ge => l >= r,
        AluOp::Le => l <= r,
        AluOp::Equal | AluOp::NotEqual => {
            let equal = if nullish(left) || nullish(right) {
                nullish(left) && nullish(right)
            } else {
                l == r
            };
            equal == (op == AluOp::Equal)
        }
        AluOp::StrictEqual | AluOp::StrictNotEqual => {
            let same_kind = left.ty == right.ty || (left.ty.is_number() && right.ty.is_number());
            let equal = same_kind && (nullish(left) || l == r);
            equal == (op == AluOp::StrictEqual)
        }
        _ => return None,
    };
    Some(result)
}

/// Folds a binary operator over two primitive constants.
///
/// Arithmetic yields a double unless `result_ty` was narrowed to an integer
/// type, in which case the result wraps like the integer instruction would.
#[must_use]
pub fn fold_binop(op: AluOp, left: &Const, right: &Const, result_ty: Type) -> Option<Const> {
    if !is_foldable(left) || !is_foldable(right) {
        return None;
    }
    let (l, r) = (const_to_number(left), const_to_number(right));
    let arithmetic = |value: f64| match result_ty {
        Type::SINT32 => Const::int32(to_int32(value)),
        Type::UINT32 => Const {
            ty: Type::UINT32,
            value: f64::from(to_uint32(value)),
        },
        _ => Const::number(value),
    };
    let shift = to_uint32(r) & 0x1f;
    let folded = match op {
        AluOp::Add => arithmetic(l + r),
        AluOp::Sub => arithmetic(l - r),
        AluOp::Mul => arithmetic(l * r),
        AluOp::Div => Const::number(l / r),
        AluOp::Mod => Const::number(l % r),
        AluOp::BitAnd => Const::int32(to_int32(l) & to_int32(r)),
        AluOp::BitOr => Const::int32(to_int32(l) | to_int32(r)),
        AluOp::BitXor => Const::int32(to_int32(l) ^ to_int32(r)),
        AluOp::LShift => Const::int32(to_int32(l).wrapping_shl(shift)),
        AluOp::RShift => Const::int32(to_int32(l).wrapping_shr(shift)),
        AluOp::URShift => Const {
            ty: Type::UINT32,
            value: f64::from(to_uint32(l).wrapping_shr(shift)),
        },
        op if op.is_comparison() => Const::boolean(compare(op, left, right)?),
        _ => return None,
    };
    Some(folded)
}

/// Replaces a comparison of two constants with its boolean result.
///
/// Returns `true` if `expr` was rewritten.
pub fn try_optimizing_comparison(expr: &mut Expr) -> bool {
    let Expr::Binop {
        op, left, right, ..
    } = expr
    else {
        return false;
    };
    let (Some(l), Some(r)) = (left.as_const(), right.as_const()) else {
        return false;
    };
    match compare(*op, l, r) {
        Some(result) => {
            *expr = Expr::boolean(result);
            true
        }
        None => false,
    }
}

/// Rewrites an operator node whose result is known without evaluating it at
/// run time: constant operands, `x | 0` and `x & -1` on a value that is
/// already an int32, and shifts by zero. Shift counts are masked to five
/// bits in place.
///
/// Returns `true` if `expr` was replaced by a simpler expression.
pub fn simplify(expr: &mut Expr) -> bool {
    let replacement = match expr {
        Expr::Unop { op, expr: operand, ty } => match operand.as_const() {
            Some(c) => fold_unop(*op, c, *ty).map(Expr::Const),
            None => None,
        },
        Expr::Binop {
            op,
            left,
            right,
            ty,
        } => simplify_binop(*op, left, right, *ty),
        _ => None,
    };
    match replacement {
        Some(replacement) => {
            *expr = replacement;
            true
        }
        None => false,
    }
}

fn simplify_binop(op: AluOp, left: &Expr, right: &mut Expr, ty: Type) -> Option<Expr> {
    let left_const = left.as_const().copied();
    let right_const = right.as_const().copied();

    // integer casts written as bit operations
    let casted: Option<&Expr> = match (op, &left_const, &right_const) {
        (AluOp::BitAnd | AluOp::BitOr, Some(c), None) if is_identity(op, c) => Some(&*right),
        (AluOp::BitAnd | AluOp::BitOr, None, Some(c)) if is_identity(op, c) => Some(left),
        _ => None,
    };
    if let Some(casted) = casted {
        if casted.ty() == Type::SINT32 {
            return Some(casted.clone());
        }
    }

    if let (AluOp::LShift | AluOp::RShift | AluOp::URShift, Some(c)) = (op, right_const) {
        let count = to_int32(c.value) & 0x1f;
        if count == 0 && op != AluOp::URShift && left.ty() == Type::SINT32 {
            return Some(left.clone());
        }
        if let Expr::Const(rc) = right {
            *rc = Const::int32(count);
        }
    }

    fold_binop(op, &left_const?, &right_const?, ty).map(Expr::Const)
}

fn is_identity(op: AluOp, c: &Const) -> bool {
    match op {
        AluOp::BitAnd => to_uint32(c.value) == u32::MAX,
        AluOp::BitOr => to_int32(c.value) == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Temp;

    #[test]
    fn test_fold_add_of_doubles() {
        let folded = fold_binop(
            AluOp::Add,
            &Const::number(1.0),
            &Const::number(2.0),
            Type::DOUBLE,
        )
        .unwrap();
        assert_eq!(folded.ty, Type::DOUBLE);
        assert_eq!(folded.value, 3.0);
    }

    #[test]
    fn test_fold_complement_of_zero() {
        let folded = fold_unop(AluOp::Compl, &Const::int32(0), Type::SINT32).unwrap();
        assert_eq!(folded, Const::int32(-1));
    }

    #[test]
    fn test_nan_is_not_strictly_equal_to_itself() {
        let nan = Const::number(f64::NAN);
        assert_eq!(compare(AluOp::StrictEqual, &nan, &nan), Some(false));
        assert_eq!(compare(AluOp::StrictNotEqual, &nan, &nan), Some(true));
        assert_eq!(compare(AluOp::Lt, &nan, &Const::number(1.0)), Some(false));
        assert_eq!(compare(AluOp::Ge, &nan, &Const::number(1.0)), Some(false));
    }

    #[test]
    fn test_equality_of_null_and_undefined() {
        let (null, undefined) = (Const::null(), Const::undefined());
        assert_eq!(compare(AluOp::Equal, &null, &undefined), Some(true));
        assert_eq!(compare(AluOp::StrictEqual, &null, &undefined), Some(false));
        assert_eq!(compare(AluOp::StrictEqual, &undefined, &undefined), Some(true));
        assert_eq!(compare(AluOp::Equal, &null, &Const::int32(0)), Some(false));
        assert_eq!(compare(AluOp::Equal, &Const::boolean(true), &Const::int32(1)), Some(true));
        assert_eq!(
            compare(AluOp::StrictEqual, &Const::int32(2), &Const::number(2.0)),
            Some(true)
        );
    }

    #[test]
    fn test_unary_minus_of_zero_is_negative_zero() {
        let folded = fold_unop(AluOp::UMinus, &Const::int32(0), Type::SINT32).unwrap();
        assert_eq!(folded.ty, Type::DOUBLE);
        assert!(folded.value == 0.0 && folded.value.is_sign_negative());

        let back = fold_unop(AluOp::UMinus, &folded, Type::DOUBLE).unwrap();
        assert!(!back.value.is_sign_negative());

        // -(-2^31) leaves the int32 range
        let min = fold_unop(AluOp::UMinus, &Const::int32(i32::MIN), Type::SINT32).unwrap();
        assert_eq!(min.ty, Type::DOUBLE);
        assert_eq!(min.value, 2_147_483_648.0);
    }

    #[test]
    fn test_bitwise_wraparound() {
        let big = Const::number(4_294_967_297.0); // 2^32 + 1
        let folded = fold_binop(AluOp::BitOr, &big, &Const::int32(0), Type::SINT32).unwrap();
        assert_eq!(folded, Const::int32(1));

        let shl = fold_binop(AluOp::LShift, &Const::int32(1), &Const::int32(33), Type::SINT32);
        assert_eq!(shl, Some(Const::int32(2)));

        let ushr = fold_binop(AluOp::URShift, &Const::int32(-1), &Const::int32(0), Type::UINT32)
            .unwrap();
        assert_eq!(ushr.ty, Type::UINT32);
        assert_eq!(ushr.value, 4_294_967_295.0);
    }

    #[test]
    fn test_strings_never_fold() {
        let string = Const {
            ty: Type::STRING,
            value: 0.0,
        };
        assert!(fold_binop(AluOp::Add, &string, &Const::int32(1), Type::VAR).is_none());
        assert!(compare(AluOp::Equal, &string, &string).is_none());
    }

    #[test]
    fn test_simplify_int32_casts_and_shifts() {
        let t = Temp::virtual_reg(0).with_type(Type::SINT32);
        let mut or_zero = Expr::binop(AluOp::BitOr, t.into(), Expr::int(0));
        assert!(simplify(&mut or_zero));
        assert_eq!(or_zero, Expr::Temp(t));

        let d = Temp::virtual_reg(1).with_type(Type::DOUBLE);
        let mut truncation = Expr::binop(AluOp::BitOr, d.into(), Expr::int(0));
        assert!(!simplify(&mut truncation));

        let mut masked = Expr::binop(AluOp::LShift, t.into(), Expr::int(35));
        assert!(!simplify(&mut masked));
        assert!(matches!(&masked, Expr::Binop { right, .. } if **right == Expr::int(3)));

        let mut by_zero = Expr::binop(AluOp::RShift, t.into(), Expr::int(32));
        assert!(simplify(&mut by_zero));
        assert_eq!(by_zero, Expr::Temp(t));

        // `u << 0` converts a uint32 back to int32
        let u = Temp::virtual_reg(2).with_type(Type::UINT32);
        let mut wrap = Expr::binop(AluOp::LShift, u.into(), Expr::int(0));
        assert!(!simplify(&mut wrap));
        assert!(matches!(wrap, Expr::Binop { op: AluOp::LShift, .. }));
    }

    #[test]
    fn test_try_optimizing_comparison() {
        let mut e = Expr::binop(AluOp::Lt, Expr::int(1), Expr::number(1.5));
        assert!(try_optimizing_comparison(&mut e));
        assert_eq!(e, Expr::boolean(true));

        let mut open = Expr::binop(AluOp::Lt, Temp::virtual_reg(0).into(), Expr::int(1));
        assert!(!try_optimizing_comparison(&mut open));
    }
}
