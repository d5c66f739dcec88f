//! Conversion insertion.
//!
//! After inference every node has a type, but consumers do not necessarily
//! get the representation they need: an `int32` flows into a `double` phi, a
//! generic value is compared against a double, a number is used as a branch
//! condition. This pass walks each statement with the type every operand is
//! required to have and fixes the mismatches, cheapest first:
//!
//! - a constant is converted in place
//! - a copy `a = b` becomes `a = convert(b)`
//! - `a = +b` loses the unary plus, becoming `a = b` or `a = convert(b)`
//! - any other producer gets a fresh temp holding the converted value,
//!   defined right before the consumer (or at the end of the matching
//!   predecessor, for a phi operand)
//!
//! # Example
//!
//! ```text
//! L0: int32 %1 = 0                      L0: int32 %1 = 0
//!     goto L1                               double %5 = convert(int32 %1)
//!                               =>          goto L1
//! L1: double %2 = phi(%1, %4)           L1: double %2 = phi(%5, %4)
//! ```

use log::debug;

use crate::{
    analysis::DefUses,
    compiler::StatementWorklist,
    ir::{AluOp, BlockId, Const, Expr, Function, Move, StmtId, StmtKind, Type},
    utils::{number_to_bool, to_int32, to_uint32},
};

/// Changes a constant's representation, converting its value to match.
pub fn convert_const(c: &mut Const, ty: Type) {
    match ty {
        Type::DOUBLE => {}
        Type::SINT32 => c.value = f64::from(to_int32(c.value)),
        Type::UINT32 => c.value = f64::from(to_uint32(c.value)),
        Type::BOOL => c.value = if number_to_bool(c.value) { 1.0 } else { 0.0 },
        Type::NULL | Type::UNDEFINED => c.value = f64::NAN,
        _ => debug_assert!(false, "cannot convert a constant to {ty}"),
    }
    c.ty = ty;
}

/// Where a conversion is being requested.
#[derive(Debug, Clone, Copy)]
struct Site {
    block: BlockId,
    stmt: StmtId,
    /// The statement is a plain temp-to-temp (or temp-to-slot) copy.
    copy: bool,
    /// For a phi operand, the predecessor the value flows in from.
    phi_pred: Option<BlockId>,
}

/// Inserts the conversions required by each consumer.
pub struct TypePropagation<'a> {
    def_uses: &'a mut DefUses,
    worklist: &'a mut StatementWorklist,
    inserted: usize,
}

impl<'a> TypePropagation<'a> {
    /// Creates a pass that registers new statements with `def_uses` and `worklist`.
    pub fn new(def_uses: &'a mut DefUses, worklist: &'a mut StatementWorklist) -> Self {
        Self {
            def_uses,
            worklist,
            inserted: 0,
        }
    }

    /// Runs the pass. Returns the number of conversion statements inserted.
    pub fn run(mut self, function: &mut Function) -> usize {
        for block in function.block_ids() {
            for id in function.block(block).statements.clone() {
                let mut kind = function.stmt(id).kind.clone();
                let site = Site {
                    block,
                    stmt: id,
                    copy: false,
                    phi_pred: None,
                };
                self.visit_stmt(function, site, &mut kind);
                function.stmt_mut(id).kind = kind;
                self.def_uses.refresh_uses(function.stmt(id));
            }
        }
        debug!("{}: inserted {} conversions", function.name, self.inserted);
        self.inserted
    }

    fn visit_stmt(&mut self, function: &mut Function, mut site: Site, kind: &mut StmtKind) {
        match kind {
            StmtKind::Exp(e) | StmtKind::Ret(e) => {
                self.require(function, site, e, Type::UNKNOWN, true);
            }
            StmtKind::CJump(cj) => {
                self.require(function, site, &mut cj.cond, Type::BOOL, true);
            }
            StmtKind::Jump(_) => {}
            StmtKind::Phi(phi) => {
                let ty = phi.target.ty;
                let preds = function.block(site.block).preds.clone();
                for (incoming, pred) in phi.incoming.iter_mut().zip(preds) {
                    site.phi_pred = Some(pred);
                    self.require(function, site, incoming, ty, true);
                }
            }
            StmtKind::Move(m) => {
                // conversions inserted for phi operands are already final
                if matches!(m.source, Expr::Convert { .. }) {
                    return;
                }
                self.require(function, site, &mut m.target, Type::UNKNOWN, true);
                let target_ty = m.target.ty();

                if let Expr::Unop {
                    op: AluOp::UPlus,
                    expr,
                    ..
                } = &mut m.source
                {
                    let mismatch = self.require(function, site, expr, target_ty, false);
                    let operand = std::mem::replace(&mut **expr, Expr::undefined());
                    m.source = if mismatch {
                        Expr::convert(operand, target_ty)
                    } else {
                        operand
                    };
                    return;
                }

                site.copy = matches!(m.source, Expr::Temp(_)) && !matches!(m.target, Expr::Member { .. });
                self.require(function, site, &mut m.source, target_ty, true);
            }
        }
    }

    /// Visits `e` with `requested` as the representation its consumer needs.
    ///
    /// Returns `true` if `e` does not produce that representation and a
    /// conversion was (or, without `insert`, would have been) needed.
    fn require(&mut self, function: &mut Function, site: Site, e: &mut Expr, requested: Type, insert: bool) -> bool {
        self.visit(function, site, e, requested);
        if requested.is_unknown() || e.ty() == requested {
            return false;
        }
        if !requested.intersects(Type::NUMBER) && requested != Type::BOOL {
            return false;
        }
        if insert {
            self.convert(function, site, e, requested);
        }
        true
    }

    fn visit(&mut self, function: &mut Function, site: Site, e: &mut Expr, requested: Type) {
        // only the consumer's own operand is a phi operand or a copy source
        let inner = Site {
            copy: false,
            phi_pred: None,
            ..site
        };
        match e {
            Expr::Const(c) => {
                if requested.intersects(Type::NUMBER) && c.ty.intersects(Type::NUMBER) {
                    if requested == Type::SINT32 {
                        c.value = f64::from(to_int32(c.value));
                    } else if requested == Type::UINT32 {
                        c.value = f64::from(to_uint32(c.value));
                    }
                    c.ty = requested;
                }
            }
            Expr::Convert { expr, ty } | Expr::Unop { expr, ty, .. } => {
                let ty = *ty;
                self.require(function, inner, expr, ty, true);
            }
            Expr::Binop { op, left, right, ty } => match op {
                AluOp::Add
                | AluOp::Sub
                | AluOp::Mul
                | AluOp::Div
                | AluOp::Mod
                | AluOp::BitAnd
                | AluOp::BitOr
                | AluOp::BitXor => {
                    let ty = *ty;
                    self.require(function, inner, left, ty, true);
                    self.require(function, inner, right, ty, true);
                }
                AluOp::LShift | AluOp::RShift | AluOp::URShift => {
                    self.require(function, inner, left, Type::SINT32, true);
                    self.require(function, inner, right, Type::SINT32, true);
                }
                AluOp::Gt | AluOp::Lt | AluOp::Ge | AluOp::Le | AluOp::Equal | AluOp::NotEqual
                    if left.ty() == Type::DOUBLE =>
                {
                    self.require(function, inner, right, Type::DOUBLE, true);
                }
                AluOp::Gt | AluOp::Lt | AluOp::Ge | AluOp::Le | AluOp::Equal | AluOp::NotEqual
                    if right.ty() == Type::DOUBLE =>
                {
                    self.require(function, inner, left, Type::DOUBLE, true);
                }
                _ => {
                    let (left_ty, right_ty) = (left.ty(), right.ty());
                    self.require(function, inner, left, left_ty, true);
                    self.require(function, inner, right, right_ty, true);
                }
            },
            Expr::Call { base, args } | Expr::New { base, args } => {
                self.require(function, inner, base, Type::UNKNOWN, true);
                for arg in args {
                    self.require(function, inner, arg, Type::UNKNOWN, true);
                }
            }
            Expr::Subscript { base, index } => {
                self.require(function, inner, base, Type::UNKNOWN, true);
                self.require(function, inner, index, Type::UNKNOWN, true);
            }
            Expr::Member { base, .. } => {
                self.require(function, inner, base, Type::UNKNOWN, true);
            }
            Expr::String(_)
            | Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::Temp(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_) => {}
        }
    }

    /// Rewrites `e` so that it produces `ty`.
    fn convert(&mut self, function: &mut Function, site: Site, e: &mut Expr, ty: Type) {
        if site.copy {
            let operand = std::mem::replace(e, Expr::undefined());
            *e = Expr::convert(operand, ty);
            return;
        }
        if let Expr::Const(c) = e {
            convert_const(c, ty);
            return;
        }

        let operand = std::mem::replace(e, Expr::undefined());
        let (target, source, replacement) = match operand {
            // a value read from a temp or slot is converted into a fresh temp
            Expr::Temp(_) | Expr::ArgLocal(_) => {
                let target = function.new_temp().with_type(ty);
                (target, Expr::convert(operand, ty), Expr::Temp(target))
            }
            // anything else is computed first, then converted at the use
            operand => {
                let target = function.new_temp().with_type(operand.ty());
                (target, operand, Expr::convert(Expr::Temp(target), ty))
            }
        };

        let kind = StmtKind::Move(Move {
            target: Expr::Temp(target),
            source,
            swap: false,
        });
        let (block, id) = match site.phi_pred {
            Some(pred) => (pred, function.insert_before_terminator(pred, kind)),
            None => (site.block, function.insert_before(site.block, site.stmt, kind)),
        };
        self.worklist.register_new_statement(id);
        self.def_uses.register_new_statement(id);
        self.def_uses.add_def(target, id, block);
        self.def_uses.refresh_uses(function.stmt(id));
        self.inserted += 1;

        *e = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::types::TypeInference,
        ir::{FunctionBuilder, Temp},
        test::{sum_loop, to_ssa},
    };

    fn typed(function: &mut Function) -> (DefUses, StatementWorklist) {
        let (_, mut du) = to_ssa(function);
        let mut worklist = StatementWorklist::new(function);
        TypeInference::new(&mut du, &mut worklist).run(function);
        (du, worklist)
    }

    #[test]
    fn test_convert_const() {
        let mut c = Const::number(-1.5);
        convert_const(&mut c, Type::SINT32);
        assert_eq!((c.ty, c.value), (Type::SINT32, -1.0));

        let mut c = Const::number(-1.0);
        convert_const(&mut c, Type::UINT32);
        assert_eq!(c.value, 4_294_967_295.0);

        let mut c = Const::number(f64::NAN);
        convert_const(&mut c, Type::BOOL);
        assert_eq!((c.ty, c.value), (Type::BOOL, 0.0));

        let mut c = Const::number(3.0);
        convert_const(&mut c, Type::UNDEFINED);
        assert!(c.value.is_nan());
    }

    #[test]
    fn test_phi_operands_converted_in_predecessors() {
        let mut f = sum_loop();
        let (mut du, mut worklist) = typed(&mut f);
        let inserted = TypePropagation::new(&mut du, &mut worklist).run(&mut f);
        // r and i entering the loop, and x in the comparison
        assert_eq!(inserted, 3);
        assert!(f.verify_cfg().is_ok());

        let entry = f.entry();
        let converts: Vec<Temp> = f
            .statements(entry)
            .filter_map(|s| match s.as_move() {
                Some(Move {
                    target: Expr::Temp(t),
                    source: Expr::Convert { ty: Type::DOUBLE, .. },
                    ..
                }) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(converts.len(), 2);

        let header = BlockId::new(1);
        for phi in f.phis(header) {
            let phi = f.stmt(phi).as_phi().unwrap();
            let incoming = phi.incoming[0].as_temp().unwrap();
            assert!(converts.contains(incoming));
            assert_eq!(incoming.ty, Type::DOUBLE);
            assert_eq!(du.def_block(incoming), Some(entry));
            assert_eq!(du.uses(incoming), &[phi_id(&f, phi.target)]);
        }

        // the generic formal is converted before the comparison
        let statements: Vec<_> = f.statements(header).collect();
        let cmp_input = statements[statements.len() - 2].as_move().unwrap();
        assert_eq!(cmp_input.target.ty(), Type::DOUBLE);
        assert!(matches!(cmp_input.source, Expr::Convert { ty: Type::DOUBLE, .. }));
    }

    fn phi_id(f: &Function, target: Temp) -> StmtId {
        f.phis(BlockId::new(1))
            .into_iter()
            .find(|&p| f.stmt(p).def_temp() == Some(target))
            .unwrap()
    }

    #[test]
    fn test_constant_operands_convert_in_place() {
        // the int constant feeding a double multiply is retyped
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let (t0, t1) = (b.temp(), b.temp());
        b.mov(t0, Expr::number(0.5));
        b.mov(t1, Expr::binop(AluOp::Mul, t0.into(), Expr::int(3)));
        b.ret(t1.into());
        let mut f = b.finish().unwrap();
        let (mut du, mut worklist) = typed(&mut f);
        assert_eq!(TypePropagation::new(&mut du, &mut worklist).run(&mut f), 0);

        let mul = f.statements(f.entry()).nth(1).unwrap().as_move().unwrap();
        let Expr::Binop { right, .. } = &mul.source else {
            panic!("not a binop");
        };
        assert_eq!(right.as_const().map(|c| c.ty), Some(Type::DOUBLE));
    }

    #[test]
    fn test_unary_plus_becomes_conversion() {
        let mut b = FunctionBuilder::new("f");
        let x = b.formal("x");
        b.switch_to(b.entry());
        let t0 = b.temp();
        b.mov(t0, Expr::unop(AluOp::UPlus, x));
        b.ret(Expr::binop(AluOp::Sub, t0.into(), Expr::int(1)));
        let mut f = b.finish().unwrap();
        let (mut du, mut worklist) = typed(&mut f);
        TypePropagation::new(&mut du, &mut worklist).run(&mut f);

        let plus = f
            .statements(f.entry())
            .filter_map(|s| s.as_move())
            .find(|m| m.target.ty() == Type::DOUBLE)
            .unwrap();
        assert!(matches!(&plus.source, Expr::Convert { expr, ty: Type::DOUBLE } if expr.ty() == Type::VAR));
    }

    #[test]
    fn test_numeric_condition_gets_bool() {
        let mut b = FunctionBuilder::new("f");
        let (then, other) = (b.block(), b.block());
        b.switch_to(b.entry());
        let t0 = b.temp();
        b.mov(t0, Expr::number(2.5));
        b.cjump(t0.into(), then, other);
        b.switch_to(then);
        b.ret(Expr::int(1));
        b.switch_to(other);
        b.ret(Expr::int(0));
        let mut f = b.finish().unwrap();
        let (mut du, mut worklist) = typed(&mut f);
        assert_eq!(TypePropagation::new(&mut du, &mut worklist).run(&mut f), 1);

        let cond = match &f.stmt(f.terminator(f.entry()).unwrap()).kind {
            StmtKind::CJump(cj) => cj.cond.clone(),
            _ => unreachable!(),
        };
        assert_eq!(cond.ty(), Type::BOOL);
        let t = cond.as_temp().unwrap();
        let def = f.stmt(du.def_stmt(t).unwrap()).as_move().unwrap();
        assert!(matches!(def.source, Expr::Convert { ty: Type::BOOL, .. }));
    }
}
