//! Forward type inference.

use log::{debug, warn};

use crate::{
    analysis::DefUses,
    compiler::StatementWorklist,
    ir::{AluOp, Expr, Function, Stmt, StmtId, StmtKind, Temp, Type},
    utils::{is_exact_int32, is_exact_uint32},
};

/// Upper bound on the visits per statement before inference gives up and
/// keeps what it has. The lattice is shallow, so real functions settle long
/// before this.
const MAX_VISITS_PER_STATEMENT: usize = 32;

/// Type of an expression plus whether every operand it depends on was known.
#[derive(Debug, Clone, Copy)]
struct Typing {
    ty: Type,
    fully_typed: bool,
}

impl Typing {
    fn new(ty: Type) -> Self {
        Self {
            ty,
            fully_typed: !ty.is_unknown(),
        }
    }
}

/// Worklist-driven forward inference of temp types.
///
/// Statements that could not be typed completely are pushed back and retried
/// after their operands change. When the list runs dry, every discovered type
/// is written into the IR with [`propagate_temp_type`].
pub struct TypeInference<'a> {
    def_uses: &'a mut DefUses,
    worklist: &'a mut StatementWorklist,
    temp_types: Vec<Type>,
    current: Option<StmtId>,
}

impl<'a> TypeInference<'a> {
    /// Creates an inference run over the statements queued in `worklist`.
    pub fn new(def_uses: &'a mut DefUses, worklist: &'a mut StatementWorklist) -> Self {
        let temp_types = vec![Type::UNKNOWN; def_uses.temp_count()];
        Self {
            def_uses,
            worklist,
            temp_types,
            current: None,
        }
    }

    /// Types every statement, then propagates the temp types into the IR.
    ///
    /// Returns the discovered type of every temp, indexed by temp index.
    pub fn run(mut self, function: &mut Function) -> Vec<Type> {
        let limit = MAX_VISITS_PER_STATEMENT * function.statement_count().max(1);
        let mut visits = 0usize;
        let mut last = None;
        while let Some(id) = self.worklist.take_next(last) {
            last = Some(id);
            if matches!(function.stmt(id).kind, StmtKind::Jump(_)) {
                continue;
            }
            visits += 1;
            if visits > limit {
                warn!("{}: type inference did not settle, keeping partial types", function.name);
                break;
            }

            let mut stmt = function.stmt(id).clone();
            self.current = Some(id);
            let fully_typed = self.type_stmt(&mut stmt);
            self.current = None;
            function.stmt_mut(id).kind = stmt.kind;
            if !fully_typed {
                self.worklist.push(id);
            }
        }

        for temp in self.def_uses.temps() {
            let ty = self.temp_types.get(temp.index as usize).copied().unwrap_or_default();
            if !ty.is_unknown() {
                propagate_temp_type(function, self.def_uses, &temp, ty);
            }
        }
        debug!("{}: typed {visits} statement visits", function.name);
        self.temp_types
    }

    fn type_stmt(&mut self, stmt: &mut Stmt) -> bool {
        match &mut stmt.kind {
            StmtKind::Exp(e) | StmtKind::Ret(e) => self.type_expr(e).fully_typed,
            StmtKind::CJump(cj) => self.type_expr(&mut cj.cond).fully_typed,
            StmtKind::Jump(_) => true,
            StmtKind::Move(m) => {
                if let Expr::Temp(target) = m.target {
                    let source = self.type_expr(&mut m.source);
                    self.set_temp_type(&target, source.ty);
                    source.fully_typed
                } else {
                    let source = self.type_expr(&mut m.source);
                    let target = self.type_expr(&mut m.target);
                    source.fully_typed && target.fully_typed
                }
            }
            StmtKind::Phi(phi) => {
                let Some((first, rest)) = phi.incoming.split_first_mut() else {
                    return true;
                };
                let mut typing = self.type_expr(first);
                for incoming in rest {
                    let ty = self.type_expr(incoming);
                    if !ty.fully_typed && typing.fully_typed {
                        // retried once the missing operand is known
                        typing.fully_typed = false;
                        break;
                    }
                    typing.ty |= ty.ty;
                    typing.fully_typed &= ty.fully_typed;
                }
                let target = phi.target;
                self.set_temp_type(&target, typing.ty.merge_phi());
                typing.fully_typed
            }
        }
    }

    /// Types `e` and records the result on the node.
    fn type_expr(&mut self, e: &mut Expr) -> Typing {
        let typing = self.visit(e);
        if !typing.ty.is_unknown() {
            match e {
                Expr::Temp(t) => {
                    let t = *t;
                    self.set_temp_type(&t, typing.ty);
                }
                _ => e.set_ty(typing.ty),
            }
        }
        typing
    }

    fn visit(&mut self, e: &mut Expr) -> Typing {
        match e {
            Expr::Const(c) => {
                if c.ty.is_number() {
                    if is_exact_int32(c.value) {
                        Typing::new(Type::SINT32)
                    } else if is_exact_uint32(c.value) {
                        Typing::new(Type::UINT32)
                    } else {
                        Typing::new(c.ty)
                    }
                } else {
                    Typing::new(c.ty)
                }
            }
            Expr::String(_) => Typing::new(Type::STRING),
            Expr::RegExp { .. } | Expr::Name(_) | Expr::ArgLocal(_) | Expr::Closure(_) => Typing::new(Type::VAR),
            Expr::Temp(t) => Typing::new(self.temp_type(t)),
            Expr::Convert { ty, .. } => Typing::new(*ty),
            Expr::Unop { op, expr, .. } => {
                let mut typing = self.type_expr(expr);
                typing.ty = match op {
                    AluOp::UPlus | AluOp::UMinus | AluOp::Increment | AluOp::Decrement => Type::DOUBLE,
                    AluOp::Compl => Type::SINT32,
                    AluOp::Not => Type::BOOL,
                    _ => {
                        debug_assert!(false, "{op:?} is not a unary operator");
                        Type::VAR
                    }
                };
                typing
            }
            Expr::Binop { op, left, right, .. } => {
                let left = self.type_expr(left);
                let right = self.type_expr(right);
                let ty = binop_type(*op, left.ty, right.ty);
                Typing {
                    ty,
                    fully_typed: left.fully_typed && right.fully_typed,
                }
            }
            Expr::Call { base, args } | Expr::New { base, args } => {
                let mut fully_typed = self.type_expr(base).fully_typed;
                for arg in args {
                    fully_typed &= self.type_expr(arg).fully_typed;
                }
                Typing {
                    ty: Type::VAR,
                    fully_typed,
                }
            }
            Expr::Subscript { base, index } => {
                let fully_typed = self.type_expr(base).fully_typed && self.type_expr(index).fully_typed;
                Typing {
                    ty: Type::VAR,
                    fully_typed,
                }
            }
            Expr::Member { base, .. } => Typing {
                ty: Type::VAR,
                fully_typed: self.type_expr(base).fully_typed,
            },
        }
    }

    /// A temp without a definition reads as `undefined`.
    fn temp_type(&mut self, temp: &Temp) -> Type {
        if self.def_uses.def_stmt(temp).is_none() {
            return Type::UNDEFINED;
        }
        self.temp_types.get(temp.index as usize).copied().unwrap_or_default()
    }

    /// Records a new type for `temp` and re-queues its users.
    fn set_temp_type(&mut self, temp: &Temp, ty: Type) {
        let idx = temp.index as usize;
        if self.temp_types.len() <= idx {
            self.temp_types.resize(idx + 1, Type::UNKNOWN);
        }
        if self.temp_types[idx] == ty {
            return;
        }
        self.temp_types[idx] = ty;
        for &user in self.def_uses.uses(temp) {
            if Some(user) != self.current {
                self.worklist.push(user);
            }
        }
    }
}

/// Result type of a binary operator given its operand types.
fn binop_type(op: AluOp, left: Type, right: Type) -> Type {
    match op {
        AluOp::Add => {
            let generic = Type::VAR | Type::OBJECT;
            if left.intersects(generic) || right.intersects(generic) {
                Type::VAR
            } else if left.contains(Type::STRING) || right.contains(Type::STRING) {
                Type::STRING
            } else if !left.is_unknown() && !right.is_unknown() {
                Type::DOUBLE
            } else {
                Type::UNKNOWN
            }
        }
        AluOp::Sub | AluOp::Mul | AluOp::Div | AluOp::Mod => Type::DOUBLE,
        AluOp::BitAnd | AluOp::BitOr | AluOp::BitXor | AluOp::LShift | AluOp::RShift => Type::SINT32,
        AluOp::URShift => Type::UINT32,
        AluOp::Gt
        | AluOp::Lt
        | AluOp::Ge
        | AluOp::Le
        | AluOp::Equal
        | AluOp::NotEqual
        | AluOp::StrictEqual
        | AluOp::StrictNotEqual
        | AluOp::And
        | AluOp::Or
        | AluOp::InstanceOf
        | AluOp::In => Type::BOOL,
        AluOp::Not | AluOp::UMinus | AluOp::UPlus | AluOp::Compl | AluOp::Increment | AluOp::Decrement => {
            debug_assert!(false, "{op:?} is not a binary operator");
            Type::VAR
        }
    }
}

/// Writes `ty` onto every occurrence of `temp` in its definition and uses.
pub fn propagate_temp_type(function: &mut Function, def_uses: &mut DefUses, temp: &Temp, ty: Type) {
    let mut stmts: Vec<StmtId> = def_uses.def_stmt(temp).into_iter().collect();
    stmts.extend_from_slice(def_uses.uses(temp));
    for id in stmts {
        function.stmt_mut(id).for_each_temp_mut(&mut |t| {
            if t == temp {
                t.ty = ty;
            }
        });
    }
    def_uses.set_type(&temp.with_type(ty));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BlockId, FunctionBuilder},
        test::{sum_loop, to_ssa},
    };

    fn infer(function: &mut Function) -> (DefUses, Vec<Type>) {
        let (_, mut du) = to_ssa(function);
        let mut worklist = StatementWorklist::new(function);
        let types = TypeInference::new(&mut du, &mut worklist).run(function);
        (du, types)
    }

    #[test]
    fn test_loop_variables_become_double() {
        let mut f = sum_loop();
        let (_, types) = infer(&mut f);

        let header = BlockId::new(1);
        let phis = f.phis(header);
        assert_eq!(phis.len(), 2);
        for phi in phis {
            let target = f.stmt(phi).as_phi().unwrap().target;
            assert_eq!(target.ty, Type::DOUBLE);
            assert_eq!(types[target.index as usize], Type::DOUBLE);
        }

        // the formal stays generic, the comparison is boolean
        let cond = match &f.stmt(f.terminator(header).unwrap()).kind {
            StmtKind::CJump(cj) => cj.cond.clone(),
            other => panic!("unexpected terminator {other:?}"),
        };
        assert_eq!(cond.ty(), Type::BOOL);
        let Expr::Binop { right, .. } = cond else {
            panic!("condition is not a comparison");
        };
        assert_eq!(right.ty(), Type::VAR);
    }

    #[test]
    fn test_constants_take_narrowest_type() {
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let (t0, t1, t2, t3) = (b.temp(), b.temp(), b.temp(), b.temp());
        b.mov(t0, Expr::number(7.0));
        b.mov(t1, Expr::number(3_000_000_000.0));
        b.mov(t2, Expr::number(0.5));
        b.mov(t3, Expr::binop(AluOp::URShift, t0.into(), t1.into()));
        b.ret(Expr::binop(AluOp::Add, t2.into(), t3.into()));
        let mut f = b.finish().unwrap();
        let (_, types) = infer(&mut f);
        assert_eq!(&types[..4], &[Type::SINT32, Type::UINT32, Type::DOUBLE, Type::UINT32]);

        let ret = f.stmt(f.terminator(f.entry()).unwrap());
        assert!(matches!(&ret.kind, StmtKind::Ret(e) if e.ty() == Type::DOUBLE));
    }

    #[test]
    fn test_add_typing() {
        assert_eq!(binop_type(AluOp::Add, Type::SINT32, Type::STRING), Type::STRING);
        assert_eq!(binop_type(AluOp::Add, Type::STRING, Type::VAR), Type::VAR);
        assert_eq!(binop_type(AluOp::Add, Type::OBJECT, Type::DOUBLE), Type::VAR);
        assert_eq!(binop_type(AluOp::Add, Type::SINT32, Type::UNKNOWN), Type::UNKNOWN);
        assert_eq!(binop_type(AluOp::Add, Type::BOOL, Type::SINT32), Type::DOUBLE);
        assert_eq!(binop_type(AluOp::Mod, Type::SINT32, Type::SINT32), Type::DOUBLE);
        assert_eq!(binop_type(AluOp::In, Type::STRING, Type::VAR), Type::BOOL);
    }

    #[test]
    fn test_undefined_read() {
        // `a` is read before any assignment
        let mut f = Function::new("f");
        let b0 = f.new_block(None);
        let a = f.new_temp();
        let t = f.new_temp();
        f.append(
            b0,
            StmtKind::Move(crate::ir::Move {
                target: Expr::Temp(t),
                source: Expr::Temp(a),
                swap: false,
            }),
        );
        f.append(b0, StmtKind::Ret(Expr::Temp(t)));
        let mut du = DefUses::build(&f);
        let mut worklist = StatementWorklist::new(&f);
        let types = TypeInference::new(&mut du, &mut worklist).run(&mut f);
        assert_eq!(types[t.index as usize], Type::UNDEFINED);
    }
}
