//! Expressions and SSA values.
//!
//! The expression set is closed: every pass matches exhaustively on [`Expr`],
//! so adding a variant forces every consumer to decide how to handle it.
//! Operands of operators are themselves expressions, but after lowering they
//! are always "simple" (temps, constants, strings, argument or local slots).

use std::{fmt, hash};

use strum::{EnumIter, FromRepr};

use crate::ir::Type;

/// Storage class of a [`Temp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TempKind {
    /// A virtual register. Before and during SSA form every temp is one.
    VirtualRegister,
    /// A machine register assigned by the register allocator.
    PhysicalRegister,
    /// A slot in the function's stack frame.
    StackSlot,
}

/// An SSA value, or after allocation, a storage location.
///
/// Two temps are the same value when kind and index match; the type is
/// metadata and does not take part in equality or hashing.
#[derive(Debug, Clone, Copy)]
pub struct Temp {
    /// Storage class.
    pub kind: TempKind,
    /// Index within the storage class.
    pub index: u32,
    /// Discovered type.
    pub ty: Type,
}

impl Temp {
    /// Creates an untyped virtual register.
    #[must_use]
    pub const fn virtual_reg(index: u32) -> Self {
        Self {
            kind: TempKind::VirtualRegister,
            index,
            ty: Type::UNKNOWN,
        }
    }

    /// Creates a stack-slot temp of the given type.
    #[must_use]
    pub const fn stack_slot(index: u32, ty: Type) -> Self {
        Self {
            kind: TempKind::StackSlot,
            index,
            ty,
        }
    }

    /// Creates a physical-register temp of the given type.
    #[must_use]
    pub const fn physical(index: u32, ty: Type) -> Self {
        Self {
            kind: TempKind::PhysicalRegister,
            index,
            ty,
        }
    }

    /// Returns a copy with the type replaced.
    #[must_use]
    pub const fn with_type(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    /// Returns `true` for values held in floating-point registers.
    #[must_use]
    pub fn is_fp(&self) -> bool {
        self.ty == Type::DOUBLE
    }
}

impl PartialEq for Temp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.index == other.index
    }
}

impl Eq for Temp {}

impl hash::Hash for Temp {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            TempKind::VirtualRegister => "%",
            TempKind::PhysicalRegister if self.is_fp() => "fr",
            TempKind::PhysicalRegister => "r",
            TempKind::StackSlot => "$",
        };
        write!(f, "{}{}{}", self.ty, prefix, self.index)
    }
}

/// A primitive constant. Numbers, booleans, `null` and `undefined` are all
/// stored as a double plus a type tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Const {
    /// Representation of the value.
    pub ty: Type,
    /// Numeric payload; `1.0`/`0.0` for booleans, `NaN` for null and undefined.
    pub value: f64,
}

impl Const {
    /// A double constant.
    #[must_use]
    pub const fn number(value: f64) -> Self {
        Self {
            ty: Type::DOUBLE,
            value,
        }
    }

    /// A signed 32-bit integer constant.
    #[must_use]
    pub const fn int32(value: i32) -> Self {
        Self {
            ty: Type::SINT32,
            value: value as f64,
        }
    }

    /// A boolean constant.
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        Self {
            ty: Type::BOOL,
            value: if value { 1.0 } else { 0.0 },
        }
    }

    /// The `undefined` constant.
    #[must_use]
    pub const fn undefined() -> Self {
        Self {
            ty: Type::UNDEFINED,
            value: f64::NAN,
        }
    }

    /// The `null` constant.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ty: Type::NULL,
            value: f64::NAN,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ty == Type::UNDEFINED {
            f.write_str("undefined")
        } else if self.ty == Type::NULL {
            f.write_str("null")
        } else if self.ty == Type::BOOL {
            write!(f, "{}", self.value != 0.0)
        } else {
            f.write_str(&crate::utils::number_to_string(self.value))
        }
    }
}

/// Kind of a frame slot addressed by [`ArgLocal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgLocalKind {
    /// A formal parameter.
    Formal,
    /// A declared local variable.
    Local,
}

/// A formal parameter or local variable slot, as produced by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgLocal {
    /// Parameter or local.
    pub kind: ArgLocalKind,
    /// Slot index.
    pub index: u32,
}

/// Names with a fixed meaning to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `typeof <operand>`
    Typeof,
    /// `throw <operand>`
    Throw,
    /// Reads the pending exception inside a catch block.
    CaughtException,
}

/// A name lookup in the enclosing scopes.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    /// Identifier, absent for builtins.
    pub id: Option<String>,
    /// Builtin operation this name denotes, if any.
    pub builtin: Option<Builtin>,
    /// Lookup is statically known not to run user code or throw.
    pub free_of_side_effects: bool,
}

/// Unary, binary and comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, FromRepr)]
#[repr(u8)]
pub enum AluOp {
    /// `!x`
    Not,
    /// `-x`
    UMinus,
    /// `+x`
    UPlus,
    /// `~x`
    Compl,
    /// `x + 1` in place
    Increment,
    /// `x - 1` in place
    Decrement,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `>>>`
    URShift,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `===`
    StrictEqual,
    /// `!==`
    StrictNotEqual,
    /// `instanceof`
    InstanceOf,
    /// `in`
    In,
    /// `&&` on already-evaluated operands
    And,
    /// `||` on already-evaluated operands
    Or,
}

impl AluOp {
    /// Source-level spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            AluOp::Not => "!",
            AluOp::UMinus => "-",
            AluOp::UPlus => "+",
            AluOp::Compl => "~",
            AluOp::Increment => "++",
            AluOp::Decrement => "--",
            AluOp::BitAnd => "&",
            AluOp::BitOr => "|",
            AluOp::BitXor => "^",
            AluOp::Add => "+",
            AluOp::Sub => "-",
            AluOp::Mul => "*",
            AluOp::Div => "/",
            AluOp::Mod => "%",
            AluOp::LShift => "<<",
            AluOp::RShift => ">>",
            AluOp::URShift => ">>>",
            AluOp::Gt => ">",
            AluOp::Lt => "<",
            AluOp::Ge => ">=",
            AluOp::Le => "<=",
            AluOp::Equal => "==",
            AluOp::NotEqual => "!=",
            AluOp::StrictEqual => "===",
            AluOp::StrictNotEqual => "!==",
            AluOp::InstanceOf => "instanceof",
            AluOp::In => "in",
            AluOp::And => "&&",
            AluOp::Or => "||",
        }
    }

    /// Relational and equality operators that yield a boolean from two numbers.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            AluOp::Gt
                | AluOp::Lt
                | AluOp::Ge
                | AluOp::Le
                | AluOp::Equal
                | AluOp::NotEqual
                | AluOp::StrictEqual
                | AluOp::StrictNotEqual
        )
    }

    /// Bitwise and shift operators.
    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            AluOp::BitAnd
                | AluOp::BitOr
                | AluOp::BitXor
                | AluOp::LShift
                | AluOp::RShift
                | AluOp::URShift
        )
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A primitive constant.
    Const(Const),
    /// A string literal.
    String(String),
    /// A regular expression literal.
    RegExp {
        /// Pattern source.
        pattern: String,
        /// Flag characters (`g`, `i`, `m`).
        flags: String,
    },
    /// A scope lookup.
    Name(Name),
    /// An SSA value or allocated location.
    Temp(Temp),
    /// A parameter or local-variable slot.
    ArgLocal(ArgLocal),
    /// Creation of a nested function, by module-level function index.
    Closure(u32),
    /// Representation change.
    Convert {
        /// Converted value.
        expr: Box<Expr>,
        /// Target representation.
        ty: Type,
    },
    /// Unary operator.
    Unop {
        /// Operator.
        op: AluOp,
        /// Operand.
        expr: Box<Expr>,
        /// Result representation.
        ty: Type,
    },
    /// Binary operator.
    Binop {
        /// Operator.
        op: AluOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
        /// Result representation.
        ty: Type,
    },
    /// Function call.
    Call {
        /// Callee.
        base: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Constructor call.
    New {
        /// Constructor.
        base: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Element access `base[index]`.
    Subscript {
        /// Object.
        base: Box<Expr>,
        /// Key.
        index: Box<Expr>,
    },
    /// Property access `base.name`.
    Member {
        /// Object.
        base: Box<Expr>,
        /// Property name.
        name: String,
        /// Read is statically known not to run user code or throw.
        free_of_side_effects: bool,
    },
}

impl Expr {
    /// Number constant.
    #[must_use]
    pub fn number(value: f64) -> Self {
        Expr::Const(Const::number(value))
    }

    /// Integer constant.
    #[must_use]
    pub fn int(value: i32) -> Self {
        Expr::Const(Const::int32(value))
    }

    /// Boolean constant.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Expr::Const(Const::boolean(value))
    }

    /// The `undefined` constant.
    #[must_use]
    pub fn undefined() -> Self {
        Expr::Const(Const::undefined())
    }

    /// String literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Expr::String(value.into())
    }

    /// Formal parameter slot.
    #[must_use]
    pub fn formal(index: u32) -> Self {
        Expr::ArgLocal(ArgLocal {
            kind: ArgLocalKind::Formal,
            index,
        })
    }

    /// Local variable slot.
    #[must_use]
    pub fn local(index: u32) -> Self {
        Expr::ArgLocal(ArgLocal {
            kind: ArgLocalKind::Local,
            index,
        })
    }

    /// A plain identifier lookup.
    #[must_use]
    pub fn name(id: impl Into<String>) -> Self {
        Expr::Name(Name {
            id: Some(id.into()),
            builtin: None,
            free_of_side_effects: false,
        })
    }

    /// A builtin name.
    #[must_use]
    pub fn builtin(builtin: Builtin) -> Self {
        Expr::Name(Name {
            id: None,
            builtin: Some(builtin),
            free_of_side_effects: false,
        })
    }

    /// Unary operator node with unknown result type.
    #[must_use]
    pub fn unop(op: AluOp, expr: Expr) -> Self {
        Expr::Unop {
            op,
            expr: Box::new(expr),
            ty: Type::UNKNOWN,
        }
    }

    /// Binary operator node with unknown result type.
    #[must_use]
    pub fn binop(op: AluOp, left: Expr, right: Expr) -> Self {
        Expr::Binop {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty: Type::UNKNOWN,
        }
    }

    /// Conversion node.
    #[must_use]
    pub fn convert(expr: Expr, ty: Type) -> Self {
        Expr::Convert {
            expr: Box::new(expr),
            ty,
        }
    }

    /// Call node.
    #[must_use]
    pub fn call(base: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            base: Box::new(base),
            args,
        }
    }

    /// Constructor call node.
    #[must_use]
    pub fn new_object(base: Expr, args: Vec<Expr>) -> Self {
        Expr::New {
            base: Box::new(base),
            args,
        }
    }

    /// Property access node.
    #[must_use]
    pub fn member(base: Expr, name: impl Into<String>) -> Self {
        Expr::Member {
            base: Box::new(base),
            name: name.into(),
            free_of_side_effects: false,
        }
    }

    /// Element access node.
    #[must_use]
    pub fn subscript(base: Expr, index: Expr) -> Self {
        Expr::Subscript {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    /// The representation this expression produces.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Expr::Const(c) => c.ty,
            Expr::String(_) => Type::STRING,
            Expr::Temp(t) => t.ty,
            Expr::Convert { ty, .. } | Expr::Unop { ty, .. } | Expr::Binop { ty, .. } => *ty,
            Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_)
            | Expr::Call { .. }
            | Expr::New { .. }
            | Expr::Subscript { .. }
            | Expr::Member { .. } => Type::VAR,
        }
    }

    /// Overwrites the type of typed nodes. Nodes with a fixed type are left alone.
    pub fn set_ty(&mut self, new_ty: Type) {
        match self {
            Expr::Const(c) => c.ty = new_ty,
            Expr::Temp(t) => t.ty = new_ty,
            Expr::Convert { ty, .. } | Expr::Unop { ty, .. } | Expr::Binop { ty, .. } => {
                *ty = new_ty;
            }
            _ => {}
        }
    }

    /// Returns the temp if this is a temp.
    #[must_use]
    pub fn as_temp(&self) -> Option<&Temp> {
        match self {
            Expr::Temp(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the constant if this is a constant.
    #[must_use]
    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Expr::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Calls `f` for every temp read by this expression, in evaluation order.
    pub fn for_each_temp(&self, f: &mut impl FnMut(&Temp)) {
        match self {
            Expr::Temp(t) => f(t),
            Expr::Const(_)
            | Expr::String(_)
            | Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_) => {}
            Expr::Convert { expr, .. } | Expr::Unop { expr, .. } => expr.for_each_temp(f),
            Expr::Binop { left, right, .. } => {
                left.for_each_temp(f);
                right.for_each_temp(f);
            }
            Expr::Call { base, args } | Expr::New { base, args } => {
                base.for_each_temp(f);
                args.iter().for_each(|a| a.for_each_temp(f));
            }
            Expr::Subscript { base, index } => {
                base.for_each_temp(f);
                index.for_each_temp(f);
            }
            Expr::Member { base, .. } => base.for_each_temp(f),
        }
    }

    /// Calls `f` for every temp in this expression, allowing it to be rewritten.
    pub fn for_each_temp_mut(&mut self, f: &mut impl FnMut(&mut Temp)) {
        match self {
            Expr::Temp(t) => f(t),
            Expr::Const(_)
            | Expr::String(_)
            | Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_) => {}
            Expr::Convert { expr, .. } | Expr::Unop { expr, .. } => expr.for_each_temp_mut(f),
            Expr::Binop { left, right, .. } => {
                left.for_each_temp_mut(f);
                right.for_each_temp_mut(f);
            }
            Expr::Call { base, args } | Expr::New { base, args } => {
                base.for_each_temp_mut(f);
                args.iter_mut().for_each(|a| a.for_each_temp_mut(f));
            }
            Expr::Subscript { base, index } => {
                base.for_each_temp_mut(f);
                index.for_each_temp_mut(f);
            }
            Expr::Member { base, .. } => base.for_each_temp_mut(f),
        }
    }

    /// Pre-order walk over this expression and its operands.
    ///
    /// `f` may rewrite the node it is given; returning `true` stops the walk
    /// from descending into that node's (possibly new) operands.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr) -> bool) {
        if f(self) {
            return;
        }
        match self {
            Expr::Const(_)
            | Expr::String(_)
            | Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::Temp(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_) => {}
            Expr::Convert { expr, .. } | Expr::Unop { expr, .. } => expr.walk_mut(f),
            Expr::Binop { left, right, .. } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            Expr::Call { base, args } | Expr::New { base, args } => {
                base.walk_mut(f);
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            Expr::Subscript { base, index } => {
                base.walk_mut(f);
                index.walk_mut(f);
            }
            Expr::Member { base, .. } => base.walk_mut(f),
        }
    }

    /// Collects the temps read by this expression.
    #[must_use]
    pub fn temps(&self) -> Vec<Temp> {
        let mut temps = Vec::new();
        self.for_each_temp(&mut |t| temps.push(*t));
        temps
    }

    /// Replaces every occurrence of `target` with a clone of `replacement`.
    ///
    /// Returns the number of occurrences replaced.
    pub fn replace_temp(&mut self, target: &Temp, replacement: &Expr) -> usize {
        match self {
            Expr::Temp(t) if t == target => {
                *self = replacement.clone();
                1
            }
            Expr::Temp(_)
            | Expr::Const(_)
            | Expr::String(_)
            | Expr::RegExp { .. }
            | Expr::Name(_)
            | Expr::ArgLocal(_)
            | Expr::Closure(_) => 0,
            Expr::Convert { expr, .. } | Expr::Unop { expr, .. } => {
                expr.replace_temp(target, replacement)
            }
            Expr::Binop { left, right, .. } => {
                left.replace_temp(target, replacement) + right.replace_temp(target, replacement)
            }
            Expr::Call { base, args } | Expr::New { base, args } => {
                base.replace_temp(target, replacement)
                    + args
                        .iter_mut()
                        .map(|a| a.replace_temp(target, replacement))
                        .sum::<usize>()
            }
            Expr::Subscript { base, index } => {
                base.replace_temp(target, replacement) + index.replace_temp(target, replacement)
            }
            Expr::Member { base, .. } => base.replace_temp(target, replacement),
        }
    }
}

impl From<Temp> for Expr {
    fn from(temp: Temp) -> Self {
        Expr::Temp(temp)
    }
}

impl From<Const> for Expr {
    fn from(c: Const) -> Self {
        Expr::Const(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_identity_ignores_type() {
        let a = Temp::virtual_reg(3);
        let b = a.with_type(Type::DOUBLE);
        assert_eq!(a, b);
        assert_ne!(a, Temp::stack_slot(3, Type::UNKNOWN));
        assert!(b.is_fp());
    }

    #[test]
    fn test_expr_types() {
        assert_eq!(Expr::int(1).ty(), Type::SINT32);
        assert_eq!(Expr::string("a").ty(), Type::STRING);
        assert_eq!(Expr::name("x").ty(), Type::VAR);
        assert_eq!(Expr::convert(Expr::int(1), Type::DOUBLE).ty(), Type::DOUBLE);
    }

    #[test]
    fn test_replace_temp_counts_occurrences() {
        let t = Temp::virtual_reg(1);
        let mut e = Expr::call(
            Expr::name("f"),
            vec![Expr::Temp(t), Expr::binop(AluOp::Add, Expr::Temp(t), Expr::int(1))],
        );
        assert_eq!(e.replace_temp(&t, &Expr::int(7)), 2);
        assert!(e.temps().is_empty());
    }

    #[test]
    fn test_const_display() {
        assert_eq!(Const::boolean(true).to_string(), "true");
        assert_eq!(Const::undefined().to_string(), "undefined");
        assert_eq!(Const::number(2.5).to_string(), "2.5");
        assert_eq!(Const::int32(-3).to_string(), "-3");
    }
}
