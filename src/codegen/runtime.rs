//! The boundary between generated code and the engine.
//!
//! Everything generated code cannot do inline goes through a
//! [`RuntimeCall`]: generic operators on values of unknown type, property
//! and name access, calls, construction and throwing. Each call has a fixed
//! arity (or takes a trailing argument list) and a flag telling whether it
//! can raise an exception. The assembler follows calls that can with an
//! exception check; the executor treats a throw from any other call as
//! broken code.
//!
//! [`PrimitiveRuntime`] is a small engine over primitive values and
//! string-keyed objects, enough to run compiled functions in tests and
//! benchmarks. Embedders implement [`Runtime`] over their own object model.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use strum::{Display, EnumCount, EnumIter, FromRepr};

use crate::{
    compiler::fold::{fold_binop, fold_unop},
    ir::{AluOp, Const, Type},
    utils::{number_to_bool, number_to_string, to_int32, to_uint32},
};

/// A boxed runtime value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 32-bit integer.
    Int(i32),
    /// An unsigned 32-bit integer.
    UInt(u32),
    /// A double.
    Double(f64),
    /// An immutable string.
    String(Arc<str>),
    /// A handle to an object owned by the runtime.
    Object(u32),
    /// A handle to a function owned by the runtime.
    Function(u32),
}

impl Value {
    /// Boxes a primitive constant.
    #[must_use]
    pub fn from_const(c: &Const) -> Self {
        match c.ty {
            Type::UNDEFINED => Value::Undefined,
            Type::NULL => Value::Null,
            Type::BOOL => Value::Bool(c.value != 0.0),
            Type::SINT32 => Value::Int(to_int32(c.value)),
            Type::UINT32 => Value::UInt(to_uint32(c.value)),
            _ => Value::Double(c.value),
        }
    }

    /// The value as a constant, if it is a primitive other than a string.
    #[must_use]
    pub fn to_const(&self) -> Option<Const> {
        Some(match self {
            Value::Undefined => Const::undefined(),
            Value::Null => Const::null(),
            Value::Bool(b) => Const::boolean(*b),
            Value::Int(i) => Const::int32(*i),
            Value::UInt(u) => Const {
                ty: Type::UINT32,
                value: f64::from(*u),
            },
            Value::Double(d) => Const::number(*d),
            Value::String(_) | Value::Object(_) | Value::Function(_) => return None,
        })
    }

    /// The representation this value has at run time.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Value::Undefined => Type::UNDEFINED,
            Value::Null => Type::NULL,
            Value::Bool(_) => Type::BOOL,
            Value::Int(_) => Type::SINT32,
            Value::UInt(_) => Type::UINT32,
            Value::Double(_) => Type::DOUBLE,
            Value::String(_) => Type::STRING,
            Value::Object(_) | Value::Function(_) => Type::OBJECT,
        }
    }

    /// Returns `true` for strings, objects and functions.
    #[must_use]
    pub fn is_boxed(&self) -> bool {
        matches!(self, Value::String(_) | Value::Object(_) | Value::Function(_))
    }

    /// `ToNumber`. Objects convert to `NaN`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Object(_) | Value::Function(_) => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(i) => f64::from(*i),
            Value::UInt(u) => f64::from(*u),
            Value::Double(d) => *d,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// `ToBoolean`.
    #[must_use]
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::Double(d) => number_to_bool(*d),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// The `typeof` result.
    #[must_use]
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::UInt(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// Converts to one of the unboxed representations.
    ///
    /// Boxed targets keep the value as it is.
    #[must_use]
    pub fn convert(&self, ty: Type) -> Value {
        match ty {
            Type::BOOL => Value::Bool(self.to_boolean()),
            Type::SINT32 => Value::Int(to_int32(self.to_number())),
            Type::UINT32 => Value::UInt(to_uint32(self.to_number())),
            Type::DOUBLE => Value::Double(self.to_number()),
            _ => self.clone(),
        }
    }

    fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) | (Value::Function(a), Value::Function(b)) => {
                a == b
            }
            (a, b) => match (a.to_const(), b.to_const()) {
                (Some(l), Some(r)) => {
                    fold_binop(AluOp::StrictEqual, &l, &r, Type::BOOL).is_some_and(|c| c.value != 0.0)
                }
                _ => false,
            },
        }
    }

    fn loose_equals(&self, other: &Value) -> bool {
        let nullish = |v: &Value| matches!(v, Value::Undefined | Value::Null);
        match (self, other) {
            (a, b) if nullish(a) || nullish(b) => nullish(a) && nullish(b),
            (Value::String(_), Value::String(_))
            | (Value::Object(_), Value::Object(_))
            | (Value::Function(_), Value::Function(_)) => self.strict_equals(other),
            (Value::Object(_) | Value::Function(_), _) | (_, Value::Object(_) | Value::Function(_)) => {
                false
            }
            (a, b) => a.to_number() == b.to_number(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Double(d) => f.write_str(&number_to_string(*d)),
            Value::String(s) => f.write_str(s),
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(id) => write!(f, "function#{id}"),
        }
    }
}

/// Evaluates a unary operator over one value.
///
/// `result_ty` is the type the operator node was given; generic calls pass
/// [`Type::VAR`]. Returns `None` for operators that are not unary.
#[must_use]
pub fn eval_unop(op: AluOp, operand: &Value, result_ty: Type) -> Option<Value> {
    let c = match operand.to_const() {
        Some(c) if c.ty.is_number() || c.ty == Type::BOOL => c,
        _ if op == AluOp::Not => return Some(Value::Bool(!operand.to_boolean())),
        _ => Const::number(operand.to_number()),
    };
    fold_unop(op, &c, result_ty).map(|c| Value::from_const(&c))
}

/// Evaluates a binary operator over two values.
///
/// Primitive operands fold exactly like constants do at compile time.
/// Strings concatenate under `+` and compare by code units; objects are
/// compared by identity and are `NaN` anywhere else. `instanceof`, `in` and
/// the logical operators need the engine and return `None`.
#[must_use]
pub fn eval_binop(op: AluOp, left: &Value, right: &Value, result_ty: Type) -> Option<Value> {
    if matches!(op, AluOp::InstanceOf | AluOp::In | AluOp::And | AluOp::Or) {
        return None;
    }
    if let (Some(l), Some(r)) = (left.to_const(), right.to_const()) {
        return fold_binop(op, &l, &r, result_ty).map(|c| Value::from_const(&c));
    }

    let result = match op {
        AluOp::Add if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
            Value::String(format!("{left}{right}").into())
        }
        AluOp::StrictEqual => Value::Bool(left.strict_equals(right)),
        AluOp::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
        AluOp::Equal => Value::Bool(left.loose_equals(right)),
        AluOp::NotEqual => Value::Bool(!left.loose_equals(right)),
        AluOp::Gt | AluOp::Lt | AluOp::Ge | AluOp::Le => {
            if let (Value::String(l), Value::String(r)) = (left, right) {
                let ordering = l.encode_utf16().cmp(r.encode_utf16());
                Value::Bool(match op {
                    AluOp::Gt => ordering.is_gt(),
                    AluOp::Lt => ordering.is_lt(),
                    AluOp::Ge => ordering.is_ge(),
                    _ => ordering.is_le(),
                })
            } else {
                let (l, r) = (Const::number(left.to_number()), Const::number(right.to_number()));
                Value::from_const(&fold_binop(op, &l, &r, Type::BOOL)?)
            }
        }
        _ => {
            let (l, r) = (Const::number(left.to_number()), Const::number(right.to_number()));
            Value::from_const(&fold_binop(op, &l, &r, result_ty)?)
        }
    };
    Some(result)
}

/// How a runtime call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The call produced a value.
    Normal(Value),
    /// The call threw an exception.
    Throw(Value),
}

impl Completion {
    /// Returns the value of a normal completion.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Completion::Normal(v) => Some(v),
            Completion::Throw(_) => None,
        }
    }

    /// Returns `true` for a thrown exception.
    #[must_use]
    pub fn is_throw(&self) -> bool {
        matches!(self, Completion::Throw(_))
    }
}

/// Entry points generated code calls into.
///
/// Name arguments are strings; lookup arguments are integer indices into the
/// function's lookup table. Call and construct entries take the callee
/// operands followed by the argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RuntimeCall {
    ToBoolean,
    ToNumber,
    ToInt32,
    ToUInt32,

    Not,
    UMinus,
    UPlus,
    Compl,
    Increment,
    Decrement,

    BitAnd,
    BitOr,
    BitXor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LShift,
    RShift,
    URShift,

    CompareGreaterThan,
    CompareLessThan,
    CompareGreaterEqual,
    CompareLessEqual,
    CompareEqual,
    CompareNotEqual,
    CompareStrictEqual,
    CompareStrictNotEqual,
    InstanceOf,
    In,

    GetName,
    SetName,
    GetGlobalLookup,
    GetProperty,
    SetProperty,
    GetLookup,
    SetLookup,
    GetElement,
    SetElement,

    CallValue,
    CallProperty,
    CallElement,
    CallName,
    ConstructValue,
    ConstructProperty,
    ConstructName,

    TypeofValue,
    TypeofName,
    Throw,
    CreateClosure,
    CreateRegExp,
}

impl RuntimeCall {
    /// Number of fixed arguments, or the number of leading callee operands
    /// for the variadic call and construct entries.
    #[must_use]
    pub const fn arity(self) -> usize {
        use RuntimeCall::*;
        match self {
            ToBoolean | ToNumber | ToInt32 | ToUInt32 | Not | UMinus | UPlus | Compl
            | Increment | Decrement | GetName | GetGlobalLookup | TypeofValue | TypeofName
            | Throw | CreateClosure | CallValue | CallName | ConstructValue | ConstructName => 1,
            SetProperty | SetLookup | SetElement => 3,
            _ => 2,
        }
    }

    /// Returns `true` for the call and construct entries, which take an
    /// argument list after their fixed operands.
    #[must_use]
    pub const fn is_variadic(self) -> bool {
        use RuntimeCall::*;
        matches!(
            self,
            CallValue
                | CallProperty
                | CallElement
                | CallName
                | ConstructValue
                | ConstructProperty
                | ConstructName
        )
    }

    /// Returns `true` if the call can raise an exception.
    #[must_use]
    pub const fn may_throw(self) -> bool {
        use RuntimeCall::*;
        !matches!(
            self,
            ToBoolean
                | CompareStrictEqual
                | CompareStrictNotEqual
                | TypeofValue
                | TypeofName
                | CreateClosure
        )
    }

    /// The generic entry for a unary operator.
    #[must_use]
    pub const fn for_unop(op: AluOp) -> Option<RuntimeCall> {
        Some(match op {
            AluOp::Not => RuntimeCall::Not,
            AluOp::UMinus => RuntimeCall::UMinus,
            AluOp::UPlus => RuntimeCall::UPlus,
            AluOp::Compl => RuntimeCall::Compl,
            AluOp::Increment => RuntimeCall::Increment,
            AluOp::Decrement => RuntimeCall::Decrement,
            _ => return None,
        })
    }

    /// The generic entry for a binary operator.
    #[must_use]
    pub const fn for_binop(op: AluOp) -> Option<RuntimeCall> {
        Some(match op {
            AluOp::BitAnd => RuntimeCall::BitAnd,
            AluOp::BitOr => RuntimeCall::BitOr,
            AluOp::BitXor => RuntimeCall::BitXor,
            AluOp::Add => RuntimeCall::Add,
            AluOp::Sub => RuntimeCall::Sub,
            AluOp::Mul => RuntimeCall::Mul,
            AluOp::Div => RuntimeCall::Div,
            AluOp::Mod => RuntimeCall::Mod,
            AluOp::LShift => RuntimeCall::LShift,
            AluOp::RShift => RuntimeCall::RShift,
            AluOp::URShift => RuntimeCall::URShift,
            AluOp::Gt => RuntimeCall::CompareGreaterThan,
            AluOp::Lt => RuntimeCall::CompareLessThan,
            AluOp::Ge => RuntimeCall::CompareGreaterEqual,
            AluOp::Le => RuntimeCall::CompareLessEqual,
            AluOp::Equal => RuntimeCall::CompareEqual,
            AluOp::NotEqual => RuntimeCall::CompareNotEqual,
            AluOp::StrictEqual => RuntimeCall::CompareStrictEqual,
            AluOp::StrictNotEqual => RuntimeCall::CompareStrictNotEqual,
            AluOp::InstanceOf => RuntimeCall::InstanceOf,
            AluOp::In => RuntimeCall::In,
            _ => return None,
        })
    }

    /// The operator behind a generic operator entry.
    #[must_use]
    pub const fn operator(self) -> Option<AluOp> {
        use RuntimeCall::*;
        Some(match self {
            Not => AluOp::Not,
            UMinus => AluOp::UMinus,
            UPlus => AluOp::UPlus,
            Compl => AluOp::Compl,
            Increment => AluOp::Increment,
            Decrement => AluOp::Decrement,
            BitAnd => AluOp::BitAnd,
            BitOr => AluOp::BitOr,
            BitXor => AluOp::BitXor,
            Add => AluOp::Add,
            Sub => AluOp::Sub,
            Mul => AluOp::Mul,
            Div => AluOp::Div,
            Mod => AluOp::Mod,
            LShift => AluOp::LShift,
            RShift => AluOp::RShift,
            URShift => AluOp::URShift,
            CompareGreaterThan => AluOp::Gt,
            CompareLessThan => AluOp::Lt,
            CompareGreaterEqual => AluOp::Ge,
            CompareLessEqual => AluOp::Le,
            CompareEqual => AluOp::Equal,
            CompareNotEqual => AluOp::NotEqual,
            CompareStrictEqual => AluOp::StrictEqual,
            CompareStrictNotEqual => AluOp::StrictNotEqual,
            InstanceOf => AluOp::InstanceOf,
            In => AluOp::In,
            _ => return None,
        })
    }
}

/// The engine side of generated code.
pub trait Runtime {
    /// Performs `call` with `args`. Lookup indices in `args` refer to `lookups`.
    fn call(&mut self, call: RuntimeCall, args: &[Value], lookups: &[String]) -> Completion;
}

/// A host function callable from generated code.
pub type NativeFunction = fn(&mut PrimitiveRuntime, &[Value]) -> Completion;

#[derive(Clone)]
enum Callable {
    Native(NativeFunction),
    Closure(u32),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native(_) => f.write_str("Native"),
            Callable::Closure(id) => write!(f, "Closure({id})"),
        }
    }
}

/// A runtime over primitives and flat string-keyed objects.
///
/// Only native functions registered with [`define_native`](Self::define_native)
/// can be called; closures can be created and passed around but not invoked.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveRuntime {
    globals: FxHashMap<String, Value>,
    objects: Vec<FxHashMap<String, Value>>,
    functions: Vec<Callable>,
}

fn type_error(message: impl fmt::Display) -> Completion {
    Completion::Throw(Value::String(format!("TypeError: {message}").into()))
}

impl PrimitiveRuntime {
    /// Creates a runtime with an empty global scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a global name.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Reads a global name.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Allocates an empty object.
    pub fn new_object(&mut self) -> Value {
        self.objects.push(FxHashMap::default());
        Value::Object((self.objects.len() - 1) as u32)
    }

    /// Reads a property of an object; `None` for non-objects and missing keys.
    #[must_use]
    pub fn property(&self, object: &Value, name: &str) -> Option<&Value> {
        match object {
            Value::Object(id) => self.objects.get(*id as usize)?.get(name),
            _ => None,
        }
    }

    /// Registers `function` under the global `name`.
    pub fn define_native(&mut self, name: impl Into<String>, function: NativeFunction) {
        self.functions.push(Callable::Native(function));
        let handle = Value::Function((self.functions.len() - 1) as u32);
        self.set_global(name, handle);
    }

    fn get_name(&self, name: &Value) -> Completion {
        match self.globals.get(&name.to_string()) {
            Some(value) => Completion::Normal(value.clone()),
            None => Completion::Throw(Value::String(format!("ReferenceError: {name} is not defined").into())),
        }
    }

    fn get_property(&self, base: &Value, key: &Value) -> Completion {
        let key = key.to_string();
        match base {
            Value::Undefined | Value::Null => type_error(format_args!("cannot read property '{key}' of {base}")),
            Value::Object(id) => Completion::Normal(
                self.objects
                    .get(*id as usize)
                    .and_then(|o| o.get(&key))
                    .cloned()
                    .unwrap_or(Value::Undefined),
            ),
            Value::String(s) if key == "length" => Completion::Normal(Value::Int(s.encode_utf16().count() as i32)),
            _ => Completion::Normal(Value::Undefined),
        }
    }

    fn set_property(&mut self, base: &Value, key: &Value, value: &Value) -> Completion {
        let key = key.to_string();
        match base {
            Value::Undefined | Value::Null => type_error(format_args!("cannot set property '{key}' of {base}")),
            Value::Object(id) => {
                if let Some(object) = self.objects.get_mut(*id as usize) {
                    object.insert(key, value.clone());
                }
                Completion::Normal(Value::Undefined)
            }
            _ => Completion::Normal(Value::Undefined),
        }
    }

    fn call_function(&mut self, callee: &Value, args: &[Value]) -> Completion {
        let Value::Function(id) = callee else {
            return type_error(format_args!("{callee} is not a function"));
        };
        match self.functions.get(*id as usize).cloned() {
            Some(Callable::Native(function)) => function(self, args),
            Some(Callable::Closure(closure)) => type_error(format_args!("closure {closure} cannot be invoked here")),
            None => type_error(format_args!("{callee} is not a function")),
        }
    }

    fn construct(&mut self, callee: &Value, args: &[Value]) -> Completion {
        match self.call_function(callee, args) {
            Completion::Normal(value @ Value::Object(_)) => Completion::Normal(value),
            Completion::Normal(_) => Completion::Normal(self.new_object()),
            thrown => thrown,
        }
    }

    fn lookup<'l>(lookups: &'l [String], index: &Value) -> Option<&'l str> {
        let index = usize::try_from(index.to_number() as i64).ok()?;
        lookups.get(index).map(String::as_str)
    }
}

impl Runtime for PrimitiveRuntime {
    fn call(&mut self, call: RuntimeCall, args: &[Value], lookups: &[String]) -> Completion {
        use RuntimeCall::*;

        if args.len() < call.arity() || (!call.is_variadic() && args.len() != call.arity()) {
            return type_error(format_args!("{call} called with {} arguments", args.len()));
        }
        let arg = move |i: usize| &args[i];
        let name_of = move |i: usize| -> Value {
            match Self::lookup(lookups, &args[i]) {
                Some(name) => Value::from(name),
                None => Value::Undefined,
            }
        };

        match call {
            ToBoolean => Completion::Normal(Value::Bool(arg(0).to_boolean())),
            ToNumber => Completion::Normal(arg(0).convert(Type::DOUBLE)),
            ToInt32 => Completion::Normal(arg(0).convert(Type::SINT32)),
            ToUInt32 => Completion::Normal(arg(0).convert(Type::UINT32)),

            InstanceOf => match arg(1) {
                Value::Function(_) => Completion::Normal(Value::Bool(false)),
                other => type_error(format_args!("right-hand side of instanceof is {other}")),
            },
            In => match arg(1) {
                Value::Object(_) => Completion::Normal(Value::Bool(self.property(arg(1), &arg(0).to_string()).is_some())),
                other => type_error(format_args!("cannot use 'in' on {other}")),
            },

            GetName => self.get_name(arg(0)),
            GetGlobalLookup => self.get_name(&name_of(0)),
            SetName => {
                self.set_global(arg(0).to_string(), arg(1).clone());
                Completion::Normal(Value::Undefined)
            }
            GetProperty | GetElement => self.get_property(arg(0), arg(1)),
            GetLookup => self.get_property(arg(0), &name_of(1)),
            SetProperty | SetElement => self.set_property(arg(0), arg(1), arg(2)),
            SetLookup => self.set_property(arg(0), &name_of(1), arg(2)),

            CallValue => self.call_function(arg(0), &args[1..]),
            CallName => match self.get_name(arg(0)) {
                Completion::Normal(callee) => self.call_function(&callee, &args[1..]),
                thrown => thrown,
            },
            CallProperty | CallElement => match self.get_property(arg(0), arg(1)) {
                Completion::Normal(callee) => self.call_function(&callee, &args[2..]),
                thrown => thrown,
            },
            ConstructValue => self.construct(arg(0), &args[1..]),
            ConstructName => match self.get_name(arg(0)) {
                Completion::Normal(callee) => self.construct(&callee, &args[1..]),
                thrown => thrown,
            },
            ConstructProperty => match self.get_property(arg(0), arg(1)) {
                Completion::Normal(callee) => self.construct(&callee, &args[2..]),
                thrown => thrown,
            },

            TypeofValue => Completion::Normal(Value::from(arg(0).type_of())),
            TypeofName => {
                let ty = self.globals.get(&arg(0).to_string()).map_or("undefined", Value::type_of);
                Completion::Normal(Value::from(ty))
            }
            Throw => Completion::Throw(arg(0).clone()),
            CreateClosure => {
                let closure = arg(0).to_number() as u32;
                self.functions.push(Callable::Closure(closure));
                Completion::Normal(Value::Function((self.functions.len() - 1) as u32))
            }
            CreateRegExp => {
                let regexp = self.new_object();
                self.set_property(&regexp, &Value::from("source"), arg(0));
                self.set_property(&regexp, &Value::from("flags"), arg(1));
                Completion::Normal(regexp)
            }

            generic => {
                let result = match (generic.operator(), args) {
                    (Some(op), [operand]) => eval_unop(op, operand, Type::VAR),
                    (Some(op), [left, right]) => eval_binop(op, left, right, Type::VAR),
                    _ => None,
                };
                match result {
                    Some(value) => Completion::Normal(value),
                    None => type_error(format_args!("{generic} is not supported")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::{EnumCount, IntoEnumIterator};

    use super::*;

    #[test]
    fn test_call_table_round_trips_through_repr() {
        assert_eq!(RuntimeCall::iter().count(), RuntimeCall::COUNT);
        for call in RuntimeCall::iter() {
            assert_eq!(RuntimeCall::from_repr(call as u8), Some(call));
        }
        assert_eq!(RuntimeCall::CompareStrictEqual.to_string(), "compare_strict_equal");
        assert!(!RuntimeCall::TypeofName.may_throw());
        assert!(RuntimeCall::GetProperty.may_throw());
    }

    #[test]
    fn test_every_operator_entry_maps_back() {
        for call in RuntimeCall::iter() {
            if let Some(op) = call.operator() {
                let back = RuntimeCall::for_unop(op).or(RuntimeCall::for_binop(op));
                assert_eq!(back, Some(call), "{op:?}");
            }
        }
        assert_eq!(RuntimeCall::for_binop(AluOp::And), None);
    }

    #[test]
    fn test_generic_operators() {
        let sum = eval_binop(AluOp::Add, &Value::Int(2), &Value::Double(0.5), Type::VAR);
        assert_eq!(sum, Some(Value::Double(2.5)));

        let concat = eval_binop(AluOp::Add, &Value::from("n="), &Value::Int(4), Type::VAR);
        assert_eq!(concat, Some(Value::from("n=4")));

        let loose = eval_binop(AluOp::Equal, &Value::from("3"), &Value::Int(3), Type::VAR);
        assert_eq!(loose, Some(Value::Bool(true)));
        let strict = eval_binop(AluOp::StrictEqual, &Value::from("3"), &Value::Int(3), Type::VAR);
        assert_eq!(strict, Some(Value::Bool(false)));

        let ordered = eval_binop(AluOp::Lt, &Value::from("abc"), &Value::from("abd"), Type::VAR);
        assert_eq!(ordered, Some(Value::Bool(true)));

        assert_eq!(eval_unop(AluOp::Not, &Value::from(""), Type::VAR), Some(Value::Bool(true)));
        assert_eq!(eval_unop(AluOp::Compl, &Value::Int(0), Type::VAR), Some(Value::Int(-1)));
        assert_eq!(eval_binop(AluOp::In, &Value::Int(0), &Value::Null, Type::VAR), None);
    }

    #[test]
    fn test_primitive_runtime_objects_and_names() {
        let mut rt = PrimitiveRuntime::new();
        let object = rt.new_object();
        let set = rt.call(RuntimeCall::SetProperty, &[object.clone(), "x".into(), 7.into()], &[]);
        assert_eq!(set, Completion::Normal(Value::Undefined));

        let lookups = vec!["x".to_string()];
        let read = rt.call(RuntimeCall::GetLookup, &[object.clone(), Value::Int(0)], &lookups);
        assert_eq!(read, Completion::Normal(Value::Int(7)));

        let missing = rt.call(RuntimeCall::GetName, &["nope".into()], &[]);
        assert!(missing.is_throw());
        let ty = rt.call(RuntimeCall::TypeofName, &["nope".into()], &[]);
        assert_eq!(ty, Completion::Normal("undefined".into()));

        let thrown = rt.call(RuntimeCall::GetProperty, &[Value::Undefined, "x".into()], &[]);
        assert!(thrown.is_throw());
    }

    #[test]
    fn test_native_functions() {
        fn twice(_: &mut PrimitiveRuntime, args: &[Value]) -> Completion {
            let x = args.first().map_or(f64::NAN, Value::to_number);
            Completion::Normal(Value::Double(x * 2.0))
        }

        let mut rt = PrimitiveRuntime::new();
        rt.define_native("twice", twice);
        let result = rt.call(RuntimeCall::CallName, &["twice".into(), 21.into()], &[]);
        assert_eq!(result, Completion::Normal(Value::Double(42.0)));

        let not_callable = rt.call(RuntimeCall::CallValue, &[Value::Int(1)], &[]);
        assert!(not_callable.is_throw());
    }
}
