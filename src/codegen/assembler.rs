//! Bytecode emission.
//!
//! Blocks are emitted in function order. A jump to a block that has not been
//! placed yet is written with a zero target and recorded; once every block
//! has its label the recorded sites are patched. Constants and property
//! names go to a per-function table, deduplicated, and with fast lookups
//! enabled names are additionally interned into a lookup table the runtime
//! resolves them through.

use std::fmt::Write as _;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    codegen::{Instruction, Operand, RuntimeCall, Value},
    config::Config,
    ir::{
        AluOp, ArgLocalKind, BlockId, Builtin, CJump, Const, Expr, Function, Name, StmtId,
        StmtKind, Temp, TempKind, Type,
    },
    Error, Result,
};

/// Most arguments a call can pass. The encoding allows 255 operands and a
/// property call spends two of them on the callee.
pub const MAX_CALL_ARGS: usize = 253;

/// Frame requirements of a compiled function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameLayout {
    /// Stack slots for temps and spilled intervals.
    pub stack_slots: u32,
    /// General registers written by the body.
    pub gp_mask: u32,
    /// Floating-point registers written by the body.
    pub fp_mask: u32,
}

/// Output of the pipeline for one function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub(crate) name: String,
    pub(crate) code: Vec<u8>,
    pub(crate) constants: Vec<Value>,
    pub(crate) lookups: Vec<String>,
    pub(crate) formal_count: u32,
    pub(crate) frame: FrameLayout,
}

impl CompiledFunction {
    /// Name of the source function.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The encoded instructions.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Size of the encoded instructions in bytes.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// The constant table indexed by [`Operand::Const`].
    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Names resolved through the runtime's lookup entries.
    #[must_use]
    pub fn lookups(&self) -> &[String] {
        &self.lookups
    }

    /// Number of declared formal parameters.
    #[must_use]
    pub fn formal_count(&self) -> u32 {
        self.formal_count
    }

    /// Frame requirements.
    #[must_use]
    pub fn frame(&self) -> FrameLayout {
        self.frame
    }

    /// Decodes the whole body into one instruction per line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] if the code does not decode.
    pub fn disassemble(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.name);
        let mut pc = 0;
        while pc < self.code.len() {
            let (instruction, next) = Instruction::decode(&self.code, pc)?;
            let _ = writeln!(out, "{pc:6}  {instruction}");
            pc = next;
        }
        Ok(out)
    }
}

type Check = std::result::Result<(), String>;

/// Checks that the back end can emit every statement of `function`.
///
/// Operator, call and access operands must be constants, temps or argument
/// slots; logical `&&`/`||` nodes must have been lowered to branches by the
/// front end.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] naming the first construct that cannot be emitted.
pub fn can_compile(function: &Function) -> Result<()> {
    for block in function.blocks() {
        for stmt in function.statements(block.id) {
            let checked = match &stmt.kind {
                StmtKind::Phi(_) | StmtKind::Jump(_) => Ok(()),
                StmtKind::Move(m) => check_target(&m.target).and_then(|()| check_value(&m.source)),
                StmtKind::Exp(e) | StmtKind::Ret(e) => check_value(e),
                StmtKind::CJump(c) => check_value(&c.cond),
            };
            if let Err(what) = checked {
                return Err(Error::Unsupported(format!("{} in {}: {what}", function.name, block.id)));
            }
        }
    }
    Ok(())
}

fn is_operand(e: &Expr) -> bool {
    matches!(e, Expr::Const(_) | Expr::String(_) | Expr::Temp(_) | Expr::ArgLocal(_))
}

fn check_operand(e: &Expr) -> Check {
    if is_operand(e) {
        Ok(())
    } else {
        Err(format!("nested expression {e}"))
    }
}

fn is_convertible(ty: Type) -> bool {
    ty == Type::VAR || ty == Type::BOOL || ty == Type::SINT32 || ty == Type::UINT32 || ty == Type::DOUBLE
}

fn check_target(target: &Expr) -> Check {
    match target {
        Expr::Temp(_) | Expr::ArgLocal(_) => Ok(()),
        Expr::Name(Name {
            id: Some(_),
            builtin: None,
            ..
        }) => Ok(()),
        Expr::Member { base, .. } => check_operand(base),
        Expr::Subscript { base, index } => check_operand(base).and_then(|()| check_operand(index)),
        Expr::Const(_) => Err("assignment to a constant".to_string()),
        other => Err(format!("assignment to {other}")),
    }
}

fn check_value(e: &Expr) -> Check {
    match e {
        Expr::Const(_)
        | Expr::String(_)
        | Expr::Temp(_)
        | Expr::ArgLocal(_)
        | Expr::Closure(_)
        | Expr::RegExp { .. } => Ok(()),
        Expr::Name(Name {
            builtin: Some(Builtin::CaughtException),
            ..
        }) => Ok(()),
        Expr::Name(Name {
            builtin: Some(builtin), ..
        }) => Err(format!("{builtin:?} used as a value")),
        Expr::Name(Name { id, .. }) => id.as_ref().map(|_| ()).ok_or_else(|| "anonymous name".to_string()),
        Expr::Member { base, .. } => check_operand(base),
        Expr::Subscript { base, index } => check_operand(base).and_then(|()| check_operand(index)),
        Expr::Unop { op, expr, .. } => match RuntimeCall::for_unop(*op) {
            Some(_) => check_operand(expr),
            None => Err(format!("unary {}", op.symbol())),
        },
        Expr::Binop { op, left, right, .. } => match RuntimeCall::for_binop(*op) {
            Some(_) => check_operand(left).and_then(|()| check_operand(right)),
            None => Err(format!("operator {}", op.symbol())),
        },
        Expr::Convert { expr, ty } if is_convertible(*ty) => check_operand(expr),
        Expr::Convert { ty, .. } => Err(format!("conversion to {ty}")),
        Expr::Call { base, args } => check_call(base, args, false),
        Expr::New { base, args } => check_call(base, args, true),
    }
}

fn check_call(base: &Expr, args: &[Expr], construct: bool) -> Check {
    if args.len() > MAX_CALL_ARGS {
        return Err(format!("call with {} arguments", args.len()));
    }
    match base {
        Expr::Name(Name {
            builtin: Some(Builtin::Typeof),
            ..
        }) if !construct => {
            return match args {
                [Expr::Name(Name { builtin: None, .. })] => Ok(()),
                [operand] => check_operand(operand),
                _ => Err("typeof takes one operand".to_string()),
            };
        }
        Expr::Name(Name {
            builtin: Some(Builtin::Throw),
            ..
        }) if !construct && args.len() == 1 => {}
        Expr::Name(Name {
            builtin: Some(builtin), ..
        }) => return Err(format!("{builtin:?} as a callee")),
        Expr::Name(_) => {}
        Expr::Member { base, .. } => check_operand(base)?,
        Expr::Subscript { .. } if construct => {
            return Err("construction through a subscript".to_string());
        }
        Expr::Subscript { base, index } => {
            check_operand(base)?;
            check_operand(index)?;
        }
        other => check_operand(other)?,
    }
    args.iter().try_for_each(check_operand)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Primitive(u16, u64),
    String(String),
}

/// Emits one function. Every temp must be a physical register or a stack
/// slot and no phis may remain.
pub(crate) struct Assembler<'f> {
    function: &'f Function,
    optional_jumps: &'f FxHashSet<StmtId>,
    fast_lookups: bool,
    code: Vec<u8>,
    labels: FxHashMap<BlockId, u32>,
    patches: FxHashMap<BlockId, Vec<usize>>,
    constants: Vec<Value>,
    constant_index: FxHashMap<ConstKey, u32>,
    lookups: Vec<String>,
    lookup_index: FxHashMap<String, u32>,
}

impl<'f> Assembler<'f> {
    pub(crate) fn new(
        function: &'f Function,
        optional_jumps: &'f FxHashSet<StmtId>,
        config: &Config,
    ) -> Self {
        Self {
            function,
            optional_jumps,
            fast_lookups: config.enable_fast_lookups,
            code: Vec::new(),
            labels: FxHashMap::default(),
            patches: FxHashMap::default(),
            constants: Vec::new(),
            constant_index: FxHashMap::default(),
            lookups: Vec::new(),
            lookup_index: FxHashMap::default(),
        }
    }

    /// Emits the prologue and every live block, then resolves forward jumps.
    pub(crate) fn assemble(mut self, frame: FrameLayout) -> Result<CompiledFunction> {
        let function = self.function;
        self.emit(Instruction::Enter {
            slots: frame.stack_slots,
            locals: count(function.locals.len())?,
            gp_mask: frame.gp_mask,
            fp_mask: frame.fp_mask,
        })?;

        let order = function.block_ids();
        for (i, &block) in order.iter().enumerate() {
            let next = order.get(i + 1).copied();
            self.place(block)?;
            self.set_handler(block)?;
            for &id in &function.block(block).statements {
                self.statement(id, next)?;
            }
        }
        self.resolve_patches()?;

        debug!(
            "{}: {} bytes, {} constants, {} lookups",
            function.name,
            self.code.len(),
            self.constants.len(),
            self.lookups.len()
        );
        Ok(CompiledFunction {
            name: function.name.clone(),
            code: self.code,
            constants: self.constants,
            lookups: self.lookups,
            formal_count: count(function.formals.len())?,
            frame,
        })
    }

    fn place(&mut self, block: BlockId) -> Result<()> {
        let offset = u32::try_from(self.code.len())
            .map_err(|_| Error::CodeBuffer(format!("{} exceeds 4 GiB", self.function.name)))?;
        self.labels.insert(block, offset);
        Ok(())
    }

    fn resolve_patches(&mut self) -> Result<()> {
        for (block, sites) in std::mem::take(&mut self.patches) {
            let Some(&offset) = self.labels.get(&block) else {
                return Err(Error::CodeBuffer(format!(
                    "{}: jump to {block}, which was never placed",
                    self.function.name
                )));
            };
            for at in sites {
                self.code[at..at + 4].copy_from_slice(&offset.to_le_bytes());
            }
        }
        Ok(())
    }

    fn emit(&mut self, instruction: Instruction) -> Result<()> {
        instruction.encode(&mut self.code)
    }

    /// Emits a jump-like instruction whose target field will hold the label of `target`.
    fn emit_branch(&mut self, instruction: Instruction, target: BlockId) -> Result<()> {
        let Some(field) = instruction.target_offset() else {
            return Err(Error::CodeBuffer(format!("{instruction} has no target")));
        };
        let at = self.code.len() + field;
        self.emit(instruction)?;
        match self.labels.get(&target) {
            Some(offset) => self.code[at..at + 4].copy_from_slice(&offset.to_le_bytes()),
            None => self.patches.entry(target).or_default().push(at),
        }
        Ok(())
    }

    fn jump_unless_next(&mut self, target: BlockId, next: Option<BlockId>) -> Result<()> {
        if next == Some(target) {
            return Ok(());
        }
        self.emit_branch(Instruction::Jump { target: 0 }, target)
    }

    /// Switches the active handler when entering `block` may change it.
    fn set_handler(&mut self, block: BlockId) -> Result<()> {
        let function = self.function;
        if !function.has_try {
            return Ok(());
        }
        let bb = function.block(block);
        let handler = bb.catch_block;
        let changes = if block == function.entry() {
            handler.is_some()
        } else {
            bb.preds.is_empty() || bb.preds.iter().any(|&p| function.block(p).catch_block != handler)
        };
        match handler {
            _ if !changes => Ok(()),
            Some(target) => self.emit_branch(Instruction::SetHandler { target: Some(0) }, target),
            None => self.emit(Instruction::SetHandler { target: None }),
        }
    }

    fn statement(&mut self, id: StmtId, next: Option<BlockId>) -> Result<()> {
        let function = self.function;
        match &function.stmt(id).kind {
            StmtKind::Phi(phi) => Err(Error::InvalidIr(format!(
                "{}: phi for {} reached the assembler",
                function.name, phi.target
            ))),
            StmtKind::Move(m) => self.assign(&m.target, &m.source, m.swap),
            StmtKind::Exp(e) if is_operand(e) => Ok(()),
            StmtKind::Exp(e) => self.compute(e, Operand::Scratch),
            StmtKind::Jump(_) if self.optional_jumps.contains(&id) => Ok(()),
            StmtKind::Jump(target) => self.emit_branch(Instruction::Jump { target: 0 }, *target),
            StmtKind::CJump(c) => self.branch(c, next),
            StmtKind::Ret(e) => {
                let src = self.value(e)?;
                self.emit(Instruction::Ret { src })
            }
        }
    }

    fn branch(&mut self, c: &CJump, next: Option<BlockId>) -> Result<()> {
        if let Expr::Binop {
            op, left, right, ..
        } = &c.cond
        {
            if op.is_comparison() && left.ty().is_number() && right.ty().is_number() {
                let instruction = Instruction::CompareJump {
                    op: *op,
                    left: self.operand(left)?,
                    right: self.operand(right)?,
                    target: 0,
                };
                self.emit_branch(instruction, c.iftrue)?;
                return self.jump_unless_next(c.iffalse, next);
            }
        }

        let cond = self.value(&c.cond)?;
        if next == Some(c.iftrue) {
            self.emit_branch(Instruction::JumpIfNot { cond, target: 0 }, c.iffalse)
        } else {
            self.emit_branch(Instruction::JumpIf { cond, target: 0 }, c.iftrue)?;
            self.jump_unless_next(c.iffalse, next)
        }
    }

    fn assign(&mut self, target: &Expr, source: &Expr, swap: bool) -> Result<()> {
        match target {
            Expr::Temp(_) | Expr::ArgLocal(_) => {
                let dst = self.operand(target)?;
                if swap {
                    let b = self.operand(source)?;
                    return self.emit(Instruction::Swap { a: dst, b });
                }
                self.compute(source, dst)
            }
            Expr::Name(Name {
                id: Some(id),
                builtin: None,
                ..
            }) => {
                let value = self.value(source)?;
                let name = self.string(id);
                self.call(RuntimeCall::SetName, Operand::Scratch, vec![name, value])
            }
            Expr::Member { base, name, .. } => {
                let value = self.value(source)?;
                let base = self.operand(base)?;
                if self.fast_lookups {
                    let lookup = self.lookup(name);
                    self.call(RuntimeCall::SetLookup, Operand::Scratch, vec![base, lookup, value])
                } else {
                    let name = self.string(name);
                    self.call(RuntimeCall::SetProperty, Operand::Scratch, vec![base, name, value])
                }
            }
            Expr::Subscript { base, index } => {
                let value = self.value(source)?;
                let args = vec![self.operand(base)?, self.operand(index)?, value];
                self.call(RuntimeCall::SetElement, Operand::Scratch, args)
            }
            other => Err(Error::Unsupported(format!("assignment to {other}"))),
        }
    }

    /// The operand holding `e`, evaluating it into the scratch register if needed.
    fn value(&mut self, e: &Expr) -> Result<Operand> {
        if is_operand(e) {
            return self.operand(e);
        }
        self.compute(e, Operand::Scratch)?;
        Ok(Operand::Scratch)
    }

    /// Evaluates `e` into `dst`.
    fn compute(&mut self, e: &Expr, dst: Operand) -> Result<()> {
        match e {
            Expr::Const(_) | Expr::String(_) | Expr::Temp(_) | Expr::ArgLocal(_) => {
                let src = self.operand(e)?;
                if src == dst {
                    return Ok(());
                }
                self.emit(Instruction::Move { dst, src })
            }
            Expr::Name(Name {
                builtin: Some(Builtin::CaughtException),
                ..
            }) => self.emit(Instruction::GetException { dst }),
            Expr::Name(Name {
                id: Some(id),
                builtin: None,
                ..
            }) => {
                if self.fast_lookups {
                    let lookup = self.lookup(id);
                    self.call(RuntimeCall::GetGlobalLookup, dst, vec![lookup])
                } else {
                    let name = self.string(id);
                    self.call(RuntimeCall::GetName, dst, vec![name])
                }
            }
            Expr::Name(_) => Err(Error::Unsupported(format!("{e} used as a value"))),
            Expr::Member { base, name, .. } => {
                let base = self.operand(base)?;
                if self.fast_lookups {
                    let lookup = self.lookup(name);
                    self.call(RuntimeCall::GetLookup, dst, vec![base, lookup])
                } else {
                    let name = self.string(name);
                    self.call(RuntimeCall::GetProperty, dst, vec![base, name])
                }
            }
            Expr::Subscript { base, index } => {
                let args = vec![self.operand(base)?, self.operand(index)?];
                self.call(RuntimeCall::GetElement, dst, args)
            }
            Expr::Unop { op, expr, ty } => {
                let src = self.operand(expr)?;
                if is_primitive(expr.ty()) {
                    return self.emit(Instruction::Unop {
                        op: *op,
                        ty: *ty,
                        dst,
                        src,
                    });
                }
                let call = RuntimeCall::for_unop(*op)
                    .ok_or_else(|| Error::Unsupported(format!("unary {}", op.symbol())))?;
                self.call(call, dst, vec![src])
            }
            Expr::Binop {
                op,
                left,
                right,
                ty,
            } => {
                let call = RuntimeCall::for_binop(*op)
                    .ok_or_else(|| Error::Unsupported(format!("operator {}", op.symbol())))?;
                let (l, r) = (self.operand(left)?, self.operand(right)?);
                let generic = matches!(op, AluOp::InstanceOf | AluOp::In)
                    || !is_primitive(left.ty())
                    || !is_primitive(right.ty());
                if generic {
                    return self.call(call, dst, vec![l, r]);
                }
                self.emit(Instruction::Binop {
                    op: *op,
                    ty: *ty,
                    dst,
                    left: l,
                    right: r,
                })
            }
            Expr::Convert { expr, ty } => self.convert(expr, *ty, dst),
            Expr::Closure(index) => {
                let index = self.int(*index)?;
                self.call(RuntimeCall::CreateClosure, dst, vec![index])
            }
            Expr::RegExp { pattern, flags } => {
                let args = vec![self.string(pattern), self.string(flags)];
                self.call(RuntimeCall::CreateRegExp, dst, args)
            }
            Expr::Call { base, args } => self.call_expr(base, args, dst, false),
            Expr::New { base, args } => self.call_expr(base, args, dst, true),
        }
    }

    fn convert(&mut self, expr: &Expr, ty: Type, dst: Operand) -> Result<()> {
        let src = self.operand(expr)?;
        if ty == Type::VAR {
            if src != dst {
                self.emit(Instruction::Move { dst, src })?;
            }
            return Ok(());
        }
        if !is_convertible(ty) {
            return Err(Error::Unsupported(format!("conversion to {ty}")));
        }
        if is_primitive(expr.ty()) {
            return self.emit(Instruction::Convert { ty, dst, src });
        }
        let call = if ty == Type::BOOL {
            RuntimeCall::ToBoolean
        } else if ty == Type::SINT32 {
            RuntimeCall::ToInt32
        } else if ty == Type::UINT32 {
            RuntimeCall::ToUInt32
        } else {
            RuntimeCall::ToNumber
        };
        self.call(call, dst, vec![src])
    }

    fn call_expr(&mut self, base: &Expr, args: &[Expr], dst: Operand, construct: bool) -> Result<()> {
        let mut operands = Vec::with_capacity(args.len() + 2);
        let call = match base {
            Expr::Name(Name {
                builtin: Some(Builtin::Typeof),
                ..
            }) if !construct => {
                return match args {
                    [Expr::Name(Name {
                        id: Some(id),
                        builtin: None,
                        ..
                    })] => {
                        let name = self.string(id);
                        self.call(RuntimeCall::TypeofName, dst, vec![name])
                    }
                    [operand] => {
                        let value = self.operand(operand)?;
                        self.call(RuntimeCall::TypeofValue, dst, vec![value])
                    }
                    _ => Err(Error::Unsupported("typeof takes one operand".to_string())),
                };
            }
            Expr::Name(Name {
                builtin: Some(Builtin::Throw),
                ..
            }) if !construct => {
                let [operand] = args else {
                    return Err(Error::Unsupported("throw takes one operand".to_string()));
                };
                let value = self.operand(operand)?;
                return self.call(RuntimeCall::Throw, dst, vec![value]);
            }
            Expr::Name(Name {
                id: Some(id),
                builtin: None,
                ..
            }) => {
                operands.push(self.string(id));
                if construct {
                    RuntimeCall::ConstructName
                } else {
                    RuntimeCall::CallName
                }
            }
            Expr::Name(_) => return Err(Error::Unsupported(format!("call of {base}"))),
            Expr::Member { base, name, .. } => {
                operands.push(self.operand(base)?);
                operands.push(self.string(name));
                if construct {
                    RuntimeCall::ConstructProperty
                } else {
                    RuntimeCall::CallProperty
                }
            }
            Expr::Subscript { base, index } if !construct => {
                operands.push(self.operand(base)?);
                operands.push(self.operand(index)?);
                RuntimeCall::CallElement
            }
            callee => {
                operands.push(self.operand(callee)?);
                if construct {
                    RuntimeCall::ConstructValue
                } else {
                    RuntimeCall::CallValue
                }
            }
        };
        for arg in args {
            operands.push(self.operand(arg)?);
        }
        self.call(call, dst, operands)
    }

    fn call(&mut self, call: RuntimeCall, dst: Operand, args: Vec<Operand>) -> Result<()> {
        self.emit(Instruction::Call {
            call,
            checked: call.may_throw(),
            dst,
            args,
        })
    }

    fn operand(&mut self, e: &Expr) -> Result<Operand> {
        match e {
            Expr::Temp(t) => self.temp(t),
            Expr::ArgLocal(a) => Ok(match a.kind {
                ArgLocalKind::Formal => Operand::Formal(a.index),
                ArgLocalKind::Local => Operand::Local(a.index),
            }),
            Expr::Const(c) => Ok(self.constant(c)),
            Expr::String(s) => Ok(self.string(s)),
            other => Err(Error::InvalidIr(format!("{other} is not an operand"))),
        }
    }

    fn temp(&self, t: &Temp) -> Result<Operand> {
        match t.kind {
            TempKind::VirtualRegister => Err(Error::InvalidIr(format!(
                "{}: {t} was never allocated",
                self.function.name
            ))),
            TempKind::PhysicalRegister if t.is_fp() => Ok(Operand::FpReg(t.index)),
            TempKind::PhysicalRegister => Ok(Operand::Reg(t.index)),
            TempKind::StackSlot => Ok(Operand::Slot(t.index)),
        }
    }

    fn intern(&mut self, key: ConstKey, value: impl FnOnce() -> Value) -> Operand {
        if let Some(&index) = self.constant_index.get(&key) {
            return Operand::Const(index);
        }
        let index = self.constants.len() as u32;
        self.constants.push(value());
        self.constant_index.insert(key, index);
        Operand::Const(index)
    }

    fn constant(&mut self, c: &Const) -> Operand {
        self.intern(ConstKey::Primitive(c.ty.bits(), c.value.to_bits()), || Value::from_const(c))
    }

    fn string(&mut self, s: &str) -> Operand {
        self.intern(ConstKey::String(s.to_string()), || Value::from(s))
    }

    fn int(&mut self, value: u32) -> Result<Operand> {
        let value = i32::try_from(value).map_err(|_| Error::CodeBuffer(format!("index {value} out of range")))?;
        Ok(self.constant(&Const::int32(value)))
    }

    /// A constant holding the lookup-table index of `name`.
    fn lookup(&mut self, name: &str) -> Operand {
        let index = match self.lookup_index.get(name) {
            Some(&index) => index,
            None => {
                let index = self.lookups.len() as u32;
                self.lookups.push(name.to_string());
                self.lookup_index.insert(name.to_string(), index);
                index
            }
        };
        self.constant(&Const::int32(index as i32))
    }
}

/// Known to hold a primitive value, so operators can run inline.
fn is_primitive(ty: Type) -> bool {
    !ty.is_unknown() && (ty - (Type::UNDEFINED | Type::NULL | Type::BOOL | Type::NUMBER)).is_empty()
}

fn count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::CodeBuffer(format!("{len} slots")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::passes::convert_temps, ir::FunctionBuilder};

    fn assemble(mut f: Function, config: &Config) -> CompiledFunction {
        can_compile(&f).unwrap();
        let slots = convert_temps(&mut f);
        let optional = FxHashSet::default();
        let frame = FrameLayout {
            stack_slots: slots,
            ..FrameLayout::default()
        };
        Assembler::new(&f, &optional, config).assemble(frame).unwrap()
    }

    fn decode_all(compiled: &CompiledFunction) -> Vec<(usize, Instruction)> {
        let mut out = Vec::new();
        let mut pc = 0;
        while pc < compiled.code_size() {
            let (instruction, next) = Instruction::decode(compiled.code(), pc).unwrap();
            out.push((pc, instruction));
            pc = next;
        }
        out
    }

    #[test]
    fn test_can_compile_rejects_unlowered_constructs() {
        let mut b = FunctionBuilder::new("and");
        b.switch_to(b.entry());
        let x = b.formal("x");
        b.ret(Expr::binop(AluOp::And, x.clone(), Expr::int(1)));
        assert!(matches!(can_compile(&b.finish().unwrap()), Err(Error::Unsupported(_))));

        let mut b = FunctionBuilder::new("nested");
        b.switch_to(b.entry());
        let inner = Expr::binop(AluOp::Add, Expr::int(1), Expr::int(2));
        b.ret(Expr::binop(AluOp::Mul, inner, Expr::int(3)));
        assert!(matches!(can_compile(&b.finish().unwrap()), Err(Error::Unsupported(_))));

        let mut b = FunctionBuilder::new("to_string");
        b.switch_to(b.entry());
        b.ret(Expr::convert(Expr::int(1), Type::STRING));
        assert!(matches!(can_compile(&b.finish().unwrap()), Err(Error::Unsupported(_))));

        let mut b = FunctionBuilder::new("ok");
        b.switch_to(b.entry());
        let t = b.temp();
        b.mov(t, Expr::call(Expr::member(x, "f"), vec![Expr::int(1), Expr::string("a")]));
        b.exp(Expr::call(Expr::builtin(Builtin::Typeof), vec![Expr::name("g")]));
        b.ret(t.into());
        assert!(can_compile(&b.finish().unwrap()).is_ok());
    }

    #[test]
    fn test_forward_jumps_are_patched() {
        // L0: if (x) goto L2 else goto L1; L1: return 1; L2: return 2
        let mut b = FunctionBuilder::new("f");
        let x = b.formal("x");
        let (l1, l2) = (b.block(), b.block());
        b.switch_to(b.entry());
        b.cjump(x, l2, l1);
        b.switch_to(l1);
        b.ret(Expr::int(1));
        b.switch_to(l2);
        b.ret(Expr::int(2));

        let compiled = assemble(b.finish().unwrap(), &Config::default());
        let instructions = decode_all(&compiled);
        let starts: Vec<u32> = instructions.iter().map(|(pc, _)| *pc as u32).collect();

        // L1 follows the entry, so the branch only needs the taken edge
        let (_, branch) = &instructions[1];
        let Instruction::JumpIf { cond, target } = branch else {
            panic!("expected a conditional jump, got {branch}");
        };
        assert_eq!(*cond, Operand::Formal(0));
        assert!(starts.contains(target));
        let (_, at_target) = instructions.iter().find(|(pc, _)| *pc as u32 == *target).unwrap();
        assert!(matches!(at_target, Instruction::Ret { .. }));
        assert_eq!(compiled.constants().len(), 2);
    }

    #[test]
    fn test_constants_and_lookups_are_shared() {
        let mut b = FunctionBuilder::new("f");
        let o = b.formal("o");
        b.switch_to(b.entry());
        let (t0, t1) = (b.temp(), b.temp());
        b.mov(t0, Expr::member(o.clone(), "x"));
        b.mov(Expr::member(o, "x"), Expr::int(1));
        b.mov(t1, Expr::int(1));
        b.ret(t0.into());
        let f = b.finish().unwrap();

        let plain = assemble(f.clone(), &Config::default().with_fast_lookups(false));
        assert!(plain.lookups().is_empty());
        assert_eq!(plain.constants(), &[Value::from("x"), Value::Int(1)]);

        let fast = assemble(f, &Config::default().with_fast_lookups(true));
        assert_eq!(fast.lookups(), &["x".to_string()]);
        let calls: Vec<RuntimeCall> = decode_all(&fast)
            .into_iter()
            .filter_map(|(_, i)| match i {
                Instruction::Call { call, .. } => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![RuntimeCall::GetLookup, RuntimeCall::SetLookup]);
        assert!(fast.disassemble().unwrap().contains("get_lookup"));
    }

    #[test]
    fn test_handler_switches_are_emitted() {
        let mut b = FunctionBuilder::new("f");
        let handler = b.handler();
        let body = b.protected_block(handler);
        b.switch_to(b.entry());
        b.jump(body);
        b.switch_to(body);
        b.exp(Expr::call(Expr::builtin(Builtin::Throw), vec![Expr::int(1)]));
        b.ret(Expr::undefined());
        b.switch_to(handler);
        let t = b.temp();
        b.mov(t, Expr::builtin(Builtin::CaughtException));
        b.ret(t.into());

        let compiled = assemble(b.finish().unwrap(), &Config::default());
        let handlers: Vec<Option<u32>> = decode_all(&compiled)
            .into_iter()
            .filter_map(|(_, i)| match i {
                Instruction::SetHandler { target } => Some(target),
                _ => None,
            })
            .collect();
        // the handler is laid out first and clears itself; the body installs it
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0], None);
        assert!(handlers[1].is_some());
    }

    #[test]
    fn test_virtual_registers_are_rejected() {
        let mut b = FunctionBuilder::new("f");
        b.switch_to(b.entry());
        let t = b.temp();
        b.mov(t, Expr::int(1));
        b.ret(t.into());
        let f = b.finish().unwrap();
        let optional = FxHashSet::default();
        let result = Assembler::new(&f, &optional, &Config::default()).assemble(FrameLayout::default());
        assert!(matches!(result, Err(Error::InvalidIr(_))));
    }
}
