//! Interpreter for assembled functions.

use log::trace;

use crate::{
    codegen::{
        eval_binop, eval_unop, CompiledFunction, Completion, Instruction, Operand, Runtime, RuntimeCall,
        Value,
    },
    ir::Type,
    Error, Result,
};

/// Register banks and slots of one activation.
#[derive(Debug, Default)]
struct Frame {
    formals: Vec<Value>,
    locals: Vec<Value>,
    slots: Vec<Value>,
    gp: Vec<Value>,
    fp: Vec<Value>,
    scratch: Value,
    handler: Option<u32>,
    exception: Option<Value>,
}

fn bank_size(mask: u32) -> usize {
    (u32::BITS - mask.leading_zeros()) as usize
}

impl Frame {
    fn slot<'b>(bank: &'b mut [Value], index: u32, what: &str) -> Result<&'b mut Value> {
        bank.get_mut(index as usize)
            .ok_or_else(|| Error::Execution(format!("{what} {index} is outside the frame")))
    }

    fn read(&mut self, operand: Operand, constants: &[Value]) -> Result<Value> {
        Ok(match operand {
            Operand::Scratch => self.scratch.clone(),
            Operand::Formal(i) => self.formals.get(i as usize).cloned().unwrap_or(Value::Undefined),
            Operand::Const(i) => constants
                .get(i as usize)
                .cloned()
                .ok_or_else(|| Error::Execution(format!("constant {i} is out of range")))?,
            other => self.location(other)?.clone(),
        })
    }

    fn write(&mut self, operand: Operand, value: Value) -> Result<()> {
        *self.location(operand)? = value;
        Ok(())
    }

    fn location(&mut self, operand: Operand) -> Result<&mut Value> {
        match operand {
            Operand::Scratch => Ok(&mut self.scratch),
            Operand::Reg(i) => Self::slot(&mut self.gp, i, "register"),
            Operand::FpReg(i) => Self::slot(&mut self.fp, i, "fp register"),
            Operand::Slot(i) => Self::slot(&mut self.slots, i, "stack slot"),
            Operand::Local(i) => Self::slot(&mut self.locals, i, "local"),
            Operand::Formal(i) => {
                if self.formals.len() <= i as usize {
                    self.formals.resize(i as usize + 1, Value::Undefined);
                }
                Ok(&mut self.formals[i as usize])
            }
            Operand::Const(i) => Err(Error::Execution(format!("write to constant c{i}"))),
        }
    }
}

/// Transfers control to the active handler, or ends the call with the
/// pending exception when there is none.
fn unwind(frame: &mut Frame, pc: &mut usize) -> Option<Completion> {
    match frame.handler {
        Some(handler) => {
            *pc = handler as usize;
            None
        }
        None => Some(Completion::Throw(frame.exception.take().unwrap_or_default())),
    }
}

impl CompiledFunction {
    /// Runs the function with `args`, dispatching runtime calls to `runtime`.
    ///
    /// Missing arguments read as `undefined`. A throw that no handler in the
    /// function catches ends the call with [`Completion::Throw`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] if the code is malformed or an unchecked
    /// runtime call throws.
    pub fn call<R: Runtime>(&self, runtime: &mut R, args: &[Value]) -> Result<Completion> {
        let mut frame = Frame {
            formals: args.to_vec(),
            ..Frame::default()
        };
        let mut pc = 0;
        loop {
            if pc >= self.code.len() {
                return Err(Error::Execution(format!("{}: ran off the end of the code", self.name)));
            }
            let (instruction, next) = Instruction::decode(&self.code, pc)?;
            trace!("{}: {pc:6}  {instruction}", self.name);
            pc = next;

            match instruction {
                Instruction::Enter {
                    slots,
                    locals,
                    gp_mask,
                    fp_mask,
                } => {
                    frame.slots = vec![Value::Undefined; slots as usize];
                    frame.locals = vec![Value::Undefined; locals as usize];
                    frame.gp = vec![Value::Undefined; bank_size(gp_mask)];
                    frame.fp = vec![Value::Undefined; bank_size(fp_mask)];
                }
                Instruction::Move { dst, src } => {
                    let value = frame.read(src, &self.constants)?;
                    frame.write(dst, value)?;
                }
                Instruction::Swap { a, b } => {
                    let (va, vb) = (frame.read(a, &self.constants)?, frame.read(b, &self.constants)?);
                    frame.write(a, vb)?;
                    frame.write(b, va)?;
                }
                Instruction::Unop { op, ty, dst, src } => {
                    let value = frame.read(src, &self.constants)?;
                    let result = match eval_unop(op, &value, ty) {
                        Some(result) => result,
                        None => {
                            let call = RuntimeCall::for_unop(op)
                                .ok_or_else(|| Error::Execution(format!("{} is not unary", op.symbol())))?;
                            match self.runtime_call(runtime, &mut frame, call, &[value], true)? {
                                Some(result) => result,
                                None => {
                                    if let Some(done) = unwind(&mut frame, &mut pc) {
                                        return Ok(done);
                                    }
                                    continue;
                                }
                            }
                        }
                    };
                    frame.write(dst, result)?;
                }
                Instruction::Binop {
                    op,
                    ty,
                    dst,
                    left,
                    right,
                } => {
                    let l = frame.read(left, &self.constants)?;
                    let r = frame.read(right, &self.constants)?;
                    let result = if l.is_boxed() || r.is_boxed() {
                        None
                    } else {
                        eval_binop(op, &l, &r, ty)
                    };
                    let result = match result {
                        Some(result) => result,
                        None => {
                            let call = RuntimeCall::for_binop(op)
                                .ok_or_else(|| Error::Execution(format!("{} is not binary", op.symbol())))?;
                            match self.runtime_call(runtime, &mut frame, call, &[l, r], true)? {
                                Some(result) => result,
                                None => {
                                    if let Some(done) = unwind(&mut frame, &mut pc) {
                                        return Ok(done);
                                    }
                                    continue;
                                }
                            }
                        }
                    };
                    frame.write(dst, result)?;
                }
                Instruction::Convert { ty, dst, src } => {
                    let value = frame.read(src, &self.constants)?;
                    frame.write(dst, value.convert(ty))?;
                }
                Instruction::Jump { target } => pc = target as usize,
                Instruction::JumpIf { cond, target } => {
                    if frame.read(cond, &self.constants)?.to_boolean() {
                        pc = target as usize;
                    }
                }
                Instruction::JumpIfNot { cond, target } => {
                    if !frame.read(cond, &self.constants)?.to_boolean() {
                        pc = target as usize;
                    }
                }
                Instruction::CompareJump {
                    op,
                    left,
                    right,
                    target,
                } => {
                    let l = frame.read(left, &self.constants)?;
                    let r = frame.read(right, &self.constants)?;
                    let holds = eval_binop(op, &l, &r, Type::BOOL)
                        .ok_or_else(|| Error::Execution(format!("cannot compare with {}", op.symbol())))?;
                    if holds.to_boolean() {
                        pc = target as usize;
                    }
                }
                Instruction::Call {
                    call,
                    checked,
                    dst,
                    args,
                } => {
                    let values = args
                        .iter()
                        .map(|&arg| frame.read(arg, &self.constants))
                        .collect::<Result<Vec<_>>>()?;
                    match self.runtime_call(runtime, &mut frame, call, &values, checked)? {
                        Some(result) => frame.write(dst, result)?,
                        None => {
                            if let Some(done) = unwind(&mut frame, &mut pc) {
                                return Ok(done);
                            }
                        }
                    }
                }
                Instruction::SetHandler { target } => frame.handler = target,
                Instruction::GetException { dst } => {
                    let exception = frame.exception.take().unwrap_or_default();
                    frame.write(dst, exception)?;
                }
                Instruction::Ret { src } => {
                    return Ok(Completion::Normal(frame.read(src, &self.constants)?));
                }
            }
        }
    }

    /// Performs a runtime call. `Ok(None)` means it threw; the exception is
    /// left in the frame.
    fn runtime_call<R: Runtime>(
        &self,
        runtime: &mut R,
        frame: &mut Frame,
        call: RuntimeCall,
        args: &[Value],
        checked: bool,
    ) -> Result<Option<Value>> {
        match runtime.call(call, args, &self.lookups) {
            Completion::Normal(value) => Ok(Some(value)),
            Completion::Throw(exception) if checked => {
                trace!("{}: {call} threw {exception}", self.name);
                frame.exception = Some(exception);
                Ok(None)
            }
            Completion::Throw(exception) => Err(Error::Execution(format!(
                "{}: unchecked {call} threw {exception}",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{FrameLayout, PrimitiveRuntime};

    fn compiled(instructions: &[Instruction], constants: Vec<Value>, slots: u32) -> CompiledFunction {
        let mut code = Vec::new();
        for instruction in instructions {
            instruction.encode(&mut code).unwrap();
        }
        CompiledFunction {
            name: "test".to_string(),
            code,
            constants,
            lookups: Vec::new(),
            formal_count: 1,
            frame: FrameLayout {
                stack_slots: slots,
                ..FrameLayout::default()
            },
        }
    }

    fn enter(slots: u32) -> Instruction {
        Instruction::Enter {
            slots,
            locals: 0,
            gp_mask: 0b11,
            fp_mask: 0b1,
        }
    }

    #[test]
    fn test_swap_and_inline_arithmetic() {
        let code = [
            enter(1),
            Instruction::Move {
                dst: Operand::Reg(0),
                src: Operand::Formal(0),
            },
            Instruction::Move {
                dst: Operand::FpReg(0),
                src: Operand::Const(0),
            },
            Instruction::Swap {
                a: Operand::Reg(0),
                b: Operand::FpReg(0),
            },
            // r0 = 0.5, fr0 = x
            Instruction::Binop {
                op: crate::ir::AluOp::Sub,
                ty: Type::DOUBLE,
                dst: Operand::Slot(0),
                left: Operand::FpReg(0),
                right: Operand::Reg(0),
            },
            Instruction::Ret { src: Operand::Slot(0) },
        ];
        let f = compiled(&code, vec![Value::Double(0.5)], 1);
        let result = f.call(&mut PrimitiveRuntime::new(), &[Value::Int(3)]).unwrap();
        assert_eq!(result, Completion::Normal(Value::Double(2.5)));
    }

    #[test]
    fn test_boxed_operands_fall_back_to_the_runtime() {
        let code = [
            enter(0),
            Instruction::Binop {
                op: crate::ir::AluOp::Add,
                ty: Type::VAR,
                dst: Operand::Scratch,
                left: Operand::Const(0),
                right: Operand::Formal(0),
            },
            Instruction::Ret { src: Operand::Scratch },
        ];
        let f = compiled(&code, vec![Value::from("n=")], 0);
        let result = f.call(&mut PrimitiveRuntime::new(), &[Value::Int(4)]).unwrap();
        assert_eq!(result, Completion::Normal(Value::from("n=4")));
    }

    #[test]
    fn test_throw_reaches_handler_or_caller() {
        let throw = Instruction::Call {
            call: RuntimeCall::Throw,
            checked: true,
            dst: Operand::Scratch,
            args: vec![Operand::Const(0)],
        };
        // enter is 17 bytes, set_handler 5, the call 14 and ret 6
        let handler_at = 17 + 5 + 14 + 6;
        let code = [
            enter(0),
            Instruction::SetHandler {
                target: Some(handler_at),
            },
            throw.clone(),
            Instruction::Ret { src: Operand::Scratch },
            Instruction::GetException { dst: Operand::Reg(1) },
            Instruction::Ret { src: Operand::Reg(1) },
        ];
        let f = compiled(&code, vec![Value::Int(7)], 0);
        assert_eq!(
            f.call(&mut PrimitiveRuntime::new(), &[]).unwrap(),
            Completion::Normal(Value::Int(7))
        );

        let f = compiled(&[enter(0), throw], vec![Value::Int(7)], 0);
        assert_eq!(
            f.call(&mut PrimitiveRuntime::new(), &[]).unwrap(),
            Completion::Throw(Value::Int(7))
        );

        let unchecked = Instruction::Call {
            call: RuntimeCall::Throw,
            checked: false,
            dst: Operand::Scratch,
            args: vec![Operand::Const(0)],
        };
        let f = compiled(&[enter(0), unchecked], vec![Value::Int(7)], 0);
        assert!(matches!(f.call(&mut PrimitiveRuntime::new(), &[]), Err(Error::Execution(_))));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        let f = compiled(
            &[
                enter(0),
                Instruction::Move {
                    dst: Operand::Slot(3),
                    src: Operand::Formal(0),
                },
            ],
            Vec::new(),
            0,
        );
        assert!(matches!(f.call(&mut PrimitiveRuntime::new(), &[]), Err(Error::Execution(_))));

        let f = compiled(&[enter(0)], Vec::new(), 0);
        assert!(matches!(f.call(&mut PrimitiveRuntime::new(), &[]), Err(Error::Execution(_))));
    }
}
