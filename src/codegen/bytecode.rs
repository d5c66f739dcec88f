//! Register-machine bytecode.
//!
//! Every instruction starts with an [`Opcode`] byte. Operands are five bytes,
//! a location tag followed by a little-endian index; jump targets are
//! absolute code offsets stored as little-endian `u32`s so the assembler can
//! patch them in place once the target block is placed.
//!
//! ```text
//! binop   [0x04] [op:u8] [ty:u16] [dst:5] [left:5] [right:5]
//! call    [0x0a] [call:u8] [checked:u8] [dst:5] [argc:u8] [arg:5]*
//! jump    [0x06] [target:u32]
//! ```

use std::fmt;

use strum::{Display, EnumCount, EnumIter, FromRepr};

use crate::{
    codegen::RuntimeCall,
    ir::{AluOp, Type},
    Error, Result,
};

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumCount, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Enter,
    Move,
    Swap,
    Unop,
    Binop,
    Convert,
    Jump,
    JumpIf,
    JumpIfNot,
    CompareJump,
    Call,
    SetHandler,
    GetException,
    Ret,
}

/// Encoded size of an operand.
pub const OPERAND_SIZE: usize = 5;

/// A value location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The scratch register, holding intermediate and discarded results.
    Scratch,
    /// General-purpose register.
    Reg(u32),
    /// Floating-point register.
    FpReg(u32),
    /// Stack slot.
    Slot(u32),
    /// Formal parameter slot.
    Formal(u32),
    /// Local variable slot.
    Local(u32),
    /// Entry of the constant table.
    Const(u32),
}

impl Operand {
    fn tag(self) -> (u8, u32) {
        match self {
            Operand::Scratch => (0, 0),
            Operand::Reg(i) => (1, i),
            Operand::FpReg(i) => (2, i),
            Operand::Slot(i) => (3, i),
            Operand::Formal(i) => (4, i),
            Operand::Local(i) => (5, i),
            Operand::Const(i) => (6, i),
        }
    }

    fn from_tag(tag: u8, index: u32) -> Option<Operand> {
        Some(match tag {
            0 => Operand::Scratch,
            1 => Operand::Reg(index),
            2 => Operand::FpReg(index),
            3 => Operand::Slot(index),
            4 => Operand::Formal(index),
            5 => Operand::Local(index),
            6 => Operand::Const(index),
            _ => return None,
        })
    }

    /// Returns `true` if the operand can be written.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, Operand::Const(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Scratch => f.write_str("acc"),
            Operand::Reg(i) => write!(f, "r{i}"),
            Operand::FpReg(i) => write!(f, "fr{i}"),
            Operand::Slot(i) => write!(f, "${i}"),
            Operand::Formal(i) => write!(f, "formal{i}"),
            Operand::Local(i) => write!(f, "local{i}"),
            Operand::Const(i) => write!(f, "c{i}"),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Instruction {
    /// Frame setup: stack slots, local slots and the registers the body uses.
    Enter {
        slots: u32,
        locals: u32,
        gp_mask: u32,
        fp_mask: u32,
    },
    Move {
        dst: Operand,
        src: Operand,
    },
    /// Exchanges two locations.
    Swap {
        a: Operand,
        b: Operand,
    },
    /// Inline operator on primitive operands, producing `ty`.
    Unop {
        op: AluOp,
        ty: Type,
        dst: Operand,
        src: Operand,
    },
    Binop {
        op: AluOp,
        ty: Type,
        dst: Operand,
        left: Operand,
        right: Operand,
    },
    /// Primitive conversion to `ty`.
    Convert {
        ty: Type,
        dst: Operand,
        src: Operand,
    },
    Jump {
        target: u32,
    },
    JumpIf {
        cond: Operand,
        target: u32,
    },
    JumpIfNot {
        cond: Operand,
        target: u32,
    },
    /// Jumps when the numeric comparison holds.
    CompareJump {
        op: AluOp,
        left: Operand,
        right: Operand,
        target: u32,
    },
    /// Runtime call. `checked` calls may throw and dispatch to the handler.
    Call {
        call: RuntimeCall,
        checked: bool,
        dst: Operand,
        args: Vec<Operand>,
    },
    /// Sets the block exceptions unwind to; `None` returns them to the caller.
    SetHandler {
        target: Option<u32>,
    },
    /// Reads the exception being handled.
    GetException {
        dst: Operand,
    },
    Ret {
        src: Operand,
    },
}

const NO_HANDLER: u32 = u32::MAX;

impl Instruction {
    /// The opcode of this instruction.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Enter { .. } => Opcode::Enter,
            Instruction::Move { .. } => Opcode::Move,
            Instruction::Swap { .. } => Opcode::Swap,
            Instruction::Unop { .. } => Opcode::Unop,
            Instruction::Binop { .. } => Opcode::Binop,
            Instruction::Convert { .. } => Opcode::Convert,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::JumpIf { .. } => Opcode::JumpIf,
            Instruction::JumpIfNot { .. } => Opcode::JumpIfNot,
            Instruction::CompareJump { .. } => Opcode::CompareJump,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::SetHandler { .. } => Opcode::SetHandler,
            Instruction::GetException { .. } => Opcode::GetException,
            Instruction::Ret { .. } => Opcode::Ret,
        }
    }

    /// Offset of the jump target field from the start of the encoding.
    #[must_use]
    pub fn target_offset(&self) -> Option<usize> {
        match self {
            Instruction::Jump { .. } | Instruction::SetHandler { .. } => Some(1),
            Instruction::JumpIf { .. } | Instruction::JumpIfNot { .. } => Some(1 + OPERAND_SIZE),
            Instruction::CompareJump { .. } => Some(2 + 2 * OPERAND_SIZE),
            _ => None,
        }
    }

    /// Appends the encoding to `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodeBuffer`] for calls with more than 255 arguments.
    pub fn encode(&self, code: &mut Vec<u8>) -> Result<()> {
        code.push(self.opcode() as u8);
        match self {
            Instruction::Enter {
                slots,
                locals,
                gp_mask,
                fp_mask,
            } => {
                for value in [slots, locals, gp_mask, fp_mask] {
                    code.extend_from_slice(&value.to_le_bytes());
                }
            }
            Instruction::Move { dst, src } | Instruction::Swap { a: dst, b: src } => {
                write_operand(code, *dst);
                write_operand(code, *src);
            }
            Instruction::Unop { op, ty, dst, src } => {
                code.push(*op as u8);
                code.extend_from_slice(&ty.bits().to_le_bytes());
                write_operand(code, *dst);
                write_operand(code, *src);
            }
            Instruction::Binop {
                op,
                ty,
                dst,
                left,
                right,
            } => {
                code.push(*op as u8);
                code.extend_from_slice(&ty.bits().to_le_bytes());
                write_operand(code, *dst);
                write_operand(code, *left);
                write_operand(code, *right);
            }
            Instruction::Convert { ty, dst, src } => {
                code.extend_from_slice(&ty.bits().to_le_bytes());
                write_operand(code, *dst);
                write_operand(code, *src);
            }
            Instruction::Jump { target } => code.extend_from_slice(&target.to_le_bytes()),
            Instruction::JumpIf { cond, target } | Instruction::JumpIfNot { cond, target } => {
                write_operand(code, *cond);
                code.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::CompareJump {
                op,
                left,
                right,
                target,
            } => {
                code.push(*op as u8);
                write_operand(code, *left);
                write_operand(code, *right);
                code.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::Call {
                call,
                checked,
                dst,
                args,
            } => {
                let argc = u8::try_from(args.len()).map_err(|_| {
                    Error::CodeBuffer(format!("{call} with {} arguments", args.len()))
                })?;
                code.push(*call as u8);
                code.push(u8::from(*checked));
                write_operand(code, *dst);
                code.push(argc);
                for arg in args {
                    write_operand(code, *arg);
                }
            }
            Instruction::SetHandler { target } => {
                code.extend_from_slice(&target.unwrap_or(NO_HANDLER).to_le_bytes());
            }
            Instruction::GetException { dst } | Instruction::Ret { src: dst } => {
                write_operand(code, *dst);
            }
        }
        Ok(())
    }

    /// Decodes the instruction at `pc`, returning it with the offset of the next one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] for truncated code, unknown opcodes and
    /// invalid operand tags.
    pub fn decode(code: &[u8], pc: usize) -> Result<(Instruction, usize)> {
        let mut reader = Reader { code, pos: pc };
        let raw = reader.u8()?;
        let opcode = Opcode::from_repr(raw)
            .ok_or_else(|| Error::Execution(format!("unknown opcode {raw:#04x} at {pc}")))?;

        let instruction = match opcode {
            Opcode::Enter => Instruction::Enter {
                slots: reader.u32()?,
                locals: reader.u32()?,
                gp_mask: reader.u32()?,
                fp_mask: reader.u32()?,
            },
            Opcode::Move => Instruction::Move {
                dst: reader.operand()?,
                src: reader.operand()?,
            },
            Opcode::Swap => Instruction::Swap {
                a: reader.operand()?,
                b: reader.operand()?,
            },
            Opcode::Unop => Instruction::Unop {
                op: reader.alu_op()?,
                ty: reader.ty()?,
                dst: reader.operand()?,
                src: reader.operand()?,
            },
            Opcode::Binop => Instruction::Binop {
                op: reader.alu_op()?,
                ty: reader.ty()?,
                dst: reader.operand()?,
                left: reader.operand()?,
                right: reader.operand()?,
            },
            Opcode::Convert => Instruction::Convert {
                ty: reader.ty()?,
                dst: reader.operand()?,
                src: reader.operand()?,
            },
            Opcode::Jump => Instruction::Jump {
                target: reader.u32()?,
            },
            Opcode::JumpIf => Instruction::JumpIf {
                cond: reader.operand()?,
                target: reader.u32()?,
            },
            Opcode::JumpIfNot => Instruction::JumpIfNot {
                cond: reader.operand()?,
                target: reader.u32()?,
            },
            Opcode::CompareJump => Instruction::CompareJump {
                op: reader.alu_op()?,
                left: reader.operand()?,
                right: reader.operand()?,
                target: reader.u32()?,
            },
            Opcode::Call => {
                let raw = reader.u8()?;
                let call = RuntimeCall::from_repr(raw)
                    .ok_or_else(|| Error::Execution(format!("unknown runtime call {raw}")))?;
                let checked = reader.u8()? != 0;
                let dst = reader.operand()?;
                let argc = reader.u8()?;
                let args = (0..argc)
                    .map(|_| reader.operand())
                    .collect::<Result<Vec<_>>>()?;
                Instruction::Call {
                    call,
                    checked,
                    dst,
                    args,
                }
            }
            Opcode::SetHandler => {
                let target = reader.u32()?;
                Instruction::SetHandler {
                    target: (target != NO_HANDLER).then_some(target),
                }
            }
            Opcode::GetException => Instruction::GetException {
                dst: reader.operand()?,
            },
            Opcode::Ret => Instruction::Ret {
                src: reader.operand()?,
            },
        };
        Ok((instruction, reader.pos))
    }
}

fn write_operand(code: &mut Vec<u8>, operand: Operand) {
    let (tag, index) = operand.tag();
    code.push(tag);
    code.extend_from_slice(&index.to_le_bytes());
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .and_then(|b| <[u8; N]>::try_from(b).ok())
            .ok_or_else(|| Error::Execution(format!("truncated instruction at {}", self.pos)))?;
        self.pos += N;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn ty(&mut self) -> Result<Type> {
        let bits = u16::from_le_bytes(self.bytes()?);
        Type::from_bits(bits).ok_or_else(|| Error::Execution(format!("invalid type bits {bits:#x}")))
    }

    fn alu_op(&mut self) -> Result<AluOp> {
        let raw = self.u8()?;
        AluOp::from_repr(raw).ok_or_else(|| Error::Execution(format!("invalid operator {raw}")))
    }

    fn operand(&mut self) -> Result<Operand> {
        let tag = self.u8()?;
        let index = self.u32()?;
        Operand::from_tag(tag, index)
            .ok_or_else(|| Error::Execution(format!("invalid operand tag {tag}")))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode();
        match self {
            Instruction::Enter {
                slots,
                locals,
                gp_mask,
                fp_mask,
            } => write!(
                f,
                "{opcode} slots={slots} locals={locals} gp={gp_mask:#x} fp={fp_mask:#x}"
            ),
            Instruction::Move { dst, src } => write!(f, "{opcode} {dst}, {src}"),
            Instruction::Swap { a, b } => write!(f, "{opcode} {a}, {b}"),
            Instruction::Unop { op, ty, dst, src } => {
                write!(f, "{opcode} {}.{ty} {dst}, {src}", op.symbol())
            }
            Instruction::Binop {
                op,
                ty,
                dst,
                left,
                right,
            } => write!(f, "{opcode} {}.{ty} {dst}, {left}, {right}", op.symbol()),
            Instruction::Convert { ty, dst, src } => write!(f, "{opcode}.{ty} {dst}, {src}"),
            Instruction::Jump { target } => write!(f, "{opcode} @{target}"),
            Instruction::JumpIf { cond, target } | Instruction::JumpIfNot { cond, target } => {
                write!(f, "{opcode} {cond}, @{target}")
            }
            Instruction::CompareJump {
                op,
                left,
                right,
                target,
            } => write!(f, "{opcode} {left} {} {right}, @{target}", op.symbol()),
            Instruction::Call {
                call,
                checked,
                dst,
                args,
            } => {
                write!(f, "{opcode} {dst} = {call}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")?;
                if *checked {
                    f.write_str(" checked")?;
                }
                Ok(())
            }
            Instruction::SetHandler { target: Some(t) } => write!(f, "{opcode} @{t}"),
            Instruction::SetHandler { target: None } => write!(f, "{opcode} none"),
            Instruction::GetException { dst } => write!(f, "{opcode} {dst}"),
            Instruction::Ret { src } => write!(f, "{opcode} {src}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(instruction: &Instruction) -> Vec<u8> {
        let mut code = Vec::new();
        instruction.encode(&mut code).unwrap();
        code
    }

    #[test]
    fn test_target_offsets_point_at_target() {
        let jumps = [
            Instruction::Jump { target: 0xdead_beef },
            Instruction::JumpIfNot {
                cond: Operand::Reg(3),
                target: 0xdead_beef,
            },
            Instruction::CompareJump {
                op: AluOp::Lt,
                left: Operand::Reg(0),
                right: Operand::Const(1),
                target: 0xdead_beef,
            },
            Instruction::SetHandler {
                target: Some(0xdead_beef),
            },
        ];
        for jump in &jumps {
            let code = encoded(jump);
            let at = jump.target_offset().unwrap();
            assert_eq!(code[at..at + 4], 0xdead_beef_u32.to_le_bytes(), "{jump}");
        }
        assert_eq!(Instruction::Ret { src: Operand::Scratch }.target_offset(), None);
    }

    #[test]
    fn test_call_encoding() {
        let call = Instruction::Call {
            call: RuntimeCall::CallName,
            checked: true,
            dst: Operand::Slot(2),
            args: vec![Operand::Const(0), Operand::FpReg(1), Operand::Formal(0)],
        };
        let code = encoded(&call);
        assert_eq!(code.len(), 4 + OPERAND_SIZE * 4);
        let (decoded, next) = Instruction::decode(&code, 0).unwrap();
        assert_eq!(decoded, call);
        assert_eq!(next, code.len());
        assert_eq!(decoded.to_string(), "call $2 = call_name(c0, fr1, formal0) checked");

        let too_many = Instruction::Call {
            call: RuntimeCall::CallValue,
            checked: true,
            dst: Operand::Scratch,
            args: vec![Operand::Scratch; 256],
        };
        assert!(matches!(too_many.encode(&mut Vec::new()), Err(Error::CodeBuffer(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Instruction::decode(&[0xff], 0), Err(Error::Execution(_))));

        let mut code = encoded(&Instruction::Move {
            dst: Operand::Reg(0),
            src: Operand::Local(1),
        });
        code[1] = 9;
        assert!(matches!(Instruction::decode(&code, 0), Err(Error::Execution(_))));

        let code = encoded(&Instruction::Jump { target: 12 });
        assert!(matches!(Instruction::decode(&code[..3], 0), Err(Error::Execution(_))));
    }
}
