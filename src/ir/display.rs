//! Textual IR dump.
//!
//! ```text
//! function f(x)
//! L0:
//!     s0: int32%0 = 0
//!     s1: goto L1
//! L1: ; preds: L0, L2 ; loop header
//!     s2: double%2 = phi(int32%0, double%5)
//! ```

use std::fmt;

use crate::ir::{ArgLocalKind, Expr, Function, Stmt, StmtKind};

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::String(s) => write!(f, "{s:?}"),
            Expr::RegExp { pattern, flags } => write!(f, "/{pattern}/{flags}"),
            Expr::Name(name) => match (&name.id, name.builtin) {
                (Some(id), _) => f.write_str(id),
                (None, Some(builtin)) => write!(f, "builtin_{builtin:?}"),
                (None, None) => f.write_str("<anonymous>"),
            },
            Expr::Temp(t) => write!(f, "{t}"),
            Expr::ArgLocal(a) => match a.kind {
                ArgLocalKind::Formal => write!(f, "arg{}", a.index),
                ArgLocalKind::Local => write!(f, "local{}", a.index),
            },
            Expr::Closure(index) => write!(f, "closure#{index}"),
            Expr::Convert { expr, ty } => write!(f, "convert {expr} to {ty}"),
            Expr::Unop { op, expr, .. } => write!(f, "{}{expr}", op.symbol()),
            Expr::Binop {
                op, left, right, ..
            } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::Call { base, args } => {
                write!(f, "call {base}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::New { base, args } => {
                write!(f, "new {base}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Subscript { base, index } => write!(f, "{base}[{index}]"),
            Expr::Member { base, name, .. } => write!(f, "{base}.{name}"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.id)?;
        match &self.kind {
            StmtKind::Phi(phi) => {
                write!(f, "{} = phi(", phi.target)?;
                write_list(f, &phi.incoming)?;
                f.write_str(")")
            }
            StmtKind::Move(m) if m.swap => write!(f, "swap {}, {}", m.target, m.source),
            StmtKind::Move(m) => write!(f, "{} = {}", m.target, m.source),
            StmtKind::Exp(e) => write!(f, "{e}"),
            StmtKind::Jump(target) => write!(f, "goto {target}"),
            StmtKind::CJump(cj) => write!(
                f,
                "if ({}) goto {} else goto {}",
                cj.cond, cj.iftrue, cj.iffalse
            ),
            StmtKind::Ret(e) => write!(f, "return {e}"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}({})", self.name, self.formals.join(", "))?;
        for block in self.blocks() {
            write!(f, "{}:", block.id)?;
            if !block.preds.is_empty() {
                let preds: Vec<String> = block.preds.iter().map(ToString::to_string).collect();
                write!(f, " ; preds: {}", preds.join(", "))?;
            }
            if let Some(handler) = block.catch_block {
                write!(f, " ; catch: {handler}")?;
            }
            if block.is_exception_handler {
                f.write_str(" ; exception handler")?;
            }
            if block.group_start {
                f.write_str(" ; loop header")?;
            } else if let Some(group) = block.containing_group {
                write!(f, " ; in loop {group}")?;
            }
            writeln!(f)?;
            for stmt in self.statements(block.id) {
                writeln!(f, "    {stmt}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{AluOp, Expr, FunctionBuilder};

    #[test]
    fn test_function_dump() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let x = b.formal("x");
        let next = b.block();
        b.switch_to(b.entry());
        b.jump(next);
        b.switch_to(next);
        b.ret(Expr::binop(AluOp::Add, x, Expr::int(1)));
        let dump = b.finish()?.to_string();
        assert!(dump.starts_with("function f(x)\nL0:\n    s0: goto L1\n"));
        assert!(dump.contains("L1: ; preds: L0"));
        assert!(dump.contains("s1: return arg0 + 1"));
        Ok(())
    }
}
