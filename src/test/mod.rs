//! Shared fixtures for unit tests.

use crate::{
    analysis::{cleanup_phis, convert_to_ssa, DefUses, DominatorTree},
    compiler::passes::convert_arg_locals,
    ir::{AluOp, BlockId, CJump, Expr, Function, StmtKind},
};

/// Builds a function with `block_count` blocks wired by `edges`.
///
/// Blocks with one successor end in a jump, blocks with two in a branch on
/// the first formal, blocks with none in a return. Edges are listed in
/// successor order.
pub fn cfg(block_count: usize, edges: &[(usize, usize)]) -> Function {
    let mut function = Function::new("cfg");
    function.formals.push("c".to_string());
    for _ in 0..block_count {
        function.new_block(None);
    }
    for from in 0..block_count {
        let targets: Vec<BlockId> = edges
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|&(_, t)| BlockId::new(t))
            .collect();
        let block = BlockId::new(from);
        let kind = match targets.as_slice() {
            [] => StmtKind::Ret(Expr::undefined()),
            [target] => StmtKind::Jump(*target),
            [iftrue, iffalse] => StmtKind::CJump(CJump {
                cond: Expr::formal(0),
                iftrue: *iftrue,
                iffalse: *iffalse,
            }),
            _ => panic!("block {from} has more than two successors"),
        };
        function.append(block, kind);
        for target in targets {
            function.add_edge(block, target);
        }
    }
    function
}

/// `function f(x) { var r = 0; for (var i = 0; i < x; i = i + 1) { r = r + i; } return r; }`
///
/// ```text
/// L0: r = 0; i = 0; goto L1
/// L1: if (i < x) goto L2 else goto L3
/// L2: r = r + i; i = i + 1; goto L1
/// L3: return r
/// ```
pub fn sum_loop() -> Function {
    let mut b = crate::ir::FunctionBuilder::new("f");
    let x = b.formal("x");
    let r = b.local("r");
    let i = b.local("i");
    let (header, body, exit) = (b.block(), b.block(), b.block());

    b.switch_to(b.entry());
    b.mov(r.clone(), Expr::int(0));
    b.mov(i.clone(), Expr::int(0));
    b.jump(header);

    b.switch_to(header);
    b.cjump(Expr::binop(AluOp::Lt, i.clone(), x), body, exit);

    b.switch_to(body);
    b.mov(r.clone(), Expr::binop(AluOp::Add, r.clone(), i.clone()));
    b.mov(i.clone(), Expr::binop(AluOp::Add, i, Expr::int(1)));
    b.jump(header);

    b.switch_to(exit);
    b.ret(r);

    match b.finish() {
        Ok(function) => function,
        Err(e) => panic!("fixture is malformed: {e}"),
    }
}

/// Runs the front half of the pipeline: locals to temps, SSA construction
/// and phi cleanup.
pub fn to_ssa(function: &mut Function) -> (DominatorTree, DefUses) {
    convert_arg_locals(function);
    let mut dominators = DominatorTree::new(function);
    dominators.compute_frontiers(function);
    let mut def_uses = DefUses::new(function);
    convert_to_ssa(function, &dominators, &mut def_uses);
    cleanup_phis(function, &mut def_uses);
    (dominators, def_uses)
}
