//! Static Single Assignment construction.
//!
//! The input is a CFG in which virtual registers may be assigned any number
//! of times (local variables have already been turned into temps). The output
//! is semi-pruned SSA form: every temp has exactly one static definition, and
//! values merging at control-flow joins go through phis.
//!
//! # Phases
//!
//! 1. **Collection** - per variable, the blocks defining it and whether any
//!    block reads it before writing it. Variables that never cross a block
//!    boundary need no phi.
//! 2. **Phi placement** - for each non-local variable, phis are inserted on the
//!    iterated dominance frontier of its definition sites.
//! 3. **Renaming** - a walk over the dominator tree gives every definition a
//!    fresh temp and rewrites each use to the reaching one (see
//!    [`renamer`](self::renamer)).
//! 4. **Phi cleanup** - phis whose values only ever flow into other phis are
//!    deleted ([`cleanup_phis`]).
//!
//! # References
//!
//! - Cytron et al., "Efficiently Computing Static Single Assignment Form and the
//!   Control Dependence Graph", ACM TOPLAS 1991
//! - Briggs et al., "Practical Improvements to the Construction and Destruction
//!   of Static Single Assignment Form", SP&E 1998

mod cleanup;
mod collector;
mod renamer;
mod verify;

pub use cleanup::cleanup_phis;
pub use verify::verify_ssa;

use log::debug;

use crate::{
    analysis::{DefUses, DominatorTree},
    ir::{BlockId, Expr, Function, Phi, StmtKind, Temp},
    utils::BitSet,
};

use collector::VariableCollector;
use renamer::VariableRenamer;

/// Converts `function` to semi-pruned SSA form, filling `def_uses`.
///
/// The dominator tree must have its frontiers computed.
pub fn convert_to_ssa(function: &mut Function, dominators: &DominatorTree, def_uses: &mut DefUses) {
    let variables = VariableCollector::new(function);

    let temp_count = function.temp_count as usize;
    let mut has_phi = vec![BitSet::new(temp_count); function.block_count()];
    let mut inserted = 0usize;
    let mut worklist: Vec<BlockId> = Vec::with_capacity(8);

    let temps: Vec<Temp> = variables.all_temps().copied().collect();
    for a in temps {
        if !variables.is_non_local(&a) {
            continue;
        }

        worklist.clear();
        worklist.extend(variables.def_sites(&a));
        while let Some(n) = worklist.pop() {
            for y in dominators.frontier(n) {
                if has_phi[y.index()].contains(a.index as usize) {
                    continue;
                }
                insert_phi_node(&a, y, function);
                inserted += 1;
                has_phi[y.index()].insert(a.index as usize);
                if !variables.in_block(y).contains(&a.index) {
                    worklist.push(y);
                }
            }
        }
    }
    debug!("{}: inserted {inserted} phis", function.name);

    VariableRenamer::new(function, def_uses).run(dominators);
}

/// Prepends `a = phi(a, a, ...)` to `y`, one operand per predecessor edge.
fn insert_phi_node(a: &Temp, y: BlockId, function: &mut Function) {
    let operands = function.block(y).preds.len();
    function.prepend(
        y,
        StmtKind::Phi(Phi {
            target: *a,
            incoming: vec![Expr::Temp(*a); operands],
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::passes::convert_arg_locals, test::sum_loop};

    fn to_ssa(function: &mut Function) -> (DominatorTree, DefUses) {
        convert_arg_locals(function);
        let mut dominators = DominatorTree::new(function);
        dominators.compute_frontiers(function);
        let mut du = DefUses::new(function);
        convert_to_ssa(function, &dominators, &mut du);
        (dominators, du)
    }

    #[test]
    fn test_loop_gets_one_phi_per_variable() {
        let mut f = sum_loop();
        let (dominators, mut du) = to_ssa(&mut f);
        cleanup_phis(&mut f, &mut du);

        let header = BlockId::new(1);
        assert_eq!(f.phis(header).len(), 2);
        assert!(f.phis(BlockId::new(2)).is_empty());
        assert!(f.phis(BlockId::new(3)).is_empty());
        assert!(f.verify_cfg().is_ok());
        assert!(verify_ssa(&f, &dominators, &du).is_ok());
    }

    #[test]
    fn test_every_temp_defined_once() {
        let mut f = sum_loop();
        let (_, du) = to_ssa(&mut f);
        let mut seen = std::collections::HashSet::new();
        for block in f.blocks() {
            for stmt in f.statements(block.id) {
                if let Some(def) = stmt.def_temp() {
                    assert!(seen.insert(def), "{def} defined twice");
                    assert_eq!(du.def_stmt(&def), Some(stmt.id));
                }
            }
        }
    }

    #[test]
    fn test_diamond_phi_operands_follow_predecessor_order() -> crate::Result<()> {
        // L0 -> {L1, L2} -> L3; v = 1 on the left, v = 2 on the right
        let mut b = crate::ir::FunctionBuilder::new("f");
        let c = b.formal("c");
        let v = b.local("v");
        let (left, right, join) = (b.block(), b.block(), b.block());
        b.switch_to(b.entry());
        b.cjump(c, left, right);
        b.switch_to(left);
        b.mov(v.clone(), Expr::int(1));
        b.jump(join);
        b.switch_to(right);
        b.mov(v.clone(), Expr::int(2));
        b.jump(join);
        b.switch_to(join);
        b.ret(v);
        let mut f = b.finish()?;
        let (_, du) = to_ssa(&mut f);

        let phis = f.phis(join);
        assert_eq!(phis.len(), 1);
        let phi = f.stmt(phis[0]).as_phi().cloned().unwrap();
        let left_def = du.def_stmt(phi.incoming[0].as_temp().unwrap()).unwrap();
        let right_def = du.def_stmt(phi.incoming[1].as_temp().unwrap()).unwrap();
        assert_eq!(f.stmt(left_def).as_move().unwrap().source, Expr::int(1));
        assert_eq!(f.stmt(right_def).as_move().unwrap().source, Expr::int(2));
        Ok(())
    }
}
