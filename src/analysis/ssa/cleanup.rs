//! Removal of phis whose values never reach a non-phi use.

use log::debug;

use crate::{
    analysis::DefUses,
    ir::{Function, StmtId},
    utils::BitSet,
};

/// Returns `true` if `phi` and every phi transitively reading it feed only
/// other phis. All phis visited are added to `collected`.
fn has_phi_only_uses(function: &Function, phi: StmtId, def_uses: &DefUses, collected: &mut BitSet) -> bool {
    let mut stack = vec![phi];
    collected.insert(phi.index());

    while let Some(current) = stack.pop() {
        let Some(target) = function.stmt(current).def_temp() else {
            continue;
        };
        for &user in def_uses.uses(&target) {
            if function.stmt(user).as_phi().is_none() {
                return false;
            }
            if !collected.contains(user.index()) {
                collected.insert(user.index());
                stack.push(user);
            }
        }
    }
    true
}

/// Deletes every group of phis that only feed each other.
///
/// Phi placement is semi-pruned, so it inserts phis for variables that are
/// dead at the join; those phis and the cycles they form through loop headers
/// have no non-phi use and are removed here.
pub fn cleanup_phis(function: &mut Function, def_uses: &mut DefUses) {
    let count = function.statement_count();
    let mut to_remove = BitSet::new(count);
    let mut collected = BitSet::new(count);
    let mut all_phis = Vec::new();

    for def in def_uses.defs() {
        let Some(stmt) = def_uses.def_stmt(&def) else {
            continue;
        };
        if function.stmt(stmt).as_phi().is_none() {
            continue;
        }
        all_phis.push(stmt);
        if to_remove.contains(stmt.index()) {
            continue;
        }

        collected.clear();
        if has_phi_only_uses(function, stmt, def_uses, &mut collected) {
            to_remove.union_with(&collected);
        }
    }

    let mut removed = 0usize;
    for phi in all_phis {
        if !to_remove.contains(phi.index()) {
            continue;
        }
        let Some(target) = function.stmt(phi).def_temp() else {
            continue;
        };
        if let Some(block) = def_uses.def_block(&target) {
            function.remove_statement(block, phi);
        }
        for used in def_uses.used_vars(phi).to_vec() {
            def_uses.remove_use(phi, &used);
        }
        def_uses.remove_def(&target);
        removed += 1;
    }

    def_uses.cleanup();
    debug!("{}: removed {removed} phi-only phis", function.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, Expr, Phi, StmtKind};

    #[test]
    fn test_phi_cycle_without_real_use_is_removed() {
        // L0 -> L1 -> L2 -> L1, L1 -> L3
        // p1 = phi(a, p2) in L1, p2 = phi(p1) in L2, never read elsewhere
        let mut f = crate::test::cfg(4, &[(0, 1), (1, 2), (1, 3), (2, 1)]);
        let (a, p1, p2) = (f.new_temp(), f.new_temp(), f.new_temp());
        f.prepend(
            BlockId::new(0),
            StmtKind::Move(crate::ir::Move {
                target: Expr::Temp(a),
                source: Expr::int(1),
                swap: false,
            }),
        );
        f.prepend(
            BlockId::new(1),
            StmtKind::Phi(Phi {
                target: p1,
                incoming: vec![Expr::Temp(a), Expr::Temp(p2)],
            }),
        );
        f.prepend(
            BlockId::new(2),
            StmtKind::Phi(Phi {
                target: p2,
                incoming: vec![Expr::Temp(p1)],
            }),
        );
        let mut du = DefUses::build(&f);
        cleanup_phis(&mut f, &mut du);

        assert!(f.phis(BlockId::new(1)).is_empty());
        assert!(f.phis(BlockId::new(2)).is_empty());
        assert_eq!(du.use_count(&a), 0);
        assert!(du.def_stmt(&a).is_some());
    }

    #[test]
    fn test_phi_with_real_use_is_kept() {
        let mut f = crate::test::cfg(3, &[(0, 2), (1, 2)]);
        // L1 is unreachable in this fixture but that does not matter for the table
        let (a, p) = (f.new_temp(), f.new_temp());
        f.prepend(
            BlockId::new(2),
            StmtKind::Phi(Phi {
                target: p,
                incoming: vec![Expr::Temp(a), Expr::Temp(a)],
            }),
        );
        let ret = f.terminator(BlockId::new(2)).unwrap();
        f.stmt_mut(ret).kind = StmtKind::Ret(Expr::Temp(p));
        let mut du = DefUses::build(&f);
        cleanup_phis(&mut f, &mut du);
        assert_eq!(f.phis(BlockId::new(2)).len(), 1);
    }
}
