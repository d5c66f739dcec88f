//! SSA well-formedness check.

use rustc_hash::FxHashMap;

use crate::{
    analysis::{DefUses, DominatorTree},
    ir::{BlockId, Function, StmtKind, Temp, TempKind},
    Error, Result,
};

/// Checks that every temp is defined once and that definitions dominate uses.
///
/// A phi operand must be defined in a block dominating (or equal to) the
/// matching predecessor; any other use must follow its definition in the same
/// block or sit in a block the definition's block strictly dominates. Temps
/// without a definition read as `undefined` and are not checked.
///
/// # Errors
///
/// Returns [`Error::SsaError`] describing the first violation.
pub fn verify_ssa(function: &Function, dominators: &DominatorTree, def_uses: &DefUses) -> Result<()> {
    let fail = |msg: String| Err(Error::SsaError(format!("{}: {msg}", function.name)));

    let mut defs: FxHashMap<Temp, (BlockId, usize)> = FxHashMap::default();
    for block in function.blocks() {
        for (pos, stmt) in function.statements(block.id).enumerate() {
            if let Some(def) = stmt.def_temp() {
                if def.kind != TempKind::VirtualRegister {
                    continue;
                }
                if defs.insert(def, (block.id, pos)).is_some() {
                    return fail(format!("{def} has more than one definition"));
                }
                if def_uses.def_stmt(&def) != Some(stmt.id) {
                    return fail(format!("def-use table does not record {} as the def of {def}", stmt.id));
                }
            }
        }
    }

    let defined_before = |temp: &Temp, block: BlockId, pos: usize| -> bool {
        match defs.get(temp) {
            None => true,
            Some(&(def_block, def_pos)) if def_block == block => def_pos < pos,
            Some(&(def_block, _)) => dominators.dominates(def_block, block),
        }
    };

    for block in function.blocks() {
        for (pos, stmt) in function.statements(block.id).enumerate() {
            if let StmtKind::Phi(phi) = &stmt.kind {
                for (j, value) in phi.incoming.iter().enumerate() {
                    let pred = block.preds[j];
                    for temp in value.temps() {
                        let ok = match defs.get(&temp) {
                            None => true,
                            Some(&(def_block, _)) => dominators.dominates_or_equal(def_block, pred),
                        };
                        if !ok {
                            return fail(format!(
                                "{}: operand {temp} from {pred} is not defined on that edge",
                                stmt.id
                            ));
                        }
                    }
                }
                continue;
            }
            for temp in stmt.uses() {
                if temp.kind != TempKind::VirtualRegister {
                    continue;
                }
                if !defined_before(&temp, block.id, pos) {
                    return fail(format!("{}: use of {temp} is not dominated by its definition", stmt.id));
                }
                if !def_uses.uses(&temp).contains(&stmt.id) {
                    return fail(format!("def-use table misses the use of {temp} in {}", stmt.id));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Move};

    #[test]
    fn test_use_before_def_is_rejected() {
        // L0 -> L1; t is read in L0 but defined in L1
        let mut f = crate::test::cfg(2, &[(0, 1)]);
        let (t, u) = (f.new_temp(), f.new_temp());
        f.prepend(
            BlockId::new(0),
            StmtKind::Move(Move {
                target: Expr::Temp(u),
                source: Expr::Temp(t),
                swap: false,
            }),
        );
        f.prepend(
            BlockId::new(1),
            StmtKind::Move(Move {
                target: Expr::Temp(t),
                source: Expr::int(1),
                swap: false,
            }),
        );
        let du = DefUses::build(&f);
        let dominators = DominatorTree::new(&f);
        assert!(matches!(verify_ssa(&f, &dominators, &du), Err(Error::SsaError(_))));
    }
}
