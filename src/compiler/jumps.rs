//! Jumps the assembler can drop because their target follows in the layout.

use log::debug;
use rustc_hash::FxHashSet;

use crate::ir::{BlockId, Function, StmtId, StmtKind};

/// Finds the unconditional jumps whose target is reached by falling through.
///
/// Blocks are visited from last to first while tracking the set of blocks
/// that execution reaches without a jump from the end of the current one.
/// A block holding nothing but an optional jump stays transparent, so a
/// jump over a chain of such blocks is optional as well.
#[must_use]
pub fn calculate_optional_jumps(function: &Function) -> FxHashSet<StmtId> {
    let mut optional = FxHashSet::default();
    let mut reachable_without_jump: FxHashSet<BlockId> = FxHashSet::default();

    for block in function.block_ids().into_iter().rev() {
        let statements = &function.block(block).statements;
        let jump = function
            .terminator(block)
            .filter(|&id| matches!(function.stmt(id).kind, StmtKind::Jump(target) if reachable_without_jump.contains(&target)));

        match jump {
            Some(id) => {
                if statements.len() > 1 {
                    reachable_without_jump.clear();
                }
                optional.insert(id);
            }
            None => reachable_without_jump.clear(),
        }
        reachable_without_jump.insert(block);
    }

    debug!("{}: {} optional jumps", function.name, optional.len());
    optional
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::FunctionBuilder, test::cfg};

    #[test]
    fn test_fallthrough_jumps_are_optional() {
        // 0 -> 1 -> 2, 2 returns
        let f = cfg(3, &[(0, 1), (1, 2)]);
        let optional = calculate_optional_jumps(&f);
        assert_eq!(optional.len(), 2);
        for block in [0, 1] {
            assert!(optional.contains(&f.terminator(BlockId::new(block)).unwrap()));
        }
    }

    #[test]
    fn test_backward_jump_is_kept() {
        // 0 -> 1 -> 2 -> 1 (loop), 1 -> 3
        let f = cfg(4, &[(0, 1), (1, 2), (1, 3), (2, 1)]);
        let optional = calculate_optional_jumps(&f);
        assert!(optional.contains(&f.terminator(BlockId::new(0)).unwrap()));
        assert!(!optional.contains(&f.terminator(BlockId::new(2)).unwrap()));
    }

    #[test]
    fn test_jump_over_empty_blocks() {
        // L0: x = 1; goto L2.  L1: goto L2.  L2: return
        let mut b = FunctionBuilder::new("f");
        let (l1, l2) = (b.block(), b.block());
        b.switch_to(b.entry());
        let t = b.temp();
        b.mov(t, crate::ir::Expr::int(1));
        b.jump(l2);
        b.switch_to(l1);
        b.jump(l2);
        b.switch_to(l2);
        b.ret(t.into());
        let f = b.finish().unwrap();

        let optional = calculate_optional_jumps(&f);
        assert!(optional.contains(&f.terminator(l1).unwrap()));
        assert!(optional.contains(&f.terminator(f.entry()).unwrap()));

        // a block with other statements ends the transparent chain
        let mut b = FunctionBuilder::new("g");
        let (l1, l2) = (b.block(), b.block());
        b.switch_to(b.entry());
        b.jump(l2);
        b.switch_to(l1);
        let t = b.temp();
        b.mov(t, crate::ir::Expr::int(1));
        b.jump(l2);
        b.switch_to(l2);
        b.ret(crate::ir::Expr::undefined());
        let g = b.finish().unwrap();

        let optional = calculate_optional_jumps(&g);
        assert!(optional.contains(&g.terminator(l1).unwrap()));
        assert!(!optional.contains(&g.terminator(g.entry()).unwrap()));
    }
}
