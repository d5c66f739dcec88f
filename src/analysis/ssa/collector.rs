//! Variable collection for semi-pruned SSA.

use crate::{
    ir::{BlockId, Function, StmtKind, Temp, TempKind},
    utils::BitSet,
};

/// Per-variable definition sites and liveness across blocks.
///
/// A variable is *non-local* if some block reads it before writing it; only
/// non-local variables can need a phi (semi-pruned SSA).
pub(crate) struct VariableCollector {
    all_temps: Vec<Option<Temp>>,
    def_sites: Vec<BitSet>,
    defs_in_block: Vec<Vec<u32>>,
    non_locals: BitSet,
}

impl VariableCollector {
    pub fn new(function: &Function) -> Self {
        let temp_count = function.temp_count as usize;
        let block_count = function.block_count();
        let mut collector = Self {
            all_temps: vec![None; temp_count],
            def_sites: vec![BitSet::new(block_count); temp_count],
            defs_in_block: vec![Vec::new(); block_count],
            non_locals: BitSet::new(temp_count),
        };

        let mut killed = BitSet::new(temp_count);
        for block in function.blocks() {
            killed.clear();
            for stmt in function.statements(block.id) {
                match &stmt.kind {
                    StmtKind::Phi(_) => {}
                    StmtKind::Move(m) => {
                        m.source.for_each_temp(&mut |t| collector.add_use(t, &killed));
                        match m.target.as_temp() {
                            Some(t) => {
                                collector.add_temp(t);
                                collector.def_sites[t.index as usize].insert(block.id.index());
                                let defs = &mut collector.defs_in_block[block.id.index()];
                                if !defs.contains(&t.index) {
                                    defs.push(t.index);
                                }
                                killed.insert(t.index as usize);
                            }
                            None => m
                                .target
                                .for_each_temp(&mut |t| collector.add_use(t, &killed)),
                        }
                    }
                    _ => stmt.for_each_use(&mut |t| collector.add_use(t, &killed)),
                }
            }
        }
        collector
    }

    fn add_temp(&mut self, temp: &Temp) {
        debug_assert_eq!(temp.kind, TempKind::VirtualRegister);
        let slot = &mut self.all_temps[temp.index as usize];
        if slot.is_none() {
            *slot = Some(*temp);
        }
    }

    fn add_use(&mut self, temp: &Temp, killed: &BitSet) {
        self.add_temp(temp);
        if !killed.contains(temp.index as usize) {
            self.non_locals.insert(temp.index as usize);
        }
    }

    /// Every variable referenced anywhere, by index.
    pub fn all_temps(&self) -> impl Iterator<Item = &Temp> {
        self.all_temps.iter().flatten()
    }

    /// Blocks containing a definition of `temp`.
    pub fn def_sites(&self, temp: &Temp) -> Vec<BlockId> {
        self.def_sites[temp.index as usize]
            .iter()
            .map(BlockId::new)
            .collect()
    }

    /// Variable indices defined in `block`.
    pub fn in_block(&self, block: BlockId) -> &[u32] {
        &self.defs_in_block[block.index()]
    }

    /// Returns `true` if some block reads `temp` before defining it.
    pub fn is_non_local(&self, temp: &Temp) -> bool {
        self.non_locals.contains(temp.index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AluOp, Expr, FunctionBuilder};

    #[test]
    fn test_block_local_variables_are_not_collected_as_non_local() -> crate::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let (t, u) = (b.temp(), b.temp());
        let next = b.block();
        b.switch_to(b.entry());
        // t is written before it is read: block-local
        b.mov(t, Expr::int(1));
        b.mov(u, Expr::binop(AluOp::Add, Expr::Temp(t), Expr::int(2)));
        b.jump(next);
        b.switch_to(next);
        // u is read before any write in this block: non-local
        b.ret(Expr::Temp(u));
        let f = b.finish()?;

        let collector = VariableCollector::new(&f);
        assert!(!collector.is_non_local(&t));
        assert!(collector.is_non_local(&u));
        assert_eq!(collector.def_sites(&u), vec![f.entry()]);
        assert_eq!(collector.in_block(f.entry()), &[0, 1]);
        Ok(())
    }
}
