//! Variable renaming over the dominator tree.
//!
//! The classic algorithm is recursive over the dominator tree and restores
//! the variable mapping on the way back up. Switch statements with thousands
//! of fall-through cases make that recursion arbitrarily deep, so the walk
//! runs off an explicit stack holding two kinds of action: rename a block, or
//! restore one mapping entry. Renaming a block pushes a restore for every
//! mapping it changes, then pushes its dominator-tree children on top, so the
//! children run first and the restores unwind the mapping afterwards.

use crate::{
    analysis::{DefUses, DominatorTree},
    ir::{BlockId, Expr, Function, StmtId, StmtKind, Temp, TempKind},
};

enum Action {
    Rename(BlockId),
    Restore { temp: u32, previous: Option<u32> },
}

pub(crate) struct VariableRenamer<'a> {
    function: &'a mut Function,
    def_uses: &'a mut DefUses,
    mapping: Vec<Option<u32>>,
    temp_count: u32,
    todo: Vec<Action>,
}

impl<'a> VariableRenamer<'a> {
    pub fn new(function: &'a mut Function, def_uses: &'a mut DefUses) -> Self {
        let mapping = vec![None; function.temp_count as usize];
        Self {
            function,
            def_uses,
            mapping,
            temp_count: 0,
            todo: Vec::new(),
        }
    }

    pub fn run(mut self, dominators: &DominatorTree) {
        let children = dominators.children(self.function);
        self.todo.push(Action::Rename(self.function.entry()));

        while let Some(action) = self.todo.pop() {
            match action {
                Action::Rename(block) => {
                    self.rename_block(block);
                    for &child in children[block.index()].iter().rev() {
                        self.todo.push(Action::Rename(child));
                    }
                }
                Action::Restore { temp, previous } => self.mapping[temp as usize] = previous,
            }
        }

        self.function.temp_count = self.temp_count;
    }

    fn rename_block(&mut self, block: BlockId) {
        let statements = self.function.block(block).statements.clone();
        for stmt in statements {
            self.rename_statement(block, stmt);
        }

        let succs = self.function.block(block).succs.clone();
        let mut filled: Vec<BlockId> = Vec::with_capacity(succs.len());
        for succ in succs {
            // a block reached twice from the same predecessor has two slots to fill
            if filled.contains(&succ) {
                continue;
            }
            filled.push(succ);
            let slots: Vec<usize> = self
                .function
                .block(succ)
                .preds
                .iter()
                .enumerate()
                .filter(|(_, &p)| p == block)
                .map(|(j, _)| j)
                .collect();
            for phi in self.function.phis(succ) {
                for &j in &slots {
                    let original = match &self.function.stmt(phi).kind {
                        StmtKind::Phi(p) => p.incoming[j].as_temp().copied(),
                        _ => None,
                    };
                    let Some(original) = original else {
                        continue;
                    };
                    let renamed = self.current_number(&original);
                    if let StmtKind::Phi(p) = &mut self.function.stmt_mut(phi).kind {
                        p.incoming[j] = Expr::Temp(renamed);
                    }
                    self.def_uses.add_use(renamed, phi);
                }
            }
        }
    }

    fn rename_statement(&mut self, block: BlockId, id: StmtId) {
        // phi operands are renamed from the predecessors
        let mut kind = std::mem::replace(&mut self.function.stmt_mut(id).kind, StmtKind::Jump(block));
        match &mut kind {
            StmtKind::Phi(phi) => {
                phi.target = self.rename_def(&phi.target, id, block);
            }
            StmtKind::Move(m) => {
                self.rename_uses(&mut m.source, id);
                match &mut m.target {
                    Expr::Temp(t) => *t = self.rename_def(t, id, block),
                    target => self.rename_uses(target, id),
                }
            }
            StmtKind::Exp(e) | StmtKind::Ret(e) => self.rename_uses(e, id),
            StmtKind::CJump(cj) => self.rename_uses(&mut cj.cond, id),
            StmtKind::Jump(_) => {}
        }
        self.function.stmt_mut(id).kind = kind;
    }

    fn rename_uses(&mut self, expr: &mut Expr, stmt: StmtId) {
        let mut renamed = Vec::new();
        expr.for_each_temp_mut(&mut |t| {
            let new = self.current_number(t);
            *t = new;
            renamed.push(new);
        });
        for t in renamed {
            self.def_uses.add_use(t, stmt);
        }
    }

    fn rename_def(&mut self, temp: &Temp, stmt: StmtId, block: BlockId) -> Temp {
        let new = self.next_free_temp(temp);
        self.def_uses.add_def(new, stmt, block);
        new
    }

    /// The SSA value currently bound to `temp`.
    ///
    /// A variable read on a path where it was never written gets a fresh value
    /// with no definition, which reads as `undefined`.
    fn current_number(&mut self, temp: &Temp) -> Temp {
        match self.mapping[temp.index as usize] {
            Some(index) => Temp::virtual_reg(index).with_type(temp.ty),
            None => self.next_free_temp(temp),
        }
    }

    fn next_free_temp(&mut self, temp: &Temp) -> Temp {
        debug_assert_eq!(temp.kind, TempKind::VirtualRegister);
        let index = self.temp_count;
        self.temp_count += 1;
        let previous = self.mapping[temp.index as usize].replace(index);
        self.todo.push(Action::Restore {
            temp: temp.index,
            previous,
        });
        Temp::virtual_reg(index).with_type(temp.ty)
    }
}
