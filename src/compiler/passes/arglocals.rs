//! Replacement of frame slots by virtual registers.
//!
//! Before SSA construction every local variable slot becomes a virtual
//! register, and every formal parameter becomes a virtual register loaded
//! once at the top of the entry block. Formals stay in their slots when the
//! function reads its arguments object (writes through `arguments[i]` must be
//! visible); nothing is converted when locals can escape into closures.

use crate::ir::{ArgLocalKind, BlockId, Expr, Function, Move, StmtKind, Temp};

/// Rewrites [`ArgLocal`](crate::ir::ArgLocal) operands into temps.
///
/// Returns `true` if the function was converted.
pub fn convert_arg_locals(function: &mut Function) -> bool {
    if function.variables_can_escape {
        return false;
    }

    let convert_formals = !function.uses_arguments_object;
    let mut temp_for_formal: Vec<Option<Temp>> = vec![None; function.formals.len()];
    let mut temp_for_local: Vec<Option<Temp>> = vec![None; function.locals.len()];

    if convert_formals {
        for slot in &mut temp_for_formal {
            *slot = Some(function.new_temp());
        }
    }

    for block in function.block_ids() {
        for id in function.block(block).statements.clone() {
            let mut stmt = function.stmt(id).clone();
            stmt.for_each_expr_mut(&mut |root| {
                root.walk_mut(&mut |e| {
                    let Expr::ArgLocal(al) = e else {
                        return false;
                    };
                    let replacement = match al.kind {
                        ArgLocalKind::Local => {
                            let slot = &mut temp_for_local[al.index as usize];
                            Some(*slot.get_or_insert_with(|| function.new_temp()))
                        }
                        ArgLocalKind::Formal if convert_formals => {
                            temp_for_formal[al.index as usize]
                        }
                        ArgLocalKind::Formal => None,
                    };
                    if let Some(temp) = replacement {
                        *e = Expr::Temp(temp);
                    }
                    true
                });
            });
            *function.stmt_mut(id) = stmt;
        }
    }

    if convert_formals {
        let entry: BlockId = function.entry();
        for (index, temp) in temp_for_formal.iter().enumerate().rev() {
            if let Some(temp) = temp {
                function.prepend(
                    entry,
                    StmtKind::Move(Move {
                        target: Expr::Temp(*temp),
                        source: Expr::formal(index as u32),
                        swap: false,
                    }),
                );
            }
        }
    }

    function.locals.clear();
    true
}
