//! Stack-slot assignment without liveness: one slot per virtual register.

use rustc_hash::FxHashMap;

use crate::ir::{Function, Temp, TempKind};

/// Rewrites every virtual register into its own stack slot, numbered in order
/// of first appearance.
///
/// Used when SSA form is off, so no interval information exists to share
/// slots. Returns the number of slots used.
pub fn convert_temps(function: &mut Function) -> u32 {
    let mut slots: FxHashMap<u32, u32> = FxHashMap::default();
    for block in function.block_ids() {
        for id in function.block(block).statements.clone() {
            function.stmt_mut(id).for_each_temp_mut(&mut |temp| {
                if temp.kind != TempKind::VirtualRegister {
                    return;
                }
                let next = slots.len() as u32;
                let slot = *slots.entry(temp.index).or_insert(next);
                *temp = Temp::stack_slot(slot, temp.ty);
            });
        }
    }
    slots.len() as u32
}
