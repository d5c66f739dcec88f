//! Linear-scan register allocation.
//!
//! Intervals are visited in start order. Each interval either gets a register
//! of its class for its whole lifetime or is spilled to a stack slot for its
//! whole lifetime; intervals are never split. When every register of a class
//! is taken, the interval reaching furthest is the one spilled, which frees
//! a register for the longest stretch.
//!
//! Spilled intervals then get stack slots with the same scan, reusing a slot
//! once its previous holder has ended.

use std::{cmp::Reverse, collections::BinaryHeap};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::{
    analysis::LifeTimeIntervals,
    config::{Config, MAX_REGISTERS},
    ir::{Function, Temp, TempKind, Type},
};

/// Register bank an interval is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterClass {
    /// Integers, booleans and boxed values.
    General,
    /// Doubles.
    FloatingPoint,
}

impl RegisterClass {
    /// The class a value of type `ty` lives in.
    #[must_use]
    pub fn of(ty: Type) -> Self {
        if ty == Type::DOUBLE {
            RegisterClass::FloatingPoint
        } else {
            RegisterClass::General
        }
    }
}

/// Where a virtual register ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A register of the interval's class.
    Register(u32),
    /// A stack slot.
    Spilled(u32),
}

/// What the allocator used, for the frame setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterUsage {
    /// Bit `i` is set if general register `i` holds a value.
    pub gp_mask: u32,
    /// Bit `i` is set if floating-point register `i` holds a value.
    pub fp_mask: u32,
    /// Stack slots taken by spilled intervals.
    pub stack_slots: u32,
}

impl RegisterUsage {
    /// Number of general registers used.
    #[must_use]
    pub fn gp_count(&self) -> u32 {
        self.gp_mask.count_ones()
    }

    /// Number of floating-point registers used.
    #[must_use]
    pub fn fp_count(&self) -> u32 {
        self.fp_mask.count_ones()
    }
}

/// Assigns registers and spill slots to the intervals of a scheduled SSA function.
#[derive(Debug, Clone, Copy)]
pub struct RegisterAllocator {
    register_count: u32,
    fp_register_count: u32,
}

impl RegisterAllocator {
    /// An allocator with the register files described by `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_registers(config.register_count, config.fp_register_count)
    }

    /// An allocator with `general` and `fp` registers, at most [`MAX_REGISTERS`] each.
    #[must_use]
    pub fn with_registers(general: u32, fp: u32) -> Self {
        Self {
            register_count: general.min(MAX_REGISTERS),
            fp_register_count: fp.min(MAX_REGISTERS),
        }
    }

    fn registers(&self, class: RegisterClass) -> u32 {
        match class {
            RegisterClass::General => self.register_count,
            RegisterClass::FloatingPoint => self.fp_register_count,
        }
    }

    /// Computes a location for every interval, keyed by virtual register index.
    #[must_use]
    pub fn allocate(&self, intervals: &LifeTimeIntervals) -> (FxHashMap<u32, Location>, RegisterUsage) {
        let all = intervals.intervals();
        let mut locations: FxHashMap<u32, Location> = FxHashMap::default();
        let mut usage = RegisterUsage::default();

        // (end, register, interval) per class, earliest end on top
        let mut active: FxHashMap<RegisterClass, BinaryHeap<Reverse<(u32, u32, usize)>>> =
            FxHashMap::default();
        let mut free: FxHashMap<RegisterClass, u32> = FxHashMap::default();
        let mut spilled: Vec<usize> = Vec::new();

        for (index, interval) in all.iter().enumerate() {
            if interval.is_empty() {
                continue;
            }
            let class = RegisterClass::of(interval.temp().ty);
            let available = self.registers(class);
            let class_active = active.entry(class).or_default();
            let class_free = free.entry(class).or_insert_with(|| mask_of(available));

            while let Some(&Reverse((end, reg, _))) = class_active.peek() {
                if end >= interval.start() {
                    break;
                }
                class_active.pop();
                *class_free |= 1 << reg;
            }

            if *class_free != 0 {
                let reg = class_free.trailing_zeros();
                *class_free &= !(1 << reg);
                class_active.push(Reverse((interval.end(), reg, index)));
                locations.insert(interval.temp().index, Location::Register(reg));
                continue;
            }

            // steal from the interval reaching furthest if it outlives this one
            let victim = class_active
                .iter()
                .map(|Reverse(entry)| *entry)
                .max_by_key(|&(end, _, i)| (end, Reverse(i)));
            match victim {
                Some((end, reg, victim_index)) if end > interval.end() => {
                    class_active.retain(|Reverse((_, _, i))| *i != victim_index);
                    class_active.push(Reverse((interval.end(), reg, index)));
                    locations.insert(interval.temp().index, Location::Register(reg));
                    spilled.push(victim_index);
                    trace!("spilling {} for {}", all[victim_index].temp(), interval.temp());
                }
                _ => spilled.push(index),
            }
        }

        spilled.sort_unstable();
        usage.stack_slots = assign_spill_slots(intervals, &spilled, &mut locations);
        for interval in all {
            if let Some(&Location::Register(reg)) = locations.get(&interval.temp().index) {
                match RegisterClass::of(interval.temp().ty) {
                    RegisterClass::General => usage.gp_mask |= 1 << reg,
                    RegisterClass::FloatingPoint => usage.fp_mask |= 1 << reg,
                }
            }
        }
        (locations, usage)
    }

    /// Allocates `function` and rewrites its virtual registers into the
    /// assigned registers and stack slots. Phis are kept; they are rewritten
    /// too and can be eliminated afterwards.
    pub fn run(&self, function: &mut Function, intervals: &LifeTimeIntervals) -> RegisterUsage {
        let (locations, usage) = self.allocate(intervals);
        let types: FxHashMap<u32, Type> = intervals
            .intervals()
            .iter()
            .map(|lti| (lti.temp().index, lti.temp().ty))
            .collect();

        for block in function.block_ids() {
            for id in function.block(block).statements.clone() {
                function.stmt_mut(id).for_each_temp_mut(&mut |temp| {
                    if temp.kind != TempKind::VirtualRegister {
                        return;
                    }
                    let ty = types.get(&temp.index).copied().unwrap_or(temp.ty);
                    match locations.get(&temp.index) {
                        Some(Location::Register(reg)) => *temp = Temp::physical(*reg, ty),
                        Some(Location::Spilled(slot)) => *temp = Temp::stack_slot(*slot, ty),
                        None => debug_assert!(false, "{temp} was not allocated"),
                    }
                });
            }
        }

        debug!(
            "{}: {} general and {} fp registers, {} spill slots",
            function.name,
            usage.gp_count(),
            usage.fp_count(),
            usage.stack_slots
        );
        usage
    }
}

fn mask_of(count: u32) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1 << count) - 1
    }
}

/// Gives each spilled interval a slot, reusing slots whose holder has ended.
fn assign_spill_slots(
    intervals: &LifeTimeIntervals,
    spilled: &[usize],
    locations: &mut FxHashMap<u32, Location>,
) -> u32 {
    let all = intervals.intervals();
    let mut active: BinaryHeap<Reverse<(u32, u32)>> = BinaryHeap::new();
    let mut free_slots: Vec<u32> = Vec::new();
    let mut next_slot = 0;

    // `spilled` is sorted, and so are the intervals, by start
    for &index in spilled {
        let interval = &all[index];
        while let Some(&Reverse((end, slot))) = active.peek() {
            if end >= interval.start() {
                break;
            }
            active.pop();
            free_slots.push(slot);
        }
        free_slots.sort_unstable_by(|a, b| b.cmp(a));
        let slot = free_slots.pop().unwrap_or_else(|| {
            let slot = next_slot;
            next_slot += 1;
            slot
        });
        trace!("{} spilled to ${slot}", interval.temp());
        locations.insert(interval.temp().index, Location::Spilled(slot));
        active.push(Reverse((interval.end(), slot)));
    }
    next_slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LifeTimeInterval;

    fn intervals(spans: &[(u32, u32, Type)]) -> LifeTimeIntervals {
        let mut all = LifeTimeIntervals::default();
        for (index, &(from, to, ty)) in spans.iter().enumerate() {
            let mut lti = LifeTimeInterval::new(Temp::virtual_reg(index as u32).with_type(ty));
            lti.add_range(from, to);
            all.add(lti);
        }
        all
    }

    #[test]
    fn test_registers_are_reused_after_expiry() {
        let all = intervals(&[
            (1, 4, Type::SINT32),
            (3, 8, Type::SINT32),
            (5, 6, Type::SINT32),
            (9, 10, Type::SINT32),
        ]);
        let (locations, usage) = RegisterAllocator::with_registers(2, 2).allocate(&all);
        assert_eq!(locations[&0], Location::Register(0));
        assert_eq!(locations[&1], Location::Register(1));
        // %0 ended at 4
        assert_eq!(locations[&2], Location::Register(0));
        assert_eq!(locations[&3], Location::Register(0));
        assert_eq!(usage.gp_mask, 0b11);
        assert_eq!((usage.fp_mask, usage.stack_slots), (0, 0));
    }

    #[test]
    fn test_classes_do_not_compete() {
        let all = intervals(&[(1, 10, Type::DOUBLE), (1, 10, Type::SINT32), (3, 10, Type::DOUBLE)]);
        let (locations, usage) = RegisterAllocator::with_registers(1, 2).allocate(&all);
        assert_eq!(locations[&0], Location::Register(0));
        assert_eq!(locations[&1], Location::Register(0));
        assert_eq!(locations[&2], Location::Register(1));
        assert_eq!((usage.gp_mask, usage.fp_mask), (0b1, 0b11));
    }

    #[test]
    fn test_furthest_interval_is_spilled() {
        // one register: %0 reaches furthest and gives way to %1; %2 starts
        // after %1 ended and takes the register back
        let all = intervals(&[(1, 20, Type::VAR), (3, 6, Type::VAR), (7, 9, Type::VAR), (11, 12, Type::VAR)]);
        let (locations, usage) = RegisterAllocator::with_registers(1, 0).allocate(&all);
        assert_eq!(locations[&0], Location::Spilled(0));
        assert_eq!(locations[&1], Location::Register(0));
        assert_eq!(locations[&2], Location::Register(0));
        assert_eq!(usage.stack_slots, 1);

        // no fp registers at all: doubles live on the stack, sharing slots
        let all = intervals(&[(1, 4, Type::DOUBLE), (5, 8, Type::DOUBLE)]);
        let (locations, usage) = RegisterAllocator::with_registers(4, 0).allocate(&all);
        assert_eq!(locations[&0], Location::Spilled(0));
        assert_eq!(locations[&1], Location::Spilled(0));
        assert_eq!((usage.fp_mask, usage.stack_slots), (0, 1));
    }
}
