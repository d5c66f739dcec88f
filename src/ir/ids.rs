//! Arena indices for blocks and statements.
//!
//! Blocks and statements live in per-function arenas and refer to each other
//! through these indices instead of pointers. The same indices key every side
//! table the optimizer keeps (def-use records, worklist membership, life-time
//! positions, dominator links).

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates an id from a raw arena index.
            #[must_use]
            #[inline]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(index: usize) -> Self {
                Self::new(index)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(id: $name) -> Self {
                id.index()
            }
        }
    };
}

arena_id!(
    /// Index of a [`BasicBlock`](crate::ir::BasicBlock) in its function's block arena.
    ///
    /// Block ids are stable until [`Function::renumber_blocks`](crate::ir::Function::renumber_blocks)
    /// compacts the arena into the scheduled order.
    BlockId,
    "L"
);

arena_id!(
    /// Index of a [`Stmt`](crate::ir::Stmt) in its function's statement arena.
    ///
    /// Statement ids never change. Removing a statement from its block leaves the
    /// arena slot in place, so ids stored in side tables stay valid.
    StmtId,
    "s"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_roundtrip_and_display() {
        let block = BlockId::new(7);
        assert_eq!(block.index(), 7);
        assert_eq!(format!("{block}"), "L7");
        assert_eq!(format!("{block:?}"), "BlockId(7)");
        assert_eq!(usize::from(StmtId::from(3)), 3);
        assert_eq!(format!("{}", StmtId::new(3)), "s3");
    }

    #[test]
    fn test_id_ordering_and_hash() {
        let mut ids = vec![BlockId::new(3), BlockId::new(1), BlockId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![BlockId::new(1), BlockId::new(2), BlockId::new(3)]);

        let set: HashSet<StmtId> = [StmtId::new(1), StmtId::new(1), StmtId::new(2)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
