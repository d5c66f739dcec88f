//! A growable bit vector keyed by small integer ids.
//!
//! The optimizer indexes most of its side tables by statement, temp or block
//! id. [`BitSet`] is the membership structure behind those tables: the
//! statement worklist, the SSA collector's killed sets, the stack-slot
//! allocator's in-use map and the liveness sets of the life-range builder.
//!
//! Besides the usual set operations it supports [`BitSet::find_next`] with
//! wrap-around, which lets the worklist continue scanning from the statement
//! it processed last, and [`BitSet::first_clear`], which returns the lowest
//! free slot.
//!
//! # Example
//!
//! ```rust
//! use ssajit::utils::BitSet;
//!
//! let mut set = BitSet::new(100);
//! set.insert(3);
//! set.insert(70);
//!
//! assert_eq!(set.find_next(4), Some(70));
//! assert_eq!(set.find_next(71), Some(3));
//! assert_eq!(set.first_clear(), 0);
//! ```

/// A bit vector for efficient set operations.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of addressable bits.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Grows the capacity to at least `capacity` bits. New bits are clear.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.len {
            self.words.resize(capacity.div_ceil(64), 0);
            self.len = capacity;
        }
    }

    /// Sets the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Clears the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    /// Returns `true` if the bit at the given index is set.
    ///
    /// Indices past the capacity are reported as clear.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && (self.words[index / 64] & (1u64 << (index % 64))) != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Computes the union with another bit set (in place).
    ///
    /// The capacity grows to cover `other`. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        self.grow(other.len);
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns the first set bit at or after `from`, wrapping around to the
    /// start of the set when the end is reached.
    #[must_use]
    pub fn find_next(&self, from: usize) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let from = if from >= self.len { 0 } else { from };
        self.scan(from, self.len).or_else(|| self.scan(0, from))
    }

    /// Returns the lowest clear bit, which may be `len()` when every bit is set.
    #[must_use]
    pub fn first_clear(&self) -> usize {
        for (i, &word) in self.words.iter().enumerate() {
            if word != u64::MAX {
                let idx = i * 64 + word.trailing_ones() as usize;
                return idx.min(self.len);
            }
        }
        self.len
    }

    fn scan(&self, start: usize, end: usize) -> Option<usize> {
        let mut index = start;
        while index < end {
            let word = self.words[index / 64] >> (index % 64);
            if word == 0 {
                index = (index / 64 + 1) * 64;
                continue;
            }
            let found = index + word.trailing_zeros() as usize;
            return (found < end).then_some(found);
        }
        None
    }

    /// Returns an iterator over the indices of set bits.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            next: 0,
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    next: usize,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let found = self.set.scan(self.next, self.set.len)?;
        self.next = found + 1;
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());

        bs.insert(0);
        bs.insert(50);
        bs.insert(99);

        assert_eq!(bs.count(), 3);
        assert!(bs.contains(50));
        assert!(!bs.contains(1));
        assert!(!bs.contains(1000));

        bs.remove(50);
        assert!(!bs.contains(50));
    }

    #[test]
    fn test_bitset_find_next_wraps() {
        let mut bs = BitSet::new(200);
        bs.insert(5);
        bs.insert(130);

        assert_eq!(bs.find_next(0), Some(5));
        assert_eq!(bs.find_next(6), Some(130));
        assert_eq!(bs.find_next(131), Some(5));
        assert_eq!(bs.find_next(500), Some(5));

        bs.clear();
        assert_eq!(bs.find_next(0), None);
    }

    #[test]
    fn test_bitset_first_clear() {
        let mut bs = BitSet::new(70);
        assert_eq!(bs.first_clear(), 0);
        for i in 0..65 {
            bs.insert(i);
        }
        assert_eq!(bs.first_clear(), 65);
        bs.remove(3);
        assert_eq!(bs.first_clear(), 3);
    }

    #[test]
    fn test_bitset_grow_and_union() {
        let mut a = BitSet::new(10);
        let mut b = BitSet::new(100);
        a.insert(1);
        b.insert(90);

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.len(), 100);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 90]);

        a.grow(300);
        a.insert(299);
        assert_eq!(a.count(), 3);
    }
}
