//! Fixed-size BitSet backed by `[u64; 4]`.
//! No allocation, direct bitwise ops. Holds bit indices `0..256`.

use serde::{Deserialize, Serialize};

/// Number of 64-bit words in a [`BitSet`].
pub const BITSET_WORDS: usize = 4;

/// Number of addressable bits in a [`BitSet`].
pub const BITSET_BITS: usize = BITSET_WORDS * 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BitSet {
    words: [u64; BITSET_WORDS],
}

impl BitSet {
    /// Empty set.
    pub const EMPTY: Self = Self {
        words: [0; BITSET_WORDS],
    };

    /// Set the bit at `index` to true.
    ///
    /// # Panics
    /// Panics if `index >= BITSET_BITS`. Schema indices are bounded at registration.
    pub fn set(&mut self, index: usize) {
        let (word_idx, bit_idx) = (index / 64, index % 64);
        self.words[word_idx] |= 1 << bit_idx;
    }

    /// Clear the bit at `index`.
    pub fn clear(&mut self, index: usize) {
        let (word_idx, bit_idx) = (index / 64, index % 64);
        if word_idx < BITSET_WORDS {
            self.words[word_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if the bit at `index` is set.
    pub fn contains(&self, index: usize) -> bool {
        let (word_idx, bit_idx) = (index / 64, index % 64);
        if word_idx >= BITSET_WORDS {
            return false;
        }
        (self.words[word_idx] & (1 << bit_idx)) != 0
    }

    /// Returns true if this set shares any set bits with `other`.
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Returns true if every bit of `other` is also set in `self`.
    pub fn contains_all(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        Self { words }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w &= o;
        }
        Self { words }
    }

    /// Bits set in `self` but not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w &= !o;
        }
        Self { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns iterator over indices of set bits, ascending.
    pub fn ones(&self) -> OnesIter<'_> {
        OnesIter {
            bitset: self,
            word_idx: 0,
            current_word: self.words[0],
        }
    }
}

pub struct OnesIter<'a> {
    bitset: &'a BitSet,
    word_idx: usize,
    current_word: u64,
}

impl<'a> Iterator for OnesIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let trailing = self.current_word.trailing_zeros();
                self.current_word &= !(1 << trailing); // Clear the bit we just found
                return Some(self.word_idx * 64 + trailing as usize);
            }

            self.word_idx += 1;
            if self.word_idx >= BITSET_WORDS {
                return None;
            }
            self.current_word = self.bitset.words[self.word_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_contains() {
        let mut bits = BitSet::default();
        bits.set(3);
        bits.set(64);
        bits.set(255);
        assert!(bits.contains(3) && bits.contains(64) && bits.contains(255));
        assert!(!bits.contains(4));
        assert!(!bits.contains(1000));

        bits.clear(64);
        assert!(!bits.contains(64));
        assert_eq!(bits.count(), 2);
    }

    #[test]
    fn test_ones_crosses_words() {
        let mut bits = BitSet::default();
        for i in [1, 63, 64, 130, 200] {
            bits.set(i);
        }
        let ones: Vec<usize> = bits.ones().collect();
        assert_eq!(ones, vec![1, 63, 64, 130, 200]);
        assert_eq!(BitSet::EMPTY.ones().count(), 0);
    }

    #[test]
    fn test_set_algebra() {
        let mut a = BitSet::default();
        a.set(1);
        a.set(2);
        let mut b = BitSet::default();
        b.set(2);
        b.set(70);

        assert!(a.intersects(&b));
        assert!(!a.contains_all(&b));
        assert!(a.union(&b).contains_all(&b));
        assert_eq!(a.intersection(&b).ones().collect::<Vec<_>>(), vec![2]);
        assert_eq!(a.difference(&b).ones().collect::<Vec<_>>(), vec![1]);
        assert!(BitSet::EMPTY.is_empty());
    }
}
