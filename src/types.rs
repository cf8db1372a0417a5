//! Archetype identity sets
//!
//! `ComponentTypes` and `Tags` are fixed-size bitsets keyed by schema index.
//! Two sets are equal iff their bit patterns are equal, so the pair is used
//! directly as the archetype lookup key.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::bitset::{BitSet, OnesIter};
use crate::schema::{StructIndex, TagIndex};

macro_rules! schema_set {
    ($(#[$meta:meta])* $name:ident, $index:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name {
            bits: BitSet,
        }

        impl $name {
            /// Empty set.
            pub const EMPTY: Self = Self { bits: BitSet::EMPTY };

            pub fn new() -> Self {
                Self::default()
            }

            /// Build from schema indices.
            pub fn from_indices<I: IntoIterator<Item = $index>>(indices: I) -> Self {
                let mut set = Self::default();
                for index in indices {
                    set.add(index);
                }
                set
            }

            /// Add `index`. The null index is ignored.
            pub fn add(&mut self, index: $index) {
                if !index.is_null() {
                    self.bits.set(index.get());
                }
            }

            pub fn remove(&mut self, index: $index) {
                self.bits.clear(index.get());
            }

            /// Builder style add.
            pub fn with(mut self, index: $index) -> Self {
                self.add(index);
                self
            }

            pub fn has(&self, index: $index) -> bool {
                self.bits.contains(index.get())
            }

            /// True if every member of `other` is in `self`.
            pub fn has_all(&self, other: &Self) -> bool {
                self.bits.contains_all(&other.bits)
            }

            /// True if `self` and `other` share a member.
            pub fn has_any(&self, other: &Self) -> bool {
                self.bits.intersects(&other.bits)
            }

            pub fn union(&self, other: &Self) -> Self {
                Self { bits: self.bits.union(&other.bits) }
            }

            pub fn intersection(&self, other: &Self) -> Self {
                Self { bits: self.bits.intersection(&other.bits) }
            }

            /// Members of `self` missing from `other`.
            pub fn difference(&self, other: &Self) -> Self {
                Self { bits: self.bits.difference(&other.bits) }
            }

            pub fn len(&self) -> usize {
                self.bits.count()
            }

            pub fn is_empty(&self) -> bool {
                self.bits.is_empty()
            }

            /// Members in ascending index order.
            pub fn iter(&self) -> SchemaSetIter<'_, $index> {
                SchemaSetIter {
                    ones: self.bits.ones(),
                    make: |i| $index::from_usize(i),
                }
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(&rhs)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.union(&rhs);
            }
        }

        impl From<$index> for $name {
            fn from(index: $index) -> Self {
                Self::new().with(index)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}[", $label)?;
                for (i, index) in self.bits.ones().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{index}")?;
                }
                write!(f, "]")
            }
        }
    };
}

schema_set!(
    /// Set of component types, one bit per `StructIndex`.
    ComponentTypes,
    StructIndex,
    "Components"
);

schema_set!(
    /// Set of tags, one bit per `TagIndex`.
    Tags,
    TagIndex,
    "Tags"
);

/// Iterator over the members of a [`ComponentTypes`] or [`Tags`] set.
pub struct SchemaSetIter<'a, I> {
    ones: OnesIter<'a>,
    make: fn(usize) -> I,
}

impl<'a, I> Iterator for SchemaSetIter<'a, I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        self.ones.next().map(self.make)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_bit_pattern() {
        let a = ComponentTypes::from_indices([StructIndex::from_usize(3), StructIndex::from_usize(1)]);
        let b = ComponentTypes::new()
            .with(StructIndex::from_usize(1))
            .with(StructIndex::from_usize(3));
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(
            a.iter().map(|i| i.get()).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_null_index_ignored() {
        let tags = Tags::from(TagIndex::NULL);
        assert!(tags.is_empty());
    }

    #[test]
    fn test_has_all_any() {
        let one = TagIndex::from_usize(1);
        let two = TagIndex::from_usize(2);
        let both = Tags::from(one) | Tags::from(two);
        assert!(both.has_all(&Tags::from(one)));
        assert!(!Tags::from(one).has_all(&both));
        assert!(Tags::from(one).has_any(&both));
        assert!(!Tags::from(one).has_any(&Tags::from(two)));
        assert_eq!(format!("{both:?}"), "Tags[1, 2]");
    }
}
