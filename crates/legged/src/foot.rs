//! Foot identities and contact sets.
//!
//! The canonical foot order is fixed once ([`Foot::ALL`]) and used everywhere
//! downstream, so that stacked Jacobian rows and target rows always align.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// One of the four feet of the quadruped.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum Foot {
    #[strum(serialize = "LF")]
    LeftFront,
    #[strum(serialize = "RF")]
    RightFront,
    #[strum(serialize = "LH")]
    LeftHind,
    #[strum(serialize = "RH")]
    RightHind,
}

impl Foot {
    /// The canonical generic foot order.
    pub const ALL: [Foot; 4] = [
        Foot::LeftFront,
        Foot::RightFront,
        Foot::LeftHind,
        Foot::RightHind,
    ];

    /// Index of this foot in the canonical order.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Foot::LeftFront => 0,
            Foot::RightFront => 1,
            Foot::LeftHind => 2,
            Foot::RightHind => 3,
        }
    }

    /// The diagonal trot partner of this foot.
    #[must_use]
    pub fn diagonal(self) -> Foot {
        match self {
            Foot::LeftFront => Foot::RightHind,
            Foot::RightFront => Foot::LeftHind,
            Foot::LeftHind => Foot::RightFront,
            Foot::RightHind => Foot::LeftFront,
        }
    }

    /// Whether this foot is on the left side of the body.
    #[must_use]
    pub fn is_left(self) -> bool {
        matches!(self, Foot::LeftFront | Foot::LeftHind)
    }

    /// Whether this foot is on the front axle.
    #[must_use]
    pub fn is_front(self) -> bool {
        matches!(self, Foot::LeftFront | Foot::RightFront)
    }
}

/// A set of feet, iterated in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FootSet(u8);

impl FootSet {
    /// The empty set.
    pub const EMPTY: FootSet = FootSet(0);

    /// All four feet.
    pub const ALL: FootSet = FootSet(0b1111);

    /// The diagonal pair containing the left-front foot.
    pub const LEFT_DIAGONAL: FootSet = FootSet::EMPTY
        .with(Foot::LeftFront)
        .with(Foot::RightHind);

    /// The diagonal pair containing the right-front foot.
    pub const RIGHT_DIAGONAL: FootSet = FootSet::EMPTY
        .with(Foot::RightFront)
        .with(Foot::LeftHind);

    /// Returns this set with `foot` added.
    #[must_use]
    pub const fn with(self, foot: Foot) -> FootSet {
        FootSet(self.0 | 1 << foot as u8)
    }

    pub fn insert(&mut self, foot: Foot) {
        *self = self.with(foot);
    }

    pub fn remove(&mut self, foot: Foot) {
        self.0 &= !(1 << foot as u8);
    }

    #[must_use]
    pub fn contains(self, foot: Foot) -> bool {
        self.0 & 1 << foot as u8 != 0
    }

    /// Number of feet in the set.
    #[must_use]
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The feet not in this set.
    #[must_use]
    pub fn complement(self) -> FootSet {
        FootSet(!self.0 & Self::ALL.0)
    }

    #[must_use]
    pub fn union(self, other: FootSet) -> FootSet {
        FootSet(self.0 | other.0)
    }

    #[must_use]
    pub fn intersection(self, other: FootSet) -> FootSet {
        FootSet(self.0 & other.0)
    }

    #[must_use]
    pub fn is_disjoint(self, other: FootSet) -> bool {
        self.intersection(other).is_empty()
    }

    /// Iterate the feet in the set, in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Foot> {
        Foot::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    /// Position of `foot` among the set members in canonical order, if present.
    ///
    /// This is the row block index of the foot in any vector or matrix stacked
    /// over this set.
    #[must_use]
    pub fn position(self, foot: Foot) -> Option<usize> {
        self.iter().position(|f| f == foot)
    }
}

impl FromIterator<Foot> for FootSet {
    fn from_iter<I: IntoIterator<Item = Foot>>(iter: I) -> Self {
        iter.into_iter().fold(FootSet::EMPTY, FootSet::with)
    }
}
