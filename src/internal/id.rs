use std::fmt::{Display, Formatter};

use crate::{internal::arena::ArenaId, Interner};

/// The id associated to a package name
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NameId(pub u32);

impl ArenaId for NameId {
    fn from_usize(x: usize) -> Self {
        Self(x as u32)
    }

    fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl NameId {
    /// Returns an object that can be used to format the name.
    pub fn display<I: Interner>(self, interner: &I) -> impl Display + '_ {
        interner.display_name(self)
    }
}

/// The id associated with a flag name. Flag names are interned globally, the
/// package a flag belongs to is part of the variable that refers to it.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FlagId(pub u32);

impl ArenaId for FlagId {
    fn from_usize(x: usize) -> Self {
        Self(x as u32)
    }

    fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// The id associated to a solvable, e.g. a single installed or buildable
/// instance of a package.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SolvableId(pub u32);

impl ArenaId for SolvableId {
    fn from_usize(x: usize) -> Self {
        Self(x as u32)
    }

    fn to_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<SolvableId> for u32 {
    fn from(value: SolvableId) -> Self {
        value.0
    }
}

impl SolvableId {
    /// Returns an object that can be used to format the solvable.
    pub fn display<I: Interner>(self, interner: &I) -> impl Display + '_ {
        DisplaySolvable {
            interner,
            id: self,
        }
    }
}

struct DisplaySolvable<'i, I: Interner> {
    interner: &'i I,
    id: SolvableId,
}

impl<I: Interner> Display for DisplaySolvable<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interner.display_solvable(self.id))
    }
}

/// The id of an interned solver variable. Ids are only meaningful within a
/// single solve.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub(crate) struct VariableId(u32);

impl ArenaId for VariableId {
    fn from_usize(x: usize) -> Self {
        Self(x as u32)
    }

    fn to_usize(self) -> usize {
        self.0 as usize
    }
}
