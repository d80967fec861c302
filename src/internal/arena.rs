use std::{
    fmt::{Debug, Formatter},
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// An `Arena<TId, TValue>` holds a collection of `TValue`s that can be
/// addressed by `TId`s. Values are never removed, so an id handed out by the
/// arena stays valid for the lifetime of the arena.
pub struct Arena<TId: ArenaId, TValue> {
    data: Vec<TValue>,
    phantom: PhantomData<TId>,
}

impl<TId: ArenaId, TValue> Default for Arena<TId, TValue> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TId: ArenaId, TValue: Clone> Clone for Arena<TId, TValue> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            phantom: PhantomData,
        }
    }
}

impl<TId: ArenaId, TValue: Debug> Debug for Arena<TId, TValue> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

impl<TId: ArenaId, TValue> Arena<TId, TValue> {
    /// Constructs a new, empty arena.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    /// Allocates a new value in the arena and returns its id.
    pub fn alloc(&mut self, value: TValue) -> TId {
        let id = TId::from_usize(self.data.len());
        self.data.push(value);
        id
    }

    /// Returns the number of values stored in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over all values together with their ids, in allocation
    /// order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (TId, &TValue)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(|(idx, value)| (TId::from_usize(idx), value))
    }
}

impl<TId: ArenaId, TValue> Index<TId> for Arena<TId, TValue> {
    type Output = TValue;

    fn index(&self, index: TId) -> &Self::Output {
        &self.data[index.to_usize()]
    }
}

impl<TId: ArenaId, TValue> IndexMut<TId> for Arena<TId, TValue> {
    fn index_mut(&mut self, index: TId) -> &mut Self::Output {
        &mut self.data[index.to_usize()]
    }
}

/// A trait indicating that the type can be transformed to `usize` and back
pub trait ArenaId {
    /// Converts a `usize` into the id.
    fn from_usize(x: usize) -> Self;

    /// Converts the id into a `usize`.
    fn to_usize(self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NameId;

    #[test]
    fn test_alloc_and_index() {
        let mut arena = Arena::<NameId, &str>::new();
        let a = arena.alloc("a");
        let b = arena.alloc("b");
        assert_eq!(arena[a], "a");
        assert_eq!(arena[b], "b");
        assert_eq!(arena.len(), 2);
        assert_eq!(
            arena.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
