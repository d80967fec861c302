use std::{iter::FusedIterator, marker::PhantomData};

use crate::internal::arena::ArenaId;

/// A sparse table of values keyed by a dense id type.
///
/// Ids are handed out contiguously by the [`super::arena::Arena`]s and the
/// variable interner, so a plain vector of slots is enough. Unlike an
/// [`super::arena::Arena`] a mapping may have holes: not every id needs a
/// value.
#[derive(Clone, Debug)]
pub struct Mapping<TId, TValue> {
    slots: Vec<Option<TValue>>,
    len: usize,
    _phantom: PhantomData<TId>,
}

impl<TId: ArenaId, TValue> Default for Mapping<TId, TValue> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TId: ArenaId, TValue> Mapping<TId, TValue> {
    /// Constructs an empty mapping.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            _phantom: PhantomData,
        }
    }

    /// Stores `value` for `id` and returns the value that was stored before.
    pub fn insert(&mut self, id: TId, value: TValue) -> Option<TValue> {
        let index = id.to_usize();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let previous = self.slots[index].replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Returns the value stored for `id`.
    pub fn get(&self, id: TId) -> Option<&TValue> {
        self.slots.get(id.to_usize())?.as_ref()
    }

    /// Returns the value stored for `id` for modification.
    pub fn get_mut(&mut self, id: TId) -> Option<&mut TValue> {
        self.slots.get_mut(id.to_usize())?.as_mut()
    }

    /// Returns the number of ids that have a value.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no id has a value.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over every id that has a value, in id order.
    pub fn iter(&self) -> MappingIter<'_, TId, TValue> {
        MappingIter {
            slots: self.slots.iter().enumerate(),
            _phantom: PhantomData,
        }
    }
}

/// Iterator over the entries of a [`Mapping`], see [`Mapping::iter`].
pub struct MappingIter<'a, TId, TValue> {
    slots: std::iter::Enumerate<std::slice::Iter<'a, Option<TValue>>>,
    _phantom: PhantomData<TId>,
}

impl<'a, TId: ArenaId, TValue> Iterator for MappingIter<'a, TId, TValue> {
    type Item = (TId, &'a TValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots
            .by_ref()
            .find_map(|(index, slot)| slot.as_ref().map(|value| (TId::from_usize(index), value)))
    }
}

impl<TId: ArenaId, TValue> FusedIterator for MappingIter<'_, TId, TValue> {}

/// Serialized as a list with a `null` for every id without a value.
#[cfg(feature = "serde")]
impl<K: ArenaId, V: serde::Serialize> serde::Serialize for Mapping<K, V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let used = self
            .slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);
        self.slots[..used].serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, K: ArenaId, V: serde::Deserialize<'de>> serde::Deserialize<'de> for Mapping<K, V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let slots = Vec::<Option<V>>::deserialize(deserializer)?;
        let len = slots.iter().filter(|slot| slot.is_some()).count();
        Ok(Self {
            slots,
            len,
            _phantom: PhantomData,
        })
    }
}
