//! Arena indices. A bipartite graph (execution groups referencing multiple
//! fragments, fragments referencing multiple groups) is modelled as two slab
//! allocators with these indices as cross-references, rather than as a tree
//! of owned values, since the reference structure is cyclic/shared and
//! wouldn't fit an ownership tree.

use std::fmt;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(FragmentId);
arena_id!(GroupId);
arena_id!(StreamId);

/// Identifies either kind of delivery group: a deferred fragment or a
/// stream. These are the nodes announced to the consumer in `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryGroupId {
    Fragment(FragmentId),
    Stream(StreamId),
}

/// The client-visible identifier assigned to a `DeliveryGroupId` the moment
/// it is promoted to the root set. Non-empty decimal integers, strictly
/// increasing over the life of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(pub(crate) u64);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for DeliveryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// A generic slab arena: indices are never reused, so a `FragmentId` stays
/// valid (and keeps pointing at the same record) for the lifetime of the
/// graph.
pub(crate) struct Slab<T> {
    items: Vec<T>,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Slab<T> {
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        let id = self.items.len() as u32;
        self.items.push(value);
        id
    }

    pub(crate) fn get(&self, id: u32) -> &T {
        &self.items[id as usize]
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> &mut T {
        &mut self.items[id as usize]
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}
