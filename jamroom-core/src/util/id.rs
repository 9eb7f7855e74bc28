use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crossbeam::atomic::AtomicCell;
use serde::{Serialize, Serializer};

pub type IdType = u64;
pub static ID_COUNTER: AtomicCell<IdType> = AtomicCell::new(1);

/// A unique identifier for any type.
pub struct Id<T> {
    value: IdType,
    kind: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Creates a new id.
    pub fn new() -> Self {
        Self {
            value: ID_COUNTER.fetch_add(1),
            kind: PhantomData,
        }
    }

    /// Restores an id from a value previously handed out, for example one sent back by a client.
    pub fn from_value(value: IdType) -> Self {
        Self {
            value,
            kind: PhantomData,
        }
    }

    pub fn value(&self) -> IdType {
        self.value
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.value)
    }
}

impl<T> Copy for Id<T> {}
impl<T> Eq for Id<T> {}
