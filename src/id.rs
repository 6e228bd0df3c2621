//! Code for handling IDs
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use std::borrow::Borrow;

/// A trait alias for ID types
pub trait IDLike:
    Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}
impl<T> IDLike for T where
    T: Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            std::hash::Hash,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            serde::Deserialize,
            Debug,
            serde::Serialize,
        )]
        /// An ID type (e.g. `NodeID`, `PlantID`, etc.)
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl $name {
            /// Create a new ID from a string slice
            pub fn new(id: &str) -> Self {
                $name(std::rc::Rc::from(id))
            }
        }
    };
}
pub(crate) use define_id_type;

define_id_type!(NodeID);
define_id_type!(ZoneID);
define_id_type!(LineID);
define_id_type!(DcLineID);
define_id_type!(PlantID);
define_id_type!(FuelID);
define_id_type!(AreaID);

impl From<&NodeID> for AreaID {
    fn from(id: &NodeID) -> Self {
        AreaID(id.0.clone())
    }
}

impl From<&ZoneID> for AreaID {
    fn from(id: &ZoneID) -> Self {
        AreaID(id.0.clone())
    }
}

/// Indicates that the struct has an ID field
pub trait HasID<ID: IDLike> {
    /// Get the struct's ID
    fn get_id(&self) -> &ID;
}

/// Implement the `HasID` trait for the given type, assuming it has a field called `id`
macro_rules! define_id_getter {
    ($t:ty, $id_ty:ty) => {
        impl crate::id::HasID<$id_ty> for $t {
            fn get_id(&self) -> &$id_ty {
                &self.id
            }
        }
    };
}
pub(crate) use define_id_getter;

/// Collect items into a map keyed by their IDs, checking that every ID is non-empty and unique.
///
/// Insertion order is preserved, which fixes the row/column order of the network matrices and the
/// order of variables in optimisation problems.
pub fn into_id_map<ID, T, I>(items: I) -> Result<IndexMap<ID, T>>
where
    ID: IDLike,
    T: HasID<ID>,
    I: IntoIterator<Item = T>,
{
    let mut map = IndexMap::new();
    for item in items {
        let id = item.get_id().clone();
        ensure!(!Borrow::<str>::borrow(&id).is_empty(), "IDs cannot be empty");
        ensure!(!map.contains_key(&id), "Duplicate ID found: {id}");
        map.insert(id, item);
    }

    Ok(map)
}
