//! Type aliases for hash collections keyed with a fast non-cryptographic
//! hasher. Everything in the workspace that wants a map should use these.

pub use std::collections::hash_map;
pub use std::collections::hash_set;

#[cfg(feature = "ahash")]
pub type ARandomState = ahash::RandomState;
#[cfg(not(feature = "ahash"))]
pub type ARandomState = std::collections::hash_map::RandomState;

pub type AHashMap<K, V> = std::collections::HashMap<K, V, ARandomState>;
pub type AHashSet<V> = std::collections::HashSet<V, ARandomState>;
