//! Hash map/set aliases used throughout the crate.
//!
//! Keyed lookups here (friendly names, service names) are attacker-influenced
//! (a misbehaving peer picks its own friendly name), so we avoid the
//! standard library's randomized-but-slow SipHash default in favor of
//! `twox-hash`, matching the ground truth's
//! `collections_randomstate_twox_hash` default feature.

use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

pub type HashMap<K, V> = StdHashMap<K, V, BuildHasherDefault<XxHash64>>;
pub type HashSet<T> = StdHashSet<T, BuildHasherDefault<XxHash64>>;

pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}

pub fn hash_set<T>() -> HashSet<T> {
    HashSet::default()
}
