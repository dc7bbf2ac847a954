//! Zero-sized hash builder shared by every internal table.
//!
//! All keys in this crate are engine-generated (path ids, list identities,
//! interned pattern strings), so HashDoS resistance buys nothing. A fixed seed
//! also keeps hashing deterministic across tables and runs.

use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

pub use foldhash::fast::{FixedState, FoldHasher};

const SEED: u64 = 0x2d35_8dcc_aa6c_78a5;

/// A zero-sized `BuildHasher` backed by foldhash with a fixed seed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(SEED).build_hasher()
    }
}

/// `HashMap` with the crate hasher.
pub type FastHashMap<K, V> = HashMap<K, V, FastHashBuilder>;
/// `HashSet` with the crate hasher.
pub type FastHashSet<K> = HashSet<K, FastHashBuilder>;
/// Insertion-ordered map with the crate hasher.
pub type FastIndexMap<K, V> = IndexMap<K, V, FastHashBuilder>;
/// Insertion-ordered set with the crate hasher.
pub type FastIndexSet<K> = IndexSet<K, FastHashBuilder>;
