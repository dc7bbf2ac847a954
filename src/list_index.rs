//! Stable identities for list elements.
//!
//! A [`ListIndex`] names one element of a (possibly nested) list. Its
//! identity is assigned once and survives reordering of the backing array:
//! when an element moves, only [`index`](ListIndex::index) changes. Nested
//! lists chain through [`parent`](ListIndex::parent).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Identities are process-unique and never reused.
static NEXT_LIST_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one list element's identity and current position.
///
/// Cloning is cheap; clones share the same identity. Equality and hashing
/// use the identity only.
#[derive(Clone)]
pub struct ListIndex {
    inner: Arc<ListIndexInner>,
}

struct ListIndexInner {
    id: u64,
    parent: Option<ListIndex>,
    depth: usize,
    index: AtomicUsize,
    length: AtomicUsize,
    version: AtomicU64,
    dirty: AtomicBool,
}

impl ListIndex {
    /// Create a fresh identity at `index` under `parent`.
    pub fn new(parent: Option<ListIndex>, index: usize) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth() + 1);
        Self {
            inner: Arc::new(ListIndexInner {
                id: NEXT_LIST_INDEX_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                depth,
                index: AtomicUsize::new(index),
                length: AtomicUsize::new(0),
                version: AtomicU64::new(0),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique identity.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identity of the enclosing element, for nested lists.
    pub fn parent(&self) -> Option<&ListIndex> {
        self.inner.parent.as_ref()
    }

    /// Nesting level: 0 for an element of an outermost list.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Current position inside the backing array.
    pub fn index(&self) -> usize {
        self.inner.index.load(Ordering::Relaxed)
    }

    /// Move the element. Returns `true` if the position changed, in which
    /// case the version is bumped and the index is marked dirty.
    pub fn set_index(&self, index: usize) -> bool {
        let previous = self.inner.index.swap(index, Ordering::Relaxed);
        if previous == index {
            return false;
        }
        self.inner.version.fetch_add(1, Ordering::Relaxed);
        self.inner.dirty.store(true, Ordering::Relaxed);
        true
    }

    /// Length of the list the element belonged to at the last diff.
    pub fn length(&self) -> usize {
        self.inner.length.load(Ordering::Relaxed)
    }

    pub(crate) fn set_length(&self, length: usize) {
        self.inner.length.store(length, Ordering::Relaxed);
    }

    /// Bumped every time the element moves.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    /// Whether the element moved since the flag was last taken.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Relaxed)
    }

    /// Clear the dirty flag, returning its previous value.
    pub fn take_dirty(&self) -> bool {
        self.inner.dirty.swap(false, Ordering::Relaxed)
    }

    /// Ancestor (or self) at nesting level `depth`.
    pub fn at(&self, depth: usize) -> Option<&ListIndex> {
        if depth > self.depth() {
            return None;
        }
        let mut current = self;
        for _ in depth..self.depth() {
            current = current.parent()?;
        }
        Some(current)
    }

    /// Whether `other` is this index or one of its ancestors.
    pub fn is_within(&self, other: &ListIndex) -> bool {
        self.at(other.depth()).is_some_and(|idx| idx == other)
    }

    /// Positions from the outermost list down to this element.
    pub fn indexes(&self) -> Vec<usize> {
        let mut positions = vec![0; self.depth() + 1];
        let mut current = Some(self);
        while let Some(idx) = current {
            positions[idx.depth()] = idx.index();
            current = idx.parent();
        }
        positions
    }
}

impl PartialEq for ListIndex {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ListIndex {}

impl Hash for ListIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ListIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListIndex")
            .field("id", &self.id())
            .field("indexes", &self.indexes())
            .finish()
    }
}
