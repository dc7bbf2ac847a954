//! Addressable references: a path plus a concrete list position.

use crate::error::{Result, StateError};
use crate::list_index::ListIndex;
use crate::path::{PathId, PathInfo, resolve_path};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Composite identity of a reference: path id plus innermost list identity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct RefKey {
    /// Id of the interned path.
    pub path: PathId,
    /// Identity of the innermost list element, if bound.
    pub list_index: Option<u64>,
}

/// A path bound to a list position: the unit of caching, dependency
/// tracking and change notification.
///
/// Two references are equal when they share the same interned path and
/// their list indexes have the same identity.
#[derive(Clone)]
pub struct StatePropertyRef {
    info: &'static PathInfo,
    list_index: Option<ListIndex>,
}

impl StatePropertyRef {
    /// Bind `info` to `list_index`.
    ///
    /// A path without wildcards never carries a list index. A wildcard path
    /// needs one whose depth matches its innermost wildcard; anything else
    /// raises `MissingListIndex`.
    pub fn new(info: &'static PathInfo, list_index: Option<ListIndex>) -> Result<Self> {
        let wildcards = info.wildcard_count();
        if wildcards == 0 {
            return Ok(Self {
                info,
                list_index: None,
            });
        }
        match list_index {
            Some(idx) if idx.depth() + 1 >= wildcards => {
                let idx = idx.at(wildcards - 1).cloned();
                Ok(Self {
                    info,
                    list_index: idx,
                })
            }
            _ => Err(StateError::MissingListIndex {
                pattern: info.pattern().to_owned(),
            }),
        }
    }

    /// Reference to a path without wildcards.
    pub fn plain(info: &'static PathInfo) -> Self {
        Self {
            info,
            list_index: None,
        }
    }

    /// Parse `pattern` and bind it.
    pub fn parse(pattern: &str, list_index: Option<ListIndex>) -> Result<Self> {
        Self::new(resolve_path(pattern)?, list_index)
    }

    /// The interned path.
    pub fn info(&self) -> &'static PathInfo {
        self.info
    }

    /// The dotted pattern.
    pub fn pattern(&self) -> &str {
        self.info.pattern()
    }

    /// Innermost list element the reference is bound to.
    pub fn list_index(&self) -> Option<&ListIndex> {
        self.list_index.as_ref()
    }

    /// Composite key for caches and registries.
    pub fn key(&self) -> RefKey {
        RefKey {
            path: self.info.id(),
            list_index: self.list_index.as_ref().map(ListIndex::id),
        }
    }

    /// Reference to the parent path.
    ///
    /// Crossing a list boundary (the parent has one wildcard fewer) steps
    /// the list index up one level.
    pub fn parent(&self) -> Option<Self> {
        let parent = self.info.parent_info()?;
        let list_index = if parent.wildcard_count() < self.info.wildcard_count() {
            self.list_index.as_ref().and_then(ListIndex::parent).cloned()
        } else {
            self.list_index.clone()
        };
        Some(Self {
            info: parent,
            list_index,
        })
    }

    /// Reference to `info` sharing this reference's list position, if the
    /// two paths agree on their list boundaries.
    pub fn rebind(&self, info: &'static PathInfo) -> Result<Self> {
        Self::new(info, self.list_index.clone())
    }

    /// Whether a change to `self` can affect `other`: `other`'s path is in
    /// `self`'s subtree and their list positions do not contradict each other.
    pub fn covers(&self, other: &StatePropertyRef) -> bool {
        other.info.has_ancestor(self.info) && self.compatible_with(other)
    }

    /// Whether the shared list levels point at the same elements.
    pub fn compatible_with(&self, other: &StatePropertyRef) -> bool {
        match (&self.list_index, &other.list_index) {
            (Some(a), Some(b)) => {
                let shared = a.depth().min(b.depth());
                a.at(shared) == b.at(shared)
            }
            _ => true,
        }
    }
}

impl PartialEq for StatePropertyRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for StatePropertyRef {}

impl Hash for StatePropertyRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for StatePropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.list_index {
            Some(idx) => write!(f, "{}{:?}", self.info.pattern(), idx.indexes()),
            None => f.write_str(self.info.pattern()),
        }
    }
}
