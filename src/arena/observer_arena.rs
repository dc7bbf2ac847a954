// Observer arena - registration tables for bindings
//
// Two tables hang off one slab:
// - reference -> observers registered on that reference
// - list identity -> observers whose reference sits under that list element
//
// Entries hold `Weak` handles. An observer's lifetime belongs to its creator;
// dead handles are skipped during lookup and purged by `prune`. Removing a
// list identity purges every observer scoped under it.

use crate::hash::{FastHashMap, FastIndexMap, FastIndexSet};
use crate::list_index::ListIndex;
use crate::observer::Observer;
use crate::reference::{RefKey, StatePropertyRef};
use slab::Slab;
use std::rc::{Rc, Weak};

/// Handle returned by observer registration.
///
/// This is a slab index. After `unregister` the id is stale and may be
/// handed out again to a later registration.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ObserverId(u32);

impl ObserverId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct ObserverEntry {
    observer: Weak<dyn Observer>,
    reference: StatePropertyRef,
}

/// Weak observer registrations, indexed by reference and by list identity.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Slab<ObserverEntry>,
    /// Registration order is preserved so notification order is stable.
    by_ref: FastIndexMap<RefKey, (StatePropertyRef, FastIndexSet<ObserverId>)>,
    by_list_index: FastHashMap<u64, FastIndexSet<ObserverId>>,
}

impl ObserverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` on `reference`. Only a weak handle is kept.
    pub fn register(
        &mut self,
        reference: StatePropertyRef,
        observer: &Rc<dyn Observer>,
    ) -> ObserverId {
        let entry = self.entries.vacant_entry();
        let id = ObserverId(entry.key() as u32);
        entry.insert(ObserverEntry {
            observer: Rc::downgrade(observer),
            reference: reference.clone(),
        });

        let mut scope = reference.list_index();
        while let Some(idx) = scope {
            self.by_list_index.entry(idx.id()).or_default().insert(id);
            scope = idx.parent();
        }

        self.by_ref
            .entry(reference.key())
            .or_insert_with(|| (reference, FastIndexSet::default()))
            .1
            .insert(id);
        id
    }

    /// Remove a registration. Returns `false` for stale ids.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let Some(entry) = self.entries.try_remove(id.index()) else {
            return false;
        };
        let key = entry.reference.key();
        if let Some((_, ids)) = self.by_ref.get_mut(&key) {
            ids.shift_remove(&id);
            if ids.is_empty() {
                self.by_ref.shift_remove(&key);
            }
        }
        let mut scope = entry.reference.list_index();
        while let Some(idx) = scope {
            if let Some(ids) = self.by_list_index.get_mut(&idx.id()) {
                ids.shift_remove(&id);
                if ids.is_empty() {
                    self.by_list_index.remove(&idx.id());
                }
            }
            scope = idx.parent();
        }
        true
    }

    /// Unregister every observer scoped under `list_index`.
    pub fn purge_list_index(&mut self, list_index: &ListIndex) -> usize {
        let Some(ids) = self.by_list_index.remove(&list_index.id()) else {
            return 0;
        };
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Drop registrations whose observer has been dropped.
    pub fn prune(&mut self) -> usize {
        let dead: Vec<ObserverId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.observer.strong_count() == 0)
            .map(|(key, _)| ObserverId(key as u32))
            .collect();
        dead.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Live observers registered on `reference`, in registration order.
    pub fn observers_for(&self, reference: &StatePropertyRef) -> Vec<Rc<dyn Observer>> {
        let Some((_, ids)) = self.by_ref.get(&reference.key()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.entries.get(id.index()))
            .filter_map(|entry| entry.observer.upgrade())
            .collect()
    }

    /// Every reference with at least one registration.
    pub fn references(&self) -> impl Iterator<Item = &StatePropertyRef> {
        self.by_ref.values().map(|(reference, _)| reference)
    }

    /// Reference `id` was registered on.
    pub fn reference_of(&self, id: ObserverId) -> Option<&StatePropertyRef> {
        self.entries.get(id.index()).map(|entry| &entry.reference)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
