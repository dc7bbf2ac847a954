// List arena - identities of every observed list
//
// For each list reference the store keeps the values seen at the last
// observation and the identities assigned to them. Observing a list again
// runs the diff engine against that record.
//
// Lists can be observed outside a rendering pass (a getter enumerating
// `items.*`, say). Those diffs are parked in `pending` and folded into the
// diff the next rendering pass reports, so consumers never miss an identity.

use crate::hash::FastIndexMap;
use crate::list_diff::{ListDiff, diff_values};
use crate::list_index::ListIndex;
use crate::path::WILDCARD;
use crate::reference::{RefKey, StatePropertyRef};
use serde_json::Value;

struct ListEntry {
    reference: StatePropertyRef,
    values: Vec<Value>,
    indexes: Vec<ListIndex>,
}

/// Identities of the elements of every list read so far, keyed by list reference.
#[derive(Default)]
pub struct ListStore {
    entries: FastIndexMap<RefKey, ListEntry>,
    pending: FastIndexMap<RefKey, ListDiff>,
}

impl ListStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the list at `reference` is tracked.
    pub fn contains(&self, reference: &StatePropertyRef) -> bool {
        self.entries.contains_key(&reference.key())
    }

    /// Identities of the last observation.
    pub fn indexes(&self, reference: &StatePropertyRef) -> Option<&[ListIndex]> {
        self.entries
            .get(&reference.key())
            .map(|entry| entry.indexes.as_slice())
    }

    /// Identities for `values` if they match the last observation.
    pub fn indexes_if_current(
        &self,
        reference: &StatePropertyRef,
        values: &[Value],
    ) -> Option<Vec<ListIndex>> {
        self.entries
            .get(&reference.key())
            .filter(|entry| entry.values == values)
            .map(|entry| entry.indexes.clone())
    }

    /// Observe a list outside a rendering pass. The diff is parked until the
    /// next [`refresh`](Self::refresh) of the same reference.
    pub fn record(&mut self, reference: &StatePropertyRef, values: &[Value]) -> Vec<ListIndex> {
        let diff = self.observe(reference, Some(values));
        let indexes = diff.list_indexes.clone();
        match self.pending.get_mut(&reference.key()) {
            Some(parked) => parked.merge(diff),
            None => {
                self.pending.insert(reference.key(), diff);
            }
        }
        indexes
    }

    /// Observe a list during a rendering pass, returning everything that
    /// changed since the previous pass.
    pub fn refresh(&mut self, reference: &StatePropertyRef, values: Option<&[Value]>) -> ListDiff {
        let diff = self.observe(reference, values);
        match self.pending.shift_remove(&reference.key()) {
            Some(mut parked) => {
                parked.merge(diff);
                parked
            }
            None => diff,
        }
    }

    /// List references a change to `changed` can affect: lists under it,
    /// and lists containing it (their elements are compared by value).
    pub fn references_related_to(&self, changed: &StatePropertyRef) -> Vec<StatePropertyRef> {
        self.entries
            .values()
            .filter(|entry| changed.covers(&entry.reference) || entry.reference.covers(changed))
            .map(|entry| entry.reference.clone())
            .collect()
    }

    /// Follow a write below an element of an observed list. The edited
    /// element keeps its identity instead of being diffed as a new value.
    ///
    /// `value_at(n)` reads the current value at the first `n` segments of
    /// `written`.
    pub fn sync_element_edit(
        &mut self,
        written: &StatePropertyRef,
        value_at: impl Fn(usize) -> Option<Value>,
    ) {
        for entry in self.entries.values_mut() {
            let depth = entry.reference.info().depth();
            if written.info().depth() <= depth + 1 || !entry.reference.covers(written) {
                continue;
            }
            let Some(position) = element_position(&entry.reference, written) else {
                continue;
            };
            if position >= entry.values.len() {
                continue;
            }
            if let Some(element) = value_at(depth + 1) {
                cov_mark::hit!(element_edit_keeps_identity);
                entry.values[position] = element;
            }
        }
    }

    /// Number of tracked lists.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no list is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn observe(&mut self, reference: &StatePropertyRef, values: Option<&[Value]>) -> ListDiff {
        let key = reference.key();
        let diff = {
            let old = self.entries.get(&key);
            diff_values(
                old.map(|entry| entry.values.as_slice()),
                old.map(|entry| entry.indexes.as_slice()),
                values,
                reference.list_index(),
            )
        };
        match values {
            Some(values) => {
                self.entries.insert(
                    key,
                    ListEntry {
                        reference: reference.clone(),
                        values: values.to_vec(),
                        indexes: diff.list_indexes.clone(),
                    },
                );
            }
            None => {
                self.entries.shift_remove(&key);
            }
        }
        self.drop_nested(&diff.removed);
        diff
    }

    /// Forget nested lists that hung off removed elements.
    fn drop_nested(&mut self, removed: &[ListIndex]) {
        if removed.is_empty() {
            return;
        }
        let orphaned = |entry: &ListEntry| {
            entry
                .reference
                .list_index()
                .is_some_and(|idx| removed.iter().any(|gone| idx.is_within(gone)))
        };
        let dropped: Vec<RefKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| orphaned(entry))
            .map(|(key, _)| *key)
            .collect();
        for key in dropped {
            self.entries.shift_remove(&key);
            self.pending.shift_remove(&key);
        }
    }
}

/// Position, inside `list`, of the element `written` points into.
fn element_position(list: &StatePropertyRef, written: &StatePropertyRef) -> Option<usize> {
    let segment = written.info().segments().get(list.info().depth())?;
    if segment == WILDCARD {
        let level = list.info().wildcard_count();
        written.list_index()?.at(level).map(ListIndex::index)
    } else {
        segment.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Vec<Value> {
        match v {
            Value::Array(items) => items,
            _ => unreachable!(),
        }
    }

    #[test]
    fn refresh_reports_parked_diffs() {
        let mut store = ListStore::new();
        let list = StatePropertyRef::parse("items", None).unwrap();

        let first = store.record(&list, &values(json!(["a", "b"])));
        assert_eq!(first.len(), 2);
        assert_eq!(
            store.indexes_if_current(&list, &values(json!(["a", "b"]))),
            Some(first.clone())
        );

        let diff = store.refresh(&list, Some(values(json!(["b", "a"])).as_slice()));
        assert_eq!(diff.added, first);
        assert_eq!(diff.list_indexes, vec![first[1].clone(), first[0].clone()]);

        let diff = store.refresh(&list, Some(values(json!(["b", "a"])).as_slice()));
        assert!(diff.is_empty());
    }

    #[test]
    fn removing_an_element_forgets_nested_lists() {
        let mut store = ListStore::new();
        let rows = StatePropertyRef::parse("rows", None).unwrap();
        let ids = store.record(&rows, &values(json!([{"c": [1]}, {"c": [2]}])));

        let first_cells = StatePropertyRef::parse("rows.*.c", Some(ids[0].clone())).unwrap();
        let second_cells = StatePropertyRef::parse("rows.*.c", Some(ids[1].clone())).unwrap();
        store.record(&first_cells, &values(json!([1])));
        store.record(&second_cells, &values(json!([2])));
        assert_eq!(store.len(), 3);

        let diff = store.refresh(&rows, Some(values(json!([{"c": [2]}])).as_slice()));
        assert_eq!(diff.removed, vec![ids[0].clone()]);
        assert!(!store.contains(&first_cells));
        assert!(store.contains(&second_cells));
        assert_eq!(store.references_related_to(&rows).len(), 2);
        assert_eq!(store.references_related_to(&second_cells), vec![rows.clone(), second_cells.clone()]);
    }

    #[test]
    fn edited_elements_keep_their_identity() {
        cov_mark::check!(element_edit_keeps_identity);
        let mut store = ListStore::new();
        let list = StatePropertyRef::parse("todos", None).unwrap();
        let ids = store.record(&list, &values(json!([{"done": false}, {"done": false}])));
        store.refresh(&list, Some(values(json!([{"done": false}, {"done": false}])).as_slice()));

        let edited = StatePropertyRef::parse("todos.*.done", Some(ids[1].clone())).unwrap();
        store.sync_element_edit(&edited, |n| {
            assert_eq!(n, 2);
            Some(json!({"done": true}))
        });

        let diff = store.refresh(&list, Some(values(json!([{"done": false}, {"done": true}])).as_slice()));
        assert!(diff.is_empty());
        assert_eq!(diff.list_indexes, ids);
    }

    #[test]
    fn replacing_an_element_is_not_an_edit() {
        let mut store = ListStore::new();
        let list = StatePropertyRef::parse("tags", None).unwrap();
        store.record(&list, &values(json!(["a", "b"])));
        let replaced = StatePropertyRef::parse("tags.1", None).unwrap();
        store.sync_element_edit(&replaced, |_| Some(json!("c")));
        assert!(store.indexes_if_current(&list, &values(json!(["a", "b"]))).is_some());
    }

    #[test]
    fn absent_list_removes_entry() {
        let mut store = ListStore::new();
        let list = StatePropertyRef::parse("items", None).unwrap();
        let ids = store.record(&list, &values(json!([1, 2])));
        let diff = store.refresh(&list, None);
        assert!(diff.added.is_empty());
        assert_eq!(diff.removed, ids);
        assert!(store.is_empty());
        assert!(diff.list_indexes.is_empty());
    }
}
