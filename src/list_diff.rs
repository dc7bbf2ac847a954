//! Identity-preserving list diff.
//!
//! Given the values a list held at the last observation, the identities
//! assigned to them, and the values it holds now, [`diff`] decides which
//! identities survive, which move, which are new and which are gone.
//!
//! Old identities are grouped by the value they currently point at, so an
//! element that moved without changing keeps its identity. When several old
//! elements share a value, identities are handed out in their original
//! relative order. This is a heuristic that keeps positions stable under
//! duplicates; it is not a minimal-edit diff.

use crate::hash::{FastHashSet, FastIndexMap};
use crate::list_index::ListIndex;
use serde_json::Value;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

/// Structural delta between two observations of the same list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListDiff {
    /// Identities created for elements with no prior identity.
    pub added: Vec<ListIndex>,
    /// Reused identities whose position changed.
    pub updated: Vec<ListIndex>,
    /// Old identities that were not reused.
    pub removed: Vec<ListIndex>,
    /// Identity of every element of the new list, in position order.
    pub list_indexes: Vec<ListIndex>,
}

impl ListDiff {
    /// True when nothing was added, moved or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Fold a later diff of the same list into this one.
    ///
    /// An identity added here and removed by `later` is no longer reported as
    /// added. It is still reported as removed: it was handed out, and
    /// bindings may have been scoped to it.
    pub fn merge(&mut self, later: ListDiff) {
        let gone: FastHashSet<u64> = later.removed.iter().map(ListIndex::id).collect();
        let fresh: FastHashSet<u64> = self.added.iter().map(ListIndex::id).collect();

        self.added.retain(|idx| !gone.contains(&idx.id()));
        self.updated.retain(|idx| !gone.contains(&idx.id()));
        self.removed.extend(later.removed);
        for idx in later.updated {
            if !fresh.contains(&idx.id()) && !self.updated.contains(&idx) {
                self.updated.push(idx);
            }
        }
        self.added.extend(later.added);
        self.list_indexes = later.list_indexes;
    }
}

/// Diff two observations of a list.
///
/// `old_indexes` must be the identities produced for `old_values`. A missing
/// side is treated as "no list": everything on the other side is added or
/// removed.
pub fn diff<T: Hash + Eq>(
    old_values: Option<&[T]>,
    old_indexes: Option<&[ListIndex]>,
    new_values: Option<&[T]>,
    parent: Option<&ListIndex>,
) -> ListDiff {
    let mut result = ListDiff::default();
    let old = old_values.zip(old_indexes);

    match (old, new_values) {
        (None, None) => {}
        (None, Some(new_values)) => {
            for position in 0..new_values.len() {
                let idx = ListIndex::new(parent.cloned(), position);
                result.added.push(idx.clone());
                result.list_indexes.push(idx);
            }
        }
        (Some((_, old_indexes)), None) => {
            result.removed.extend(old_indexes.iter().cloned());
        }
        (Some((old_values, old_indexes)), Some(new_values)) => {
            let mut groups: FastIndexMap<&T, VecDeque<&ListIndex>> = FastIndexMap::default();
            for idx in old_indexes {
                if let Some(value) = old_values.get(idx.index()) {
                    groups.entry(value).or_default().push_back(idx);
                }
            }

            let mut claimed = FastHashSet::default();
            for (position, value) in new_values.iter().enumerate() {
                match groups.get_mut(value).and_then(VecDeque::pop_front) {
                    Some(idx) => {
                        claimed.insert(idx.id());
                        if idx.set_index(position) {
                            result.updated.push(idx.clone());
                        }
                        result.list_indexes.push(idx.clone());
                    }
                    None => {
                        let idx = ListIndex::new(parent.cloned(), position);
                        result.added.push(idx.clone());
                        result.list_indexes.push(idx);
                    }
                }
            }

            result.removed.extend(
                old_indexes
                    .iter()
                    .filter(|idx| !claimed.contains(&idx.id()))
                    .cloned(),
            );
        }
    }

    let length = result.list_indexes.len();
    for idx in &result.list_indexes {
        idx.set_length(length);
    }
    result
}

/// Diff two observations of a JSON list, grouping elements by structural
/// equality.
pub fn diff_values(
    old_values: Option<&[Value]>,
    old_indexes: Option<&[ListIndex]>,
    new_values: Option<&[Value]>,
    parent: Option<&ListIndex>,
) -> ListDiff {
    let old_keys = old_values.map(|values| values.iter().map(ValueKey).collect::<Vec<_>>());
    let new_keys = new_values.map(|values| values.iter().map(ValueKey).collect::<Vec<_>>());
    diff(old_keys.as_deref(), old_indexes, new_keys.as_deref(), parent)
}

/// Hashable view of a JSON value.
///
/// Equality is `Value`'s structural equality. JSON numbers are never NaN, so
/// the relation is a proper equivalence and safe to group by.
#[derive(Clone, Copy, Debug)]
pub struct ValueKey<'a>(pub &'a Value);

impl PartialEq for ValueKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ValueKey<'_> {}

impl Hash for ValueKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(self.0, state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Number(n) => n.hash(state),
        Value::String(s) => s.hash(state),
        Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            // Maps iterate in key order, so equal maps hash equally.
            map.len().hash(state);
            for (key, item) in map {
                key.hash(state);
                hash_value(item, state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn seed(values: &[&str]) -> Vec<ListIndex> {
        diff::<&str>(None, None, Some(values), None).list_indexes
    }

    #[test]
    fn both_absent_is_empty() {
        let result = diff::<u8>(None, None, None, None);
        assert!(result.is_empty());
        assert!(result.list_indexes.is_empty());
    }

    #[test]
    fn absent_old_adds_everything() {
        let result = diff(None, None, Some(&["a", "b"][..]), None);
        assert_eq!(result.added.len(), 2);
        assert_eq!(result.list_indexes[1].index(), 1);
        assert_eq!(result.list_indexes[0].length(), 2);
        assert!(result.updated.is_empty() && result.removed.is_empty());
    }

    #[test]
    fn absent_new_removes_everything() {
        let old = ["a", "b"];
        let ids = seed(&old);
        let result = diff(Some(&old[..]), Some(&ids), None, None);
        assert_eq!(result.removed, ids);
        assert!(result.added.is_empty() && result.list_indexes.is_empty());
    }

    #[test]
    fn same_content_is_a_no_op() {
        let old = ["a", "b", "c"];
        let ids = seed(&old);
        let result = diff(Some(&old[..]), Some(&ids), Some(&old[..]), None);
        assert!(result.is_empty());
        assert_eq!(result.list_indexes, ids);
    }

    #[test]
    fn rotation_reuses_identities() {
        let old = ["A", "B", "C"];
        let ids = seed(&old);
        let new = ["C", "A", "B"];
        let result = diff(Some(&old[..]), Some(&ids), Some(&new[..]), None);

        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
        assert_eq!(result.updated.len(), 3);
        assert_eq!(
            result.list_indexes,
            vec![ids[2].clone(), ids[0].clone(), ids[1].clone()]
        );
        assert_eq!(ids[2].index(), 0);
        assert_eq!(ids[0].index(), 1);
    }

    #[test]
    fn duplicates_pop_in_original_order() {
        let old = ["X", "X"];
        let ids = seed(&old);
        let result = diff(Some(&old[..]), Some(&ids), Some(&["X"][..]), None);

        assert!(result.added.is_empty());
        assert_eq!(result.list_indexes, vec![ids[0].clone()]);
        assert_eq!(result.removed, vec![ids[1].clone()]);
    }

    #[test]
    fn changed_value_gets_a_new_identity() {
        let old = ["a", "b"];
        let ids = seed(&old);
        let result = diff(Some(&old[..]), Some(&ids), Some(&["a", "z"][..]), None);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.removed, vec![ids[1].clone()]);
        assert_eq!(result.list_indexes[0], ids[0]);
    }

    #[test]
    fn empty_lists() {
        let old: [&str; 0] = [];
        let result = diff(Some(&old[..]), Some(&[]), Some(&old[..]), None);
        assert!(result.is_empty());

        let ids = seed(&["a"]);
        let result = diff(Some(&["a"][..]), Some(&ids), Some(&old[..]), None);
        assert_eq!(result.removed, ids);
    }

    #[test]
    fn nested_identities_hang_off_parent() {
        let parent = ListIndex::new(None, 4);
        let result = diff(None, None, Some(&[1, 2][..]), Some(&parent));
        assert!(result.added.iter().all(|idx| idx.parent() == Some(&parent)));
        assert_eq!(result.added[1].indexes(), vec![4, 1]);
    }

    #[test]
    fn json_values_group_structurally() {
        let old = vec![json!({"id": 1}), json!({"id": 2})];
        let ids = diff_values(None, None, Some(old.as_slice()), None).list_indexes;
        let new = vec![json!({"id": 2}), json!({"id": 1}), json!({"id": 3})];
        let result = diff_values(Some(old.as_slice()), Some(&ids), Some(new.as_slice()), None);
        assert_eq!(result.list_indexes[..2], [ids[1].clone(), ids[0].clone()]);
        assert_eq!(result.added.len(), 1);
        assert!(result.removed.is_empty());
    }

    #[test]
    fn merge_keeps_transient_identities_out_of_added() {
        let first = diff(None, None, Some(&["a"][..]), None);
        let ids = first.list_indexes.clone();
        let second = diff(Some(&["a"][..]), Some(&ids), Some(&["b", "a"][..]), None);
        let added_then_removed = second.added[0].clone();
        let third = diff(
            Some(&["b", "a"][..]),
            Some(&second.list_indexes),
            Some(&["a"][..]),
            None,
        );

        let mut merged = first;
        merged.merge(second);
        merged.merge(third);

        assert_eq!(merged.added, ids);
        assert_eq!(merged.removed, vec![added_then_removed.clone()]);
        assert!(!merged.added.contains(&added_then_removed));
        assert_eq!(merged.list_indexes, ids);
    }

    proptest! {
        #[test]
        fn identity_count_matches_new_length(
            old in prop::collection::vec(0u8..4, 0..8),
            new in prop::collection::vec(0u8..4, 0..8),
        ) {
            let ids = diff::<u8>(None, None, Some(&old[..]), None).list_indexes;
            let result = diff(Some(&old[..]), Some(&ids), Some(&new[..]), None);

            prop_assert_eq!(result.list_indexes.len(), new.len());
            prop_assert_eq!(result.added.len() + ids.len() - result.removed.len(), new.len());
            for (position, idx) in result.list_indexes.iter().enumerate() {
                prop_assert_eq!(idx.index(), position);
            }
        }
    }
}
