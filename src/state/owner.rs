//! Parent/child bridging.
//!
//! A child component's state may expose some of its paths on behalf of its
//! parent (`item` in the child really is `rows.*` in the parent). The child
//! engine then holds an [`OwnerBinding`] that answers reads and writes for
//! those paths, and the parent's changes are forwarded back as child
//! references.

use crate::engine::StateEngine;
use crate::error::{Result, StateError};
use crate::list_index::ListIndex;
use crate::path::{PathInfo, PathSet, resolve_path};
use crate::reference::StatePropertyRef;
use crate::updater::RenderListenerId;
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;

/// Collaborator that owns a subtree of this engine's paths.
pub trait OwnerBinding {
    /// Paths the collaborator answers for.
    fn known_paths(&self) -> &PathSet;

    /// Whether `info` falls under one of the known paths.
    fn has_ownership(&self, info: &PathInfo) -> bool {
        info.intersects(self.known_paths())
    }

    /// Value of a reference the collaborator owns.
    fn resolve_via_owner(&self, reference: &StatePropertyRef) -> Result<Value>;

    /// Returns `false` if the collaborator does not accept the write.
    fn write_via_owner(&self, reference: &StatePropertyRef, value: Value) -> Result<bool>;
}

/// The component a state object belongs to, as seen by its getters.
pub trait Component {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// A component reachable from this one, e.g. by element selector.
    fn related(&self, _selector: &str) -> Option<Rc<dyn Component>> {
        None
    }
}

struct BridgeEntry {
    child: &'static PathInfo,
    parent: &'static PathInfo,
    /// Position of the child inside the parent's loop, for parent paths
    /// under a wildcard.
    list_index: Option<ListIndex>,
}

/// A path translated across a bridge, not yet bound to list identities.
///
/// `positions` are the element positions for the wildcards that follow the
/// bridged prefix; `list_index` covers the wildcards inside it.
#[derive(Clone, Debug)]
pub struct Translation {
    /// Translated path.
    pub info: &'static PathInfo,
    /// Identity covering the wildcards inside the bridged prefix.
    pub list_index: Option<ListIndex>,
    /// Element positions for the wildcards after the bridged prefix.
    pub positions: Vec<usize>,
}

impl Translation {
    /// Bind the translated path to concrete identities. `lookup` returns
    /// the identities of a list on the target side.
    pub fn bind(
        self,
        mut lookup: impl FnMut(&StatePropertyRef) -> Result<Vec<ListIndex>>,
    ) -> Result<StatePropertyRef> {
        let base = self.info.wildcard_count().saturating_sub(self.positions.len());
        let mut current = self.list_index;
        for (offset, position) in self.positions.iter().enumerate() {
            let list = self.info.wildcard_parent_infos()[base + offset];
            let list_ref = StatePropertyRef::new(list, current.take())?;
            let indexes = lookup(&list_ref)?;
            let element = indexes
                .get(*position)
                .cloned()
                .ok_or_else(|| StateError::MissingListIndex {
                    pattern: self.info.pattern().to_owned(),
                })?;
            current = Some(element);
        }
        StatePropertyRef::new(self.info, current)
    }
}

/// Registered `child prefix <-> parent prefix` pairs.
#[derive(Default)]
pub struct PathBridge {
    entries: Vec<BridgeEntry>,
    child_paths: PathSet,
}

impl PathBridge {
    /// Empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose parent path `parent` as child path `child`.
    ///
    /// `list_index` is the child's position in the parent's loop and is
    /// required when `parent` contains wildcards. The child prefix itself
    /// must be a plain path.
    pub fn bind(mut self, child: &str, parent: &str, list_index: Option<ListIndex>) -> Result<Self> {
        let child = resolve_path(child)?;
        let parent = resolve_path(parent)?;
        if child.wildcard_count() > 0 {
            return Err(StateError::InvalidPath {
                pattern: child.pattern().to_owned(),
                reason: "bridged child path must not contain wildcards",
            });
        }
        // Validates the depth of the loop position against the parent path.
        let list_index = StatePropertyRef::new(parent, list_index)?
            .list_index()
            .cloned();
        self.child_paths.insert(child);
        self.entries.push(BridgeEntry {
            child,
            parent,
            list_index,
        });
        Ok(self)
    }

    /// Child prefixes registered so far.
    pub fn child_paths(&self) -> &PathSet {
        &self.child_paths
    }

    /// Translate a child reference under one of the child prefixes.
    pub fn try_child_to_parent(&self, child: &StatePropertyRef) -> Option<Translation> {
        let entry = self
            .entries
            .iter()
            .filter(|entry| child.info().has_ancestor(entry.child))
            .max_by_key(|entry| entry.child.depth())?;
        let info = join(entry.parent, &child.info().segments()[entry.child.depth()..])?;
        Some(Translation {
            info,
            list_index: entry.list_index.clone(),
            positions: child.list_index().map(ListIndex::indexes).unwrap_or_default(),
        })
    }

    /// Like [`try_child_to_parent`](Self::try_child_to_parent), failing with
    /// `NoTranslationFound`.
    pub fn translate_child_to_parent(&self, child: &StatePropertyRef) -> Result<Translation> {
        self.try_child_to_parent(child)
            .ok_or_else(|| StateError::NoTranslationFound {
                path: child.pattern().to_owned(),
            })
    }

    /// Entries whose loop position disagrees with `parent` are skipped: a
    /// change to `rows.*.title` of row 3 is no business of the child bound
    /// to row 1.
    pub fn try_parent_to_child(&self, parent: &StatePropertyRef) -> Option<Translation> {
        let entry = self
            .entries
            .iter()
            .filter(|entry| parent.info().has_ancestor(entry.parent))
            .filter(|entry| same_loop_position(entry, parent))
            .max_by_key(|entry| entry.parent.depth())?;
        let info = join(entry.child, &parent.info().segments()[entry.parent.depth()..])?;
        let outer = entry.parent.wildcard_count();
        let positions = parent
            .list_index()
            .map(|idx| idx.indexes().split_off(outer.min(idx.depth() + 1)))
            .unwrap_or_default();
        Some(Translation {
            info,
            list_index: None,
            positions,
        })
    }

    /// Child prefixes whose parent prefix lies strictly below `parent`.
    ///
    /// Replacing `session` replaces everything bridged from `session.user`,
    /// so the whole child prefix `user` is reported.
    pub fn enclosed_by(&self, parent: &StatePropertyRef) -> Vec<Translation> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.parent.depth() > parent.info().depth()
                    && entry.parent.has_ancestor(parent.info())
                    && encloses_loop_position(entry, parent)
            })
            .map(|entry| Translation {
                info: entry.child,
                list_index: None,
                positions: Vec::new(),
            })
            .collect()
    }

    /// Like [`try_parent_to_child`](Self::try_parent_to_child), failing with
    /// `NoTranslationFound`.
    pub fn translate_parent_to_child(&self, parent: &StatePropertyRef) -> Result<Translation> {
        self.try_parent_to_child(parent)
            .ok_or_else(|| StateError::NoTranslationFound {
                path: parent.pattern().to_owned(),
            })
    }
}

fn same_loop_position(entry: &BridgeEntry, parent: &StatePropertyRef) -> bool {
    let levels = entry.parent.wildcard_count();
    if levels == 0 {
        return true;
    }
    match (&entry.list_index, parent.list_index()) {
        (Some(bound), Some(actual)) => actual.at(levels - 1) == bound.at(levels - 1),
        _ => false,
    }
}

/// Whether the list positions of `parent`, an ancestor of the entry's
/// parent prefix, agree with the entry's own position.
fn encloses_loop_position(entry: &BridgeEntry, parent: &StatePropertyRef) -> bool {
    let levels = parent.info().wildcard_count();
    if levels == 0 {
        return true;
    }
    match (&entry.list_index, parent.list_index()) {
        (Some(bound), Some(actual)) => actual.at(levels - 1) == bound.at(levels - 1),
        _ => false,
    }
}

fn join(prefix: &'static PathInfo, rest: &[String]) -> Option<&'static PathInfo> {
    if rest.is_empty() {
        return Some(prefix);
    }
    let pattern = format!("{}.{}", prefix.pattern(), rest.join("."));
    resolve_path(&pattern).ok()
}

/// Owner binding backed by a parent engine.
///
/// Reads go straight to the parent. Writes are enqueued on the parent, so
/// they land in the parent's next rendering pass like any other change.
///
/// Dropping the binding (detaching the child, or dropping the child engine)
/// unsubscribes its change forwarding from the parent.
pub struct ParentBinding {
    parent: StateEngine,
    bridge: PathBridge,
    forwarding: Cell<Option<RenderListenerId>>,
}

impl ParentBinding {
    /// Binding over `parent` that does not forward changes yet; see
    /// [`StateEngine::attach_to_parent`].
    pub fn new(parent: StateEngine, bridge: PathBridge) -> Self {
        Self {
            parent,
            bridge,
            forwarding: Cell::new(None),
        }
    }

    pub(crate) fn set_forwarding(&self, listener: RenderListenerId) {
        if let Some(previous) = self.forwarding.replace(Some(listener)) {
            self.parent.off_render(previous);
        }
    }

    /// The path bridge.
    pub fn bridge(&self) -> &PathBridge {
        &self.bridge
    }

    /// The parent engine.
    pub fn parent(&self) -> &StateEngine {
        &self.parent
    }

    /// The parent reference a child reference stands for.
    pub fn parent_ref(&self, child: &StatePropertyRef) -> Result<StatePropertyRef> {
        self.bridge
            .translate_child_to_parent(child)?
            .bind(|list| self.parent.list_indexes(list))
    }

    /// Child references affected by changes in the parent. A change above a
    /// bridged parent prefix affects the whole child prefix; references the
    /// bridge does not cover are skipped.
    pub fn forward_changes(
        &self,
        child: &StateEngine,
        changed: &[StatePropertyRef],
    ) -> Vec<StatePropertyRef> {
        changed
            .iter()
            .flat_map(|reference| match self.bridge.try_parent_to_child(reference) {
                Some(translation) => vec![translation],
                None => self.bridge.enclosed_by(reference),
            })
            .filter_map(|translation| {
                let pattern = translation.info.pattern();
                match translation.bind(|list| child.list_indexes(list)) {
                    Ok(reference) => Some(reference),
                    Err(error) => {
                        tracing::debug!(pattern, %error, "skipped forwarded change");
                        None
                    }
                }
            })
            .collect()
    }
}

impl Drop for ParentBinding {
    fn drop(&mut self) {
        if let Some(listener) = self.forwarding.take() {
            self.parent.off_render(listener);
        }
    }
}

impl OwnerBinding for ParentBinding {
    fn known_paths(&self) -> &PathSet {
        self.bridge.child_paths()
    }

    fn resolve_via_owner(&self, reference: &StatePropertyRef) -> Result<Value> {
        let parent = self.parent_ref(reference)?;
        self.parent.resolve(&parent)
    }

    fn write_via_owner(&self, reference: &StatePropertyRef, value: Value) -> Result<bool> {
        let parent = self.parent_ref(reference)?;
        tracing::debug!(
            child = reference.pattern(),
            parent = parent.pattern(),
            "forwarding write to parent"
        );
        self.parent.enqueue(parent, value);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_ref(pattern: &str) -> StatePropertyRef {
        StatePropertyRef::parse(pattern, None).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let bridge = PathBridge::new()
            .bind("user", "session.user", None)
            .unwrap()
            .bind("user.address", "addresses.home", None)
            .unwrap();

        let name = bridge.translate_child_to_parent(&child_ref("user.name")).unwrap();
        assert_eq!(name.info.pattern(), "session.user.name");

        let city = bridge
            .translate_child_to_parent(&child_ref("user.address.city"))
            .unwrap();
        assert_eq!(city.info.pattern(), "addresses.home.city");
    }

    #[test]
    fn unmatched_paths_raise() {
        let bridge = PathBridge::new().bind("user", "session.user", None).unwrap();
        assert_eq!(
            bridge.translate_child_to_parent(&child_ref("theme")).err(),
            Some(StateError::NoTranslationFound {
                path: "theme".into()
            })
        );
        assert!(bridge.try_parent_to_child(&child_ref("theme")).is_none());
    }

    #[test]
    fn child_prefix_must_be_plain() {
        assert!(matches!(
            PathBridge::new().bind("items.*", "rows", None),
            Err(StateError::InvalidPath { .. })
        ));
    }

    #[test]
    fn looped_parent_requires_a_position() {
        assert!(matches!(
            PathBridge::new().bind("row", "rows.*", None),
            Err(StateError::MissingListIndex { .. })
        ));
    }

    #[test]
    fn parent_changes_are_filtered_by_loop_position() {
        let mine = ListIndex::new(None, 1);
        let other = ListIndex::new(None, 2);
        let bridge = PathBridge::new()
            .bind("row", "rows.*", Some(mine.clone()))
            .unwrap();

        let own = StatePropertyRef::parse("rows.*.title", Some(mine)).unwrap();
        let foreign = StatePropertyRef::parse("rows.*.title", Some(other)).unwrap();

        let translated = bridge.translate_parent_to_child(&own).unwrap();
        assert_eq!(translated.info.pattern(), "row.title");
        assert!(translated.positions.is_empty());
        assert!(bridge.try_parent_to_child(&foreign).is_none());
    }

    #[test]
    fn ancestor_changes_cover_the_whole_child_prefix() {
        let bridge = PathBridge::new()
            .bind("user", "session.user", None)
            .unwrap()
            .bind("prefs", "session.settings.prefs", None)
            .unwrap()
            .bind("theme", "theme", None)
            .unwrap();

        let session = child_ref("session");
        assert!(bridge.try_parent_to_child(&session).is_none());
        let children: Vec<&str> = bridge
            .enclosed_by(&session)
            .iter()
            .map(|translation| translation.info.pattern())
            .collect();
        assert_eq!(children, ["user", "prefs"]);

        // A prefix is not enclosed by itself.
        assert!(bridge.enclosed_by(&child_ref("theme")).is_empty());
    }

    #[test]
    fn enclosing_changes_respect_the_loop_position() {
        let mine = ListIndex::new(None, 1);
        let other = ListIndex::new(None, 2);
        let bridge = PathBridge::new()
            .bind("detail", "rows.*.detail", Some(mine.clone()))
            .unwrap();

        let own_row = StatePropertyRef::parse("rows.*", Some(mine)).unwrap();
        let other_row = StatePropertyRef::parse("rows.*", Some(other)).unwrap();
        assert_eq!(bridge.enclosed_by(&own_row).len(), 1);
        assert!(bridge.enclosed_by(&other_row).is_empty());
        assert_eq!(bridge.enclosed_by(&child_ref("rows")).len(), 1);
    }

    #[test]
    fn positions_below_the_bridge_are_carried() {
        let row = ListIndex::new(None, 0);
        let cell = ListIndex::new(Some(row.clone()), 3);
        let bridge = PathBridge::new().bind("row", "rows.*", Some(row)).unwrap();

        let parent = StatePropertyRef::parse("rows.*.cells.*", Some(cell)).unwrap();
        let translated = bridge.translate_parent_to_child(&parent).unwrap();
        assert_eq!(translated.info.pattern(), "row.cells.*");
        assert_eq!(translated.positions, vec![3]);

        let elements: Vec<ListIndex> = (0..4).map(|i| ListIndex::new(None, i)).collect();
        let bound = translated.bind(|_| Ok(elements.clone())).unwrap();
        assert_eq!(bound.list_index(), Some(&elements[3]));
    }
}
