//! The state object shared by every access layer of an engine, and the
//! navigation helpers used to read and patch its raw JSON.

use super::owner::{Component, OwnerBinding};
use super::{Getter, Setter};
use crate::arena::ListStore;
use crate::dependency::DependencyGraph;
use crate::engine::EngineConfig;
use crate::error::{Result, StateError};
use crate::hash::FastHashMap;
use crate::path::{PathId, PathInfo, PathSet, WILDCARD};
use crate::reference::StatePropertyRef;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// A declared getter with an optional setter.
#[derive(Clone)]
pub struct Accessor {
    pub(crate) getter: Getter,
    pub(crate) setter: Option<Setter>,
}

impl Accessor {
    /// Computed property, writable when `setter` is given.
    pub fn new(getter: Getter, setter: Option<Setter>) -> Self {
        Self { getter, setter }
    }

    /// Whether the accessor has a setter.
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

pub(crate) struct StateCore {
    pub(crate) data: RefCell<Value>,
    accessors: FastHashMap<PathId, Accessor>,
    getter_paths: PathSet,
    pub(crate) owner: RefCell<Option<Rc<dyn OwnerBinding>>>,
    pub(crate) component: RefCell<Option<Rc<dyn Component>>>,
    pub(crate) lists: RefCell<ListStore>,
    pub(crate) dependencies: RefCell<DependencyGraph>,
    pub(crate) config: EngineConfig,
}

impl StateCore {
    pub(crate) fn new(
        data: Value,
        accessors: Vec<(&'static PathInfo, Accessor)>,
        config: EngineConfig,
    ) -> Self {
        let mut getter_paths = PathSet::new();
        let mut table = FastHashMap::default();
        for (info, accessor) in accessors {
            getter_paths.insert(info);
            table.insert(info.id(), accessor);
        }
        Self {
            data: RefCell::new(data),
            accessors: table,
            getter_paths,
            owner: RefCell::new(None),
            component: RefCell::new(None),
            lists: RefCell::new(ListStore::new()),
            dependencies: RefCell::new(DependencyGraph::new()),
            config,
        }
    }

    pub(crate) fn accessor(&self, info: &PathInfo) -> Option<&Accessor> {
        self.accessors.get(&info.id())
    }

    pub(crate) fn getter_paths(&self) -> &PathSet {
        &self.getter_paths
    }

    /// Whether a strict ancestor of `info` is a declared getter, in which
    /// case the raw object cannot be navigated directly.
    pub(crate) fn has_getter_ancestor(&self, info: &'static PathInfo) -> bool {
        !self.accessors.is_empty()
            && info
                .ancestor_infos()
                .filter(|ancestor| *ancestor != info)
                .any(|ancestor| self.accessors.contains_key(&ancestor.id()))
    }

    /// The owner binding answering for `info`, unless one of our own getters
    /// claims the path first.
    pub(crate) fn owner_for(&self, info: &PathInfo) -> Option<Rc<dyn OwnerBinding>> {
        let owner = self.owner.borrow().clone()?;
        if info.intersects(&self.getter_paths) || !owner.has_ownership(info) {
            return None;
        }
        Some(owner)
    }
}

/// One navigation step into a JSON value.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Step<'s> {
    Member(&'s str),
    Index(usize),
}

/// Steps addressing `reference` from the root, wildcards replaced by the
/// positions of its list index.
pub(crate) fn steps(reference: &StatePropertyRef) -> Result<Vec<Step<'_>>> {
    let mut level = 0;
    reference
        .info()
        .segments()
        .iter()
        .map(|segment| {
            if segment != WILDCARD {
                return Ok(Step::Member(segment));
            }
            let idx = reference
                .list_index()
                .and_then(|idx| idx.at(level))
                .ok_or_else(|| StateError::MissingListIndex {
                    pattern: reference.pattern().to_owned(),
                })?;
            level += 1;
            Ok(Step::Index(idx.index()))
        })
        .collect()
}

/// The last step of `reference`.
pub(crate) fn last_step(reference: &StatePropertyRef) -> Result<Step<'_>> {
    let info = reference.info();
    if !info.is_wildcard() {
        return Ok(Step::Member(info.last_segment()));
    }
    reference
        .list_index()
        .map(|idx| Step::Index(idx.index()))
        .ok_or_else(|| StateError::MissingListIndex {
            pattern: reference.pattern().to_owned(),
        })
}

/// Numeric members address array elements, so `items.0` works like a
/// wildcard bound to position 0.
pub(crate) fn child<'v>(value: &'v Value, step: Step<'_>) -> Option<&'v Value> {
    match (value, step) {
        (Value::Object(map), Step::Member(name)) => map.get(name),
        (Value::Array(items), Step::Member(name)) => items.get(name.parse::<usize>().ok()?),
        (Value::Array(items), Step::Index(position)) => items.get(position),
        _ => None,
    }
}

pub(crate) fn child_mut<'v>(value: &'v mut Value, step: Step<'_>) -> Option<&'v mut Value> {
    match (value, step) {
        (Value::Object(map), Step::Member(name)) => map.get_mut(name),
        (Value::Array(items), Step::Member(name)) => items.get_mut(name.parse::<usize>().ok()?),
        (Value::Array(items), Step::Index(position)) => items.get_mut(position),
        _ => None,
    }
}

/// Store `value` at `step` inside `container`.
///
/// Objects gain missing members. Arrays only accept positions inside their
/// current bounds.
pub(crate) fn put(container: &mut Value, step: Step<'_>, value: Value) -> bool {
    if let (Value::Object(map), Step::Member(name)) = (&mut *container, step) {
        map.insert(name.to_owned(), value);
        return true;
    }
    if !container.is_array() {
        return false;
    }
    match child_mut(container, step) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}
