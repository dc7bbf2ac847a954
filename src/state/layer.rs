use super::capability::{Property, PropertyKey, capability_for_tag};
use super::context::EvalContext;
use super::object::{self, StateCore};
use super::owner::Component;
use super::{Mode, Readonly, StateAccess, Writable};
use crate::error::{Result, StateError};
use crate::hash::FastIndexSet;
use crate::list_diff::diff_values;
use crate::list_index::ListIndex;
use crate::path::{PathInfo, resolve_path};
use crate::reference::StatePropertyRef;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

enum Source {
    /// The engine's current data.
    Live,
    /// A frozen copy, used to compare against the state before a change.
    Snapshot(Rc<Value>),
}

/// Access layer over an engine's state object.
///
/// Each layer carries its own evaluation context (reference stack, loop
/// context, cache), so two layers never observe each other's cached values.
pub struct StateLayer<'a, M: Mode> {
    core: &'a StateCore,
    source: Source,
    ctx: EvalContext,
    written: RefCell<FastIndexSet<StatePropertyRef>>,
    open: Cell<bool>,
    _mode: PhantomData<M>,
}

/// Layer that rejects writes.
pub type ReadonlyState<'a> = StateLayer<'a, Readonly>;
/// Layer handed out inside update sessions.
pub type WritableState<'a> = StateLayer<'a, Writable>;

impl<'a> StateLayer<'a, Readonly> {
    pub(crate) fn live(core: &'a StateCore) -> Self {
        Self::with_source(core, Source::Live, false)
    }

    pub(crate) fn snapshot(core: &'a StateCore, data: Rc<Value>) -> Self {
        Self::with_source(core, Source::Snapshot(data), false)
    }
}

impl<'a> StateLayer<'a, Writable> {
    pub(crate) fn session(core: &'a StateCore) -> Self {
        Self::with_source(core, Source::Live, true)
    }

    /// References written so far.
    pub fn written(&self) -> Vec<StatePropertyRef> {
        self.written.borrow().iter().cloned().collect()
    }

    /// End the session. Later writes raise `NoActiveSession`.
    pub(crate) fn close(&self) -> Vec<StatePropertyRef> {
        self.open.set(false);
        self.written.take().into_iter().collect()
    }
}

impl<'a, M: Mode> StateLayer<'a, M> {
    fn with_source(core: &'a StateCore, source: Source, open: bool) -> Self {
        Self {
            core,
            source,
            ctx: EvalContext::new(core.config.cache_enabled(), core.config.resolve_depth()),
            written: RefCell::new(FastIndexSet::default()),
            open: Cell::new(open),
            _mode: PhantomData,
        }
    }

    /// Run `f` with `loop_context` as the active loop position.
    ///
    /// Loop contexts do not nest: entering one while another is active
    /// raises `AlreadyInLoopContext`. `None` runs `f` without touching the
    /// current context.
    pub fn with_loop_context<T>(
        &self,
        loop_context: Option<StatePropertyRef>,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        let Some(reference) = loop_context else {
            return f(self);
        };
        let _guard = self.ctx.enter_loop(reference)?;
        f(self)
    }

    /// Run `f` with a fresh resolve cache, discarded afterwards.
    pub fn cacheable<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let _guard = self.ctx.install_cache();
        f(self)
    }

    fn record_dependency(&self, info: &'static PathInfo) {
        if !self.core.config.tracks_dependencies() {
            return;
        }
        let Some(current) = self.ctx.current_info() else {
            return;
        };
        if current == info {
            return;
        }
        let listeners = {
            let mut graph = self.core.dependencies.borrow_mut();
            if !graph.add_edge(info, current) {
                return;
            }
            graph.listeners()
        };
        for listener in listeners {
            listener(info, current);
        }
    }

    fn resolve_ref(&self, reference: &StatePropertyRef) -> Result<Value> {
        self.record_dependency(reference.info());
        if let Some(value) = self.ctx.cached(reference) {
            cov_mark::hit!(resolve_cache_hit);
            return Ok(value);
        }
        let _frame = self.ctx.push(reference)?;
        let value = self.resolve_uncached(reference)?;
        self.ctx.store(reference, &value);
        Ok(value)
    }

    fn resolve_uncached(&self, reference: &StatePropertyRef) -> Result<Value> {
        let info = reference.info();
        if let Some(owner) = self.core.owner_for(info) {
            cov_mark::hit!(resolve_via_owner);
            return owner.resolve_via_owner(reference);
        }
        if let Some(accessor) = self.core.accessor(info) {
            return (accessor.getter)(self);
        }
        if !self.core.has_getter_ancestor(info) {
            if info.depth() > 1 {
                cov_mark::hit!(resolve_parent_walk);
            }
            return self.read_direct(reference);
        }

        // Something above us is computed: read the parent through the layer
        // and pick the member out of its value.
        cov_mark::hit!(resolve_through_getter);
        let parent = reference.parent().ok_or_else(|| missing_target(reference))?;
        let container = self.resolve_ref(&parent)?;
        let step = object::last_step(reference)?;
        Ok(object::child(&container, step).cloned().unwrap_or(Value::Null))
    }

    /// Walk the raw object along the reference's segments. Anything missing
    /// on the way reads as `Null`.
    fn read_direct(&self, reference: &StatePropertyRef) -> Result<Value> {
        let steps = object::steps(reference)?;
        let read = |root: &Value| {
            steps
                .iter()
                .try_fold(root, |value, step| object::child(value, *step))
                .cloned()
                .unwrap_or(Value::Null)
        };
        Ok(match &self.source {
            Source::Live => read(&*self.core.data.borrow()),
            Source::Snapshot(data) => read(data),
        })
    }

    /// Bind `info` to the list position of the loop context or of the
    /// innermost frame that shares its wildcards.
    fn bind(&self, info: &'static PathInfo) -> Result<StatePropertyRef> {
        let needed = info.wildcard_count();
        if needed == 0 {
            return Ok(StatePropertyRef::plain(info));
        }
        let candidates = self.ctx.loop_context().into_iter().chain(self.ctx.frames());
        for candidate in candidates {
            if shared_wildcards(candidate.info(), info) >= needed {
                return StatePropertyRef::new(info, candidate.list_index().cloned());
            }
        }
        Err(StateError::MissingListIndex {
            pattern: info.pattern().to_owned(),
        })
    }

    fn assign_ref(&self, reference: &StatePropertyRef, value: Value) -> Result<()> {
        if !M::WRITABLE {
            return Err(StateError::ReadonlyViolation {
                pattern: reference.pattern().to_owned(),
            });
        }
        if !self.open.get() {
            return Err(StateError::NoActiveSession {
                pattern: reference.pattern().to_owned(),
            });
        }

        let info = reference.info();
        if let Some(owner) = self.core.owner_for(info) {
            cov_mark::hit!(write_via_owner);
            if !owner.write_via_owner(reference, value)? {
                return Err(StateError::NoOwnerBindingFound {
                    path: reference.pattern().to_owned(),
                });
            }
        } else if let Some(accessor) = self.core.accessor(info) {
            let setter = accessor
                .setter
                .as_ref()
                .ok_or_else(|| StateError::NotWritable {
                    pattern: reference.pattern().to_owned(),
                })?;
            setter(self, value)?;
        } else if !self.core.has_getter_ancestor(info) {
            self.write_direct(reference, value)?;
        } else {
            // Patch a copy of the computed parent and write it back.
            cov_mark::hit!(write_through_getter);
            let parent = reference.parent().ok_or_else(|| missing_target(reference))?;
            let mut container = self.resolve_ref(&parent)?;
            if !object::put(&mut container, object::last_step(reference)?, value) {
                return Err(missing_target(reference));
            }
            self.assign_ref(&parent, container)?;
        }

        self.written.borrow_mut().insert(reference.clone());
        self.ctx.invalidate();
        Ok(())
    }

    fn write_direct(&self, reference: &StatePropertyRef, value: Value) -> Result<()> {
        let steps = object::steps(reference)?;
        let Some((last, path)) = steps.split_last() else {
            return Err(missing_target(reference));
        };
        let mut data = self.core.data.borrow_mut();
        let container = path
            .iter()
            .try_fold(&mut *data, |value, step| object::child_mut(value, *step))
            .ok_or_else(|| missing_target(reference))?;
        if !object::put(container, *last, value) {
            return Err(missing_target(reference));
        }
        let data = &*data;
        self.core
            .lists
            .borrow_mut()
            .sync_element_edit(reference, |n| {
                steps
                    .get(..n)?
                    .iter()
                    .try_fold(data, |value, step| object::child(value, *step))
                    .cloned()
            });
        Ok(())
    }

    /// Positions of the loop context for the wildcards it shares with `info`.
    fn loop_positions(&self, info: &PathInfo) -> Vec<usize> {
        self.ctx
            .loop_context()
            .and_then(|context| {
                let shared = shared_wildcards(context.info(), info);
                let positions = context.list_index()?.indexes();
                Some(positions.into_iter().take(shared).collect())
            })
            .unwrap_or_default()
    }

    fn enumerate(
        &self,
        info: &'static PathInfo,
        level: usize,
        parent: Option<ListIndex>,
        fixed: &[usize],
        out: &mut Vec<ListIndex>,
    ) -> Result<()> {
        let list = StatePropertyRef::new(info.wildcard_parent_infos()[level], parent)?;
        let elements = self.list_indexes(&list)?;
        let chosen = match fixed.get(level) {
            Some(position) => elements.get(*position).cloned().into_iter().collect(),
            None => elements,
        };
        for element in chosen {
            if level + 1 == info.wildcard_count() {
                out.push(element);
            } else {
                self.enumerate(info, level + 1, Some(element), fixed, out)?;
            }
        }
        Ok(())
    }
}

fn shared_wildcards(a: &PathInfo, b: &PathInfo) -> usize {
    a.wildcard_paths()
        .iter()
        .zip(b.wildcard_paths())
        .take_while(|(x, y)| x == y)
        .count()
}

fn missing_target(reference: &StatePropertyRef) -> StateError {
    StateError::MissingTarget {
        pattern: reference.pattern().to_owned(),
    }
}

impl<M: Mode> StateAccess for StateLayer<'_, M> {
    fn resolve(&self, reference: &StatePropertyRef) -> Result<Value> {
        self.resolve_ref(reference)
    }

    fn assign(&self, reference: &StatePropertyRef, value: Value) -> Result<()> {
        self.assign_ref(reference, value)
    }

    fn get_path(&self, pattern: &str) -> Result<Value> {
        let reference = self.bind(resolve_path(pattern)?)?;
        self.resolve_ref(&reference)
    }

    fn set_path(&self, pattern: &str, value: Value) -> Result<()> {
        if !M::WRITABLE {
            return Err(StateError::ReadonlyViolation {
                pattern: pattern.to_owned(),
            });
        }
        let reference = self.bind(resolve_path(pattern)?)?;
        self.assign_ref(&reference, value)
    }

    fn get_all(&self, pattern: &str, indexes: Option<&[usize]>) -> Result<Vec<Value>> {
        let info = resolve_path(pattern)?;
        self.record_dependency(info);
        if info.wildcard_count() == 0 {
            return Ok(vec![self.resolve_ref(&StatePropertyRef::plain(info))?]);
        }
        let fixed = match indexes {
            Some(indexes) => indexes.to_vec(),
            None => self.loop_positions(info),
        };
        let mut elements = Vec::new();
        self.enumerate(info, 0, None, &fixed, &mut elements)?;
        elements
            .into_iter()
            .map(|element| self.resolve_ref(&StatePropertyRef::new(info, Some(element))?))
            .collect()
    }

    fn track_dependency(&self, pattern: &str) -> Result<()> {
        self.record_dependency(resolve_path(pattern)?);
        Ok(())
    }

    fn list_indexes(&self, list: &StatePropertyRef) -> Result<Vec<ListIndex>> {
        let value = self.resolve_ref(list)?;
        let Value::Array(values) = &value else {
            return Ok(Vec::new());
        };
        if let Some(indexes) = self.core.lists.borrow().indexes_if_current(list, values) {
            return Ok(indexes);
        }
        Ok(match self.source {
            Source::Live => self.core.lists.borrow_mut().record(list, values),
            // Identities for a past state are throwaway; only their
            // positions are ever used.
            Source::Snapshot(_) => diff_values(None, None, Some(values), list.list_index()).list_indexes,
        })
    }

    fn loop_context(&self) -> Option<StatePropertyRef> {
        self.ctx.loop_context()
    }

    fn owning_component(&self) -> Option<Rc<dyn Component>> {
        self.core.component.borrow().clone()
    }

    fn related_component(&self, selector: &str) -> Option<Rc<dyn Component>> {
        self.owning_component()?.related(selector)
    }

    fn is_writable(&self) -> bool {
        M::WRITABLE
    }

    fn has(&self, key: &PropertyKey<'_>) -> bool {
        key.is_known()
    }

    fn get(&self, key: &PropertyKey<'_>) -> Result<Property> {
        match key {
            PropertyKey::Path(pattern) => self.get_path(pattern).map(Property::Value),
            PropertyKey::Tag(tag) => capability_for_tag(tag)
                .map(Property::Capability)
                .ok_or_else(|| StateError::UnsupportedProperty {
                    key: (*tag).to_owned(),
                }),
        }
    }
}
