//! The engine: one state object, its observers and its scheduler.
//!
//! ```ignore
//! let engine = StateEngine::builder(json!({"items": [], "filter": ""}))
//!     .getter("visible", |state| {
//!         let filter = state.get_path("filter")?;
//!         let items = state.get_all("items.*", None)?;
//!         Ok(Value::from(items.into_iter().filter(|item| matches(item, &filter)).collect::<Vec<_>>()))
//!     })
//!     .build()?;
//!
//! engine.register_observer(StatePropertyRef::parse("visible", None)?, &observer);
//! engine.begin_update(None, |state| state.set_path("filter", json!("todo")));
//! engine.tasks().run_until_idle(); // `visible` observers are notified
//! ```

use crate::arena::{ObserverId, ObserverRegistry};
use crate::dependency::EdgeListener;
use crate::error::Result;
use crate::executor::TaskQueue;
use crate::list_index::ListIndex;
use crate::observer::Observer;
use crate::path::{PathInfo, PathSet, resolve_path};
use crate::reference::StatePropertyRef;
use crate::state::{
    Accessor, Component, Getter, OwnerBinding, ParentBinding, PathBridge, ReadonlyState,
    Setter, StateAccess, StateCore, WritableState,
};
use crate::updater::{RenderListener, RenderListenerId, UpdateHandle, Updater, UpdaterState};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Default number of rendering passes one flush may run before the rest of
/// the work is posted back to the task queue.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 64;

/// Default bound on nested reads within one evaluation.
pub const DEFAULT_MAX_RESOLVE_DEPTH: usize = 256;

/// Engine configuration.
///
/// ```ignore
/// let config = EngineConfig::new()
///     .cache(false)
///     .max_flush_passes(8);
/// ```
#[derive(Clone, Debug)]
pub struct EngineConfig {
    cache: bool,
    track_dependencies: bool,
    max_flush_passes: usize,
    max_resolve_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Defaults:
    /// - `cache`: on
    /// - `track_dependencies`: on
    /// - `max_flush_passes`: 64
    /// - `max_resolve_depth`: 256
    pub fn new() -> Self {
        Self {
            cache: true,
            track_dependencies: true,
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            max_resolve_depth: DEFAULT_MAX_RESOLVE_DEPTH,
        }
    }

    /// Whether cacheable scopes memoize resolved values.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    /// Whether nested reads record dependency edges.
    pub fn track_dependencies(mut self, enabled: bool) -> Self {
        self.track_dependencies = enabled;
        self
    }

    /// Rendering passes per flush. Writes made by observers during a pass
    /// are rendered by the next pass of the same flush, up to this limit.
    pub fn max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    /// Bound nested reads; deeper evaluation fails with `ResolveDepthExceeded`.
    pub fn max_resolve_depth(mut self, depth: usize) -> Self {
        self.max_resolve_depth = depth.max(1);
        self
    }

    /// Whether read layers cache resolved values.
    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    /// Whether getter reads record dependency edges.
    pub fn tracks_dependencies(&self) -> bool {
        self.track_dependencies
    }

    /// Rendering passes per flush before work is deferred to a new task.
    pub fn flush_passes(&self) -> usize {
        self.max_flush_passes
    }

    /// Nesting bound for getters reading other getters.
    pub fn resolve_depth(&self) -> usize {
        self.max_resolve_depth
    }
}

pub(crate) struct EngineInner {
    pub(crate) core: StateCore,
    pub(crate) observers: RefCell<ObserverRegistry>,
    pub(crate) updater: Updater,
    pub(crate) tasks: TaskQueue,
    pub(crate) this: Weak<EngineInner>,
}

/// Handle to a reactive state object.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct StateEngine {
    inner: Rc<EngineInner>,
}

/// Non-owning handle, for callbacks that must not keep an engine alive.
#[derive(Clone)]
pub struct WeakStateEngine {
    inner: Weak<EngineInner>,
}

impl WeakStateEngine {
    /// The engine, if it is still alive.
    pub fn upgrade(&self) -> Option<StateEngine> {
        self.inner.upgrade().map(|inner| StateEngine { inner })
    }
}

/// Builder for [`StateEngine`].
pub struct StateEngineBuilder {
    data: Value,
    accessors: Vec<(String, Accessor)>,
    config: EngineConfig,
    tasks: Option<TaskQueue>,
}

impl StateEngineBuilder {
    /// Declare a computed property.
    pub fn getter<F>(self, pattern: &str, getter: F) -> Self
    where
        F: Fn(&dyn StateAccess) -> Result<Value> + 'static,
    {
        self.accessor(pattern, Rc::new(getter), None)
    }

    /// Declare a computed property, writable when `setter` is given.
    pub fn accessor(mut self, pattern: &str, getter: Getter, setter: Option<Setter>) -> Self {
        self.accessors
            .push((pattern.to_owned(), Accessor::new(getter, setter)));
        self
    }

    /// Replace the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Post rendering passes to `tasks` instead of a private queue.
    pub fn tasks(mut self, tasks: TaskQueue) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Fails with `InvalidPath` if an accessor pattern is malformed.
    pub fn build(self) -> Result<StateEngine> {
        let accessors = self
            .accessors
            .into_iter()
            .map(|(pattern, accessor)| Ok((resolve_path(&pattern)?, accessor)))
            .collect::<Result<Vec<_>>>()?;
        let core = StateCore::new(self.data, accessors, self.config);
        let tasks = self.tasks.unwrap_or_default();
        let inner = Rc::new_cyclic(|this| EngineInner {
            core,
            observers: RefCell::new(ObserverRegistry::new()),
            updater: Updater::new(),
            tasks,
            this: this.clone(),
        });
        Ok(StateEngine { inner })
    }
}

impl StateEngine {
    /// Start building an engine over `data`.
    pub fn builder(data: Value) -> StateEngineBuilder {
        StateEngineBuilder {
            data,
            accessors: Vec::new(),
            config: EngineConfig::default(),
            tasks: None,
        }
    }

    /// Engine without accessors and with the default configuration.
    pub fn new(data: Value) -> Self {
        let core = StateCore::new(data, Vec::new(), EngineConfig::default());
        let inner = Rc::new_cyclic(|this| EngineInner {
            core,
            observers: RefCell::new(ObserverRegistry::new()),
            updater: Updater::new(),
            tasks: TaskQueue::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Non-owning handle to this engine.
    pub fn downgrade(&self) -> WeakStateEngine {
        WeakStateEngine {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same engine.
    pub fn ptr_eq(&self, other: &StateEngine) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.core.config
    }

    /// Run `f` against a read-only layer with a fresh cache.
    pub fn read<T>(&self, f: impl FnOnce(&ReadonlyState<'_>) -> Result<T>) -> Result<T> {
        let state = ReadonlyState::live(&self.inner.core);
        state.cacheable(f)
    }

    /// Resolve `reference` against the live state.
    pub fn resolve(&self, reference: &StatePropertyRef) -> Result<Value> {
        self.read(|state| state.resolve(reference))
    }

    /// Resolve a path without wildcards, or one bound by `loop_context`.
    pub fn get_path(&self, pattern: &str, loop_context: Option<StatePropertyRef>) -> Result<Value> {
        self.read(|state| state.with_loop_context(loop_context, |state| state.get_path(pattern)))
    }

    /// Identities of the elements of the list at `list`.
    pub fn list_indexes(&self, list: &StatePropertyRef) -> Result<Vec<ListIndex>> {
        self.read(|state| state.list_indexes(list))
    }

    /// Copy of the raw state object.
    pub fn snapshot(&self) -> Value {
        self.inner.core.data.borrow().clone()
    }

    /// Register `observer` on `reference`. The registry keeps a weak handle,
    /// so dropping the observer ends the registration.
    pub fn register_observer(
        &self,
        reference: StatePropertyRef,
        observer: &Rc<dyn Observer>,
    ) -> ObserverId {
        tracing::trace!(pattern = reference.pattern(), "registered observer");
        self.inner
            .observers
            .borrow_mut()
            .register(reference, observer)
    }

    /// Teardown hook: drop one registration. Returns `false` for stale ids.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.borrow_mut().unregister(id)
    }

    /// Drop every registration scoped under `list_index`.
    pub fn unregister_list_index(&self, list_index: &ListIndex) -> usize {
        self.inner
            .observers
            .borrow_mut()
            .purge_list_index(list_index)
    }

    /// Drop registrations whose observer no longer exists.
    pub fn prune_observers(&self) -> usize {
        self.inner.observers.borrow_mut().prune()
    }

    /// Number of live registrations.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Queue a write for the next rendering pass.
    pub fn enqueue(&self, reference: StatePropertyRef, value: Value) {
        self.inner.enqueue(reference, value);
    }

    /// Open a write session.
    ///
    /// Runs immediately unless another session is active, in which case it
    /// runs right after it. The handle reports the callback's outcome once
    /// the session has run.
    pub fn begin_update<F>(&self, loop_context: Option<StatePropertyRef>, callback: F) -> UpdateHandle
    where
        F: FnOnce(&WritableState<'_>) -> Result<()> + 'static,
    {
        self.inner.begin_update(loop_context, Box::new(callback))
    }

    /// Notify observers of `references` in the next rendering pass whether
    /// or not their values changed.
    pub fn notify_refs(&self, references: impl IntoIterator<Item = StatePropertyRef>) {
        self.inner.notify_refs(references);
    }

    /// Called with every reference a rendering pass found changed.
    pub fn on_render(&self, listener: RenderListener) -> RenderListenerId {
        self.inner.updater.subscribe(listener)
    }

    /// Remove a listener added with [`on_render`](Self::on_render). Returns
    /// `false` when it was already removed.
    pub fn off_render(&self, listener: RenderListenerId) -> bool {
        self.inner.updater.unsubscribe(listener)
    }

    /// Number of listeners added with [`on_render`](Self::on_render).
    pub fn render_listener_count(&self) -> usize {
        self.inner.updater.listener_count()
    }

    /// Route the paths `owner` knows about to it.
    pub fn set_owner(&self, owner: Option<Rc<dyn OwnerBinding>>) {
        *self.inner.core.owner.borrow_mut() = owner;
    }

    /// The current owner binding, if any.
    pub fn owner(&self) -> Option<Rc<dyn OwnerBinding>> {
        self.inner.core.owner.borrow().clone()
    }

    /// Make this engine a child of `parent`: paths covered by `bridge` are
    /// read from and written to the parent, and the parent's changes to
    /// those paths are forwarded here.
    pub fn attach_to_parent(&self, parent: &StateEngine, bridge: PathBridge) -> Rc<ParentBinding> {
        let binding = Rc::new(ParentBinding::new(parent.clone(), bridge));
        self.set_owner(Some(binding.clone()));

        let child = self.downgrade();
        let forwarding = Rc::downgrade(&binding);
        let listener = parent.on_render(Rc::new(move |changed: &[StatePropertyRef]| {
            let (Some(child), Some(binding)) = (child.upgrade(), forwarding.upgrade()) else {
                return;
            };
            let forwarded = binding.forward_changes(&child, changed);
            if !forwarded.is_empty() {
                child.notify_refs(forwarded);
            }
        }));
        binding.set_forwarding(listener);
        binding
    }

    /// Undo [`attach_to_parent`](Self::attach_to_parent). The parent stops
    /// forwarding changes once the last handle to the binding is dropped.
    pub fn detach_from_parent(&self) {
        self.set_owner(None);
    }

    /// The component getters see as their owner.
    pub fn set_component(&self, component: Option<Rc<dyn Component>>) {
        *self.inner.core.component.borrow_mut() = component;
    }

    /// Paths declared as accessors.
    pub fn known_paths(&self) -> PathSet {
        self.inner.core.getter_paths().clone()
    }

    /// Paths recorded as reading `pattern`.
    pub fn dependents_of(&self, pattern: &str) -> Result<Vec<&'static PathInfo>> {
        let info = resolve_path(pattern)?;
        Ok(self
            .inner
            .core
            .dependencies
            .borrow()
            .dependents_of(info)
            .collect())
    }

    /// Called with `(dependency, dependent)` for every new dependency edge.
    pub fn on_dependency(&self, listener: EdgeListener) {
        self.inner.core.dependencies.borrow_mut().subscribe(listener);
    }

    /// Current scheduler phase.
    pub fn state(&self) -> UpdaterState {
        self.inner.updater.state()
    }

    /// Rendering passes run so far.
    pub fn render_passes(&self) -> usize {
        self.inner.updater.render_passes()
    }

    /// Queue rendering passes run on.
    pub fn tasks(&self) -> &TaskQueue {
        &self.inner.tasks
    }

    /// Errors raised by queued writes since the last call.
    ///
    /// At most [`MAX_RETAINED_ERRORS`](crate::MAX_RETAINED_ERRORS) are kept; hosts that care about
    /// failed writes should drain this after each pass.
    pub fn take_errors(&self) -> Vec<crate::error::StateError> {
        self.inner.updater.take_errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_builder() {
        let config = EngineConfig::new()
            .cache(false)
            .track_dependencies(false)
            .max_flush_passes(0)
            .max_resolve_depth(8);
        assert!(!config.cache_enabled());
        assert!(!config.tracks_dependencies());
        assert_eq!(config.flush_passes(), 1);
        assert_eq!(config.resolve_depth(), 8);
    }

    #[test]
    fn builder_rejects_bad_accessor_paths() {
        let result = StateEngine::builder(json!({}))
            .getter("constructor", |_| Ok(Value::Null))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn weak_handles_do_not_keep_engines_alive() {
        let engine = StateEngine::new(json!({}));
        let weak = engine.downgrade();
        assert!(weak.upgrade().is_some_and(|e| e.ptr_eq(&engine)));
        drop(engine);
        assert!(weak.upgrade().is_none());
    }
}
