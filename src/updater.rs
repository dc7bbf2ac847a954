//! Update scheduler
//!
//! Writes reach the state object in two ways:
//!
//! - **Sessions** ([`begin_update`](crate::StateEngine::begin_update)): the
//!   callback receives a writable layer and its writes apply immediately.
//!   Sessions never interleave; one requested while another is active is
//!   queued and runs as soon as the active one closes.
//! - **Queued writes** ([`enqueue`](crate::StateEngine::enqueue)): applied
//!   at the start of the next rendering pass, in FIFO order.
//!
//! Either way only a rendering pass is scheduled, at most one per turn of the
//! task queue. The pass compares every affected reference against a
//! snapshot taken before the first change since the previous pass, refreshes
//! list identities, and notifies observers: plain ones first, selection ones
//! last. Observers may write again; that work is rendered by further passes
//! of the same flush, bounded by the configured pass limit.

use crate::engine::EngineInner;
use crate::error::{Result, StateError};
use crate::hash::{FastIndexMap, FastIndexSet};
use crate::list_diff::ListDiff;
use crate::list_index::ListIndex;
use crate::observer::{Change, Observer};
use crate::path::PathInfo;
use crate::reference::StatePropertyRef;
use crate::state::{ReadonlyState, StateAccess, WritableState};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Phase of the scheduler.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum UpdaterState {
    /// Nothing is running.
    #[default]
    Idle,
    /// A write session is running.
    Updating,
    /// A rendering pass is applying writes or notifying observers.
    Rendering,
}

/// Called after each rendering pass with every changed reference.
pub type RenderListener = Rc<dyn Fn(&[StatePropertyRef])>;

/// Handle returned by [`StateEngine::on_render`](crate::StateEngine::on_render).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderListenerId(u64);

/// Failed queued writes kept for `take_errors`; older ones are dropped.
pub const MAX_RETAINED_ERRORS: usize = 256;

pub(crate) type SessionCallback = Box<dyn FnOnce(&WritableState<'_>) -> Result<()>>;

type Outcome = Rc<RefCell<Option<Result<()>>>>;

struct PendingWrite {
    reference: StatePropertyRef,
    value: Value,
}

struct PendingSession {
    loop_context: Option<StatePropertyRef>,
    callback: SessionCallback,
    outcome: Outcome,
}

/// Outcome of a write session, available once the session has run.
#[derive(Clone, Debug)]
pub struct UpdateHandle {
    outcome: Outcome,
}

impl UpdateHandle {
    /// Whether the session has run.
    pub fn is_complete(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// `None` while the session is still queued behind another one.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.outcome.borrow().clone()
    }
}

pub(crate) struct Updater {
    state: Cell<UpdaterState>,
    queue: RefCell<VecDeque<PendingWrite>>,
    changed: RefCell<FastIndexSet<StatePropertyRef>>,
    /// Notified whether or not their value changed.
    forced: RefCell<FastIndexSet<StatePropertyRef>>,
    /// State before the first change since the previous pass.
    baseline: RefCell<Option<Rc<Value>>>,
    render_scheduled: Cell<bool>,
    session_open: Cell<bool>,
    sessions: RefCell<VecDeque<PendingSession>>,
    render_passes: Cell<usize>,
    errors: RefCell<VecDeque<StateError>>,
    listeners: RefCell<FastIndexMap<RenderListenerId, RenderListener>>,
    next_listener: Cell<u64>,
}

impl Updater {
    pub(crate) fn new() -> Self {
        Self {
            state: Cell::new(UpdaterState::Idle),
            queue: RefCell::new(VecDeque::new()),
            changed: RefCell::new(FastIndexSet::default()),
            forced: RefCell::new(FastIndexSet::default()),
            baseline: RefCell::new(None),
            render_scheduled: Cell::new(false),
            session_open: Cell::new(false),
            sessions: RefCell::new(VecDeque::new()),
            render_passes: Cell::new(0),
            errors: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(FastIndexMap::default()),
            next_listener: Cell::new(0),
        }
    }

    pub(crate) fn state(&self) -> UpdaterState {
        self.state.get()
    }

    pub(crate) fn render_passes(&self) -> usize {
        self.render_passes.get()
    }

    pub(crate) fn take_errors(&self) -> Vec<StateError> {
        self.errors.take().into()
    }

    fn record_error(&self, error: StateError) {
        let mut errors = self.errors.borrow_mut();
        if errors.len() == MAX_RETAINED_ERRORS {
            errors.pop_front();
            cov_mark::hit!(oldest_error_dropped);
            warn!(limit = MAX_RETAINED_ERRORS, "error buffer full, dropping the oldest");
        }
        errors.push_back(error);
    }

    pub(crate) fn subscribe(&self, listener: RenderListener) -> RenderListenerId {
        let id = RenderListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().insert(id, listener);
        id
    }

    pub(crate) fn unsubscribe(&self, id: RenderListenerId) -> bool {
        self.listeners.borrow_mut().shift_remove(&id).is_some()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn has_work(&self) -> bool {
        !self.queue.borrow().is_empty()
            || !self.changed.borrow().is_empty()
            || !self.forced.borrow().is_empty()
    }
}

/// Marks the session slot open; closes it on drop, even if a callback
/// panics.
struct SessionGuard<'a> {
    updater: &'a Updater,
}

impl<'a> SessionGuard<'a> {
    fn open(updater: &'a Updater) -> Self {
        updater.session_open.set(true);
        Self { updater }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.updater.session_open.set(false);
    }
}

impl EngineInner {
    pub(crate) fn enqueue(&self, reference: StatePropertyRef, value: Value) {
        trace!(pattern = reference.pattern(), "queued write");
        self.updater
            .queue
            .borrow_mut()
            .push_back(PendingWrite { reference, value });
        self.schedule_render();
    }

    pub(crate) fn notify_refs(&self, references: impl IntoIterator<Item = StatePropertyRef>) {
        let mut forced = self.updater.forced.borrow_mut();
        let before = forced.len();
        forced.extend(references);
        let added = forced.len() > before;
        drop(forced);
        if added {
            self.schedule_render();
        }
    }

    pub(crate) fn begin_update(
        &self,
        loop_context: Option<StatePropertyRef>,
        callback: SessionCallback,
    ) -> UpdateHandle {
        let outcome: Outcome = Rc::new(RefCell::new(None));
        self.updater.sessions.borrow_mut().push_back(PendingSession {
            loop_context,
            callback,
            outcome: outcome.clone(),
        });
        if self.updater.session_open.get() {
            cov_mark::hit!(session_queued);
            debug!("update session queued behind the active one");
        } else {
            self.drain_sessions();
        }
        UpdateHandle { outcome }
    }

    fn drain_sessions(&self) {
        {
            let _guard = SessionGuard::open(&self.updater);
            loop {
                let Some(session) = self.updater.sessions.borrow_mut().pop_front() else {
                    break;
                };
                self.run_session(session);
            }
        }
        if self.updater.has_work() {
            self.schedule_render();
        }
    }

    fn run_session(&self, session: PendingSession) {
        let PendingSession {
            loop_context,
            callback,
            outcome,
        } = session;
        let previous = self.updater.state.replace(UpdaterState::Updating);
        self.ensure_baseline();

        let state = WritableState::session(&self.core);
        let result = state.with_loop_context(loop_context, callback);
        let written = state.close();
        match &result {
            Ok(()) => debug!(written = written.len(), "update session closed"),
            // Writes made before the failure stay applied and are rendered.
            Err(error) => debug!(written = written.len(), %error, "update session failed"),
        }

        self.updater.changed.borrow_mut().extend(written);
        self.updater.state.set(previous);
        *outcome.borrow_mut() = Some(result);
    }

    fn ensure_baseline(&self) {
        let mut baseline = self.updater.baseline.borrow_mut();
        if baseline.is_none() {
            *baseline = Some(Rc::new(self.core.data.borrow().clone()));
        }
    }

    fn schedule_render(&self) {
        if self.updater.render_scheduled.replace(true) {
            return;
        }
        let this = self.this.clone();
        self.tasks.post(move || {
            if let Some(inner) = this.upgrade() {
                inner.render();
            }
        });
        trace!("rendering pass scheduled");
    }

    fn render(&self) {
        let updater = &self.updater;
        if updater.session_open.get() {
            // The session schedules a new pass when it closes.
            updater.render_scheduled.set(false);
            return;
        }
        let limit = self.core.config.flush_passes();
        let mut passes = 0;
        while updater.has_work() {
            if passes == limit {
                warn!(passes, "flush pass limit reached, deferring remaining work");
                updater.render_scheduled.set(false);
                self.schedule_render();
                return;
            }
            passes += 1;
            self.render_pass();
        }
        updater.render_scheduled.set(false);
    }

    fn render_pass(&self) {
        let updater = &self.updater;
        updater.state.set(UpdaterState::Rendering);
        self.apply_queued();

        let changed: Vec<StatePropertyRef> = updater.changed.take().into_iter().collect();
        let forced: Vec<StatePropertyRef> = updater.forced.take().into_iter().collect();
        let baseline = updater
            .baseline
            .take()
            .unwrap_or_else(|| Rc::new(self.core.data.borrow().clone()));
        let pass = updater.render_passes.get() + 1;
        updater.render_passes.set(pass);
        debug!(
            pass,
            changed = changed.len(),
            forced = forced.len(),
            "rendering pass"
        );

        let candidates = self.candidates(&changed, &forced);
        let changes = self.compare(candidates, &forced, baseline);

        // Resolve observers only now: list refreshes above may have purged
        // bindings of removed elements.
        let mut deliveries: Vec<(Rc<dyn Observer>, usize)> = {
            let registry = self.observers.borrow();
            changes
                .iter()
                .enumerate()
                .flat_map(|(i, change)| {
                    registry
                        .observers_for(&change.reference)
                        .into_iter()
                        .map(move |observer| (observer, i))
                })
                .collect()
        };
        deliveries.sort_by_key(|(observer, _)| observer.kind());
        trace!(
            changes = changes.len(),
            deliveries = deliveries.len(),
            "delivering notifications"
        );
        for (observer, i) in &deliveries {
            observer.notify(&changes[*i]);
        }

        let listeners: Vec<RenderListener> = updater.listeners.borrow().values().cloned().collect();
        if !listeners.is_empty() {
            let all: Vec<StatePropertyRef> = changed.into_iter().chain(forced).collect();
            for listener in listeners {
                listener(&all);
            }
        }
        updater.state.set(UpdaterState::Idle);
    }

    /// Apply queued writes in one writable session. Failed writes are
    /// logged and kept for `take_errors`; the rest still apply.
    fn apply_queued(&self) {
        let writes: Vec<PendingWrite> = self.updater.queue.borrow_mut().drain(..).collect();
        if writes.is_empty() {
            return;
        }
        self.ensure_baseline();
        let state = WritableState::session(&self.core);
        for write in writes {
            if let Err(error) = state.assign(&write.reference, write.value) {
                warn!(pattern = write.reference.pattern(), %error, "queued write failed");
                self.updater.record_error(error);
            }
        }
        self.updater.changed.borrow_mut().extend(state.close());
    }

    /// References that may have changed: lists related to a change first,
    /// then observed references in registration order.
    fn candidates(
        &self,
        changed: &[StatePropertyRef],
        forced: &[StatePropertyRef],
    ) -> Vec<StatePropertyRef> {
        let sources: Vec<(&StatePropertyRef, FastIndexSet<&'static PathInfo>)> = {
            let graph = self.core.dependencies.borrow();
            changed
                .iter()
                .chain(forced)
                .map(|source| (source, graph.affected_paths(source.info())))
                .collect()
        };

        let mut candidates: FastIndexSet<StatePropertyRef> = FastIndexSet::default();
        {
            let lists = self.core.lists.borrow();
            for (source, _) in &sources {
                candidates.extend(lists.references_related_to(source));
            }
        }
        let registry = self.observers.borrow();
        for reference in registry.references() {
            let affected = sources.iter().any(|(source, paths)| {
                source.covers(reference)
                    || reference.covers(source)
                    || (paths.contains(reference.info()) && source.compatible_with(reference))
            });
            if affected {
                candidates.insert(reference.clone());
            }
        }
        candidates.into_iter().collect()
    }

    /// Compare candidates against the baseline and refresh list identities.
    fn compare(
        &self,
        candidates: Vec<StatePropertyRef>,
        forced: &[StatePropertyRef],
        baseline: Rc<Value>,
    ) -> Vec<Change> {
        let before = ReadonlyState::snapshot(&self.core, baseline);
        let after = ReadonlyState::live(&self.core);
        let mut removed: Vec<ListIndex> = Vec::new();
        let mut changes = Vec::new();

        let outcome = before.cacheable(|before| {
            after.cacheable(|after| {
                for reference in candidates {
                    let orphaned = reference
                        .list_index()
                        .is_some_and(|idx| removed.iter().any(|gone| idx.is_within(gone)));
                    if orphaned {
                        cov_mark::hit!(skip_removed_element);
                        continue;
                    }
                    let value = match after.resolve(&reference) {
                        Ok(value) => value,
                        Err(error) => {
                            debug!(pattern = reference.pattern(), %error, "skipped notification");
                            continue;
                        }
                    };
                    let previous = before.resolve(&reference).unwrap_or(Value::Null);

                    let list_diff = self.refresh_list(&reference, &value);
                    if let Some(diff) = &list_diff {
                        let mut registry = self.observers.borrow_mut();
                        for gone in &diff.removed {
                            registry.purge_list_index(gone);
                        }
                        removed.extend(diff.removed.iter().cloned());
                    }

                    let is_forced = forced.iter().any(|source| source.covers(&reference));
                    let list_changed = list_diff.as_ref().is_some_and(|diff| !diff.is_empty());
                    if is_forced || list_changed || previous != value {
                        changes.push(Change {
                            reference,
                            value,
                            list_diff,
                        });
                    }
                }
                Ok(())
            })
        });
        if let Err(error) = outcome {
            warn!(%error, "comparison aborted");
        }
        changes
    }

    fn refresh_list(&self, reference: &StatePropertyRef, value: &Value) -> Option<ListDiff> {
        let mut lists = self.core.lists.borrow_mut();
        match value {
            Value::Array(items) => Some(lists.refresh(reference, Some(items.as_slice()))),
            _ if lists.contains(reference) => Some(lists.refresh(reference, None)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{EngineConfig, StateEngine};
    use crate::error::StateError;
    use crate::observer::{Change, FnObserver, Observer};
    use crate::reference::StatePropertyRef;
    use crate::state::StateAccess;
    use serde_json::{Value, json};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::{MAX_RETAINED_ERRORS, UpdaterState};

    fn recorder() -> (Rc<dyn Observer>, Rc<RefCell<Vec<Value>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let observer: Rc<dyn Observer> =
            Rc::new(FnObserver::new(move |change: &Change| sink.borrow_mut().push(change.value.clone())));
        (observer, log)
    }

    fn path(pattern: &str) -> StatePropertyRef {
        StatePropertyRef::parse(pattern, None).unwrap()
    }

    #[test]
    fn enqueued_writes_coalesce_into_one_pass() {
        let engine = StateEngine::new(json!({"count": 0}));
        let (observer, log) = recorder();
        engine.register_observer(path("count"), &observer);

        for i in 1..=5 {
            engine.enqueue(path("count"), json!(i));
        }
        assert_eq!(engine.tasks().len(), 1);
        assert_eq!(engine.render_passes(), 0);

        engine.tasks().run_until_idle();
        assert_eq!(engine.render_passes(), 1);
        assert_eq!(*log.borrow(), vec![json!(5)]);
        assert_eq!(engine.snapshot(), json!({"count": 5}));
    }

    #[test]
    fn unchanged_values_are_not_notified() {
        let engine = StateEngine::new(json!({"count": 1}));
        let (observer, log) = recorder();
        engine.register_observer(path("count"), &observer);

        engine.enqueue(path("count"), json!(1));
        engine.tasks().run_until_idle();
        assert!(log.borrow().is_empty());
        assert_eq!(engine.render_passes(), 1);
    }

    #[test]
    fn sessions_queue_behind_the_active_one() {
        cov_mark::check!(session_queued);
        let engine = StateEngine::new(json!({"log": []}));
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_engine = engine.clone();
        let inner_order = order.clone();
        let outer = engine.begin_update(None, move |state| {
            inner_order.borrow_mut().push("outer start");
            let nested_order = inner_order.clone();
            let nested = inner_engine.begin_update(None, move |_| {
                nested_order.borrow_mut().push("nested");
                Ok(())
            });
            assert!(!nested.is_complete());
            assert_eq!(inner_engine.state(), UpdaterState::Updating);
            state.set_path("log", json!(["outer"]))?;
            inner_order.borrow_mut().push("outer end");
            Ok(())
        });

        assert_eq!(outer.outcome(), Some(Ok(())));
        assert_eq!(*order.borrow(), ["outer start", "outer end", "nested"]);
        assert_eq!(engine.state(), UpdaterState::Idle);
    }

    #[test]
    fn failed_sessions_report_and_release_the_slot() {
        let engine = StateEngine::new(json!({"n": 0}));
        let failed = engine.begin_update(None, |state| {
            state.set_path("n", json!(1))?;
            state.set_path("missing.deep", json!(1))
        });
        assert!(matches!(
            failed.outcome(),
            Some(Err(StateError::MissingTarget { .. }))
        ));

        let next = engine.begin_update(None, |state| state.set_path("n", json!(2)));
        assert_eq!(next.outcome(), Some(Ok(())));
        assert_eq!(engine.snapshot(), json!({"n": 2}));
    }

    #[test]
    fn failed_queued_writes_are_collected() {
        let engine = StateEngine::new(json!({"n": 0}));
        engine.enqueue(path("missing.deep"), json!(1));
        engine.enqueue(path("n"), json!(3));
        engine.tasks().run_until_idle();

        assert_eq!(engine.snapshot(), json!({"n": 3}));
        let errors = engine.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(engine.take_errors().is_empty());
    }

    #[test]
    fn observer_writes_render_in_the_same_flush() {
        let engine = StateEngine::new(json!({"a": 0, "b": 0}));
        let writer_engine = engine.downgrade();
        let writer: Rc<dyn Observer> = Rc::new(FnObserver::new(move |change: &Change| {
            if let Some(engine) = writer_engine.upgrade() {
                engine.enqueue(path("b"), change.value.clone());
            }
        }));
        let (observer, log) = recorder();
        engine.register_observer(path("a"), &writer);
        engine.register_observer(path("b"), &observer);

        engine.enqueue(path("a"), json!(7));
        assert_eq!(engine.tasks().run_until_idle(), 1);
        assert_eq!(engine.render_passes(), 2);
        assert_eq!(*log.borrow(), vec![json!(7)]);
    }

    #[test]
    fn flush_pass_limit_defers_work() {
        let engine = StateEngine::builder(json!({"n": 0}))
            .config(EngineConfig::new().max_flush_passes(1))
            .build()
            .unwrap();
        let pinger_engine = engine.downgrade();
        let pinger: Rc<dyn Observer> = Rc::new(FnObserver::new(move |change: &Change| {
            let next = change.value.as_i64().unwrap_or_default() + 1;
            if next < 3 {
                if let Some(engine) = pinger_engine.upgrade() {
                    engine.enqueue(path("n"), json!(next));
                }
            }
        }));
        engine.register_observer(path("n"), &pinger);

        engine.enqueue(path("n"), json!(1));
        assert_eq!(engine.tasks().run_until_idle(), 2);
        assert_eq!(engine.render_passes(), 2);
        assert_eq!(engine.snapshot(), json!({"n": 2}));
    }

    #[test]
    fn forced_references_always_notify() {
        let engine = StateEngine::new(json!({"n": 1}));
        let (observer, log) = recorder();
        engine.register_observer(path("n"), &observer);
        engine.notify_refs([path("n")]);
        engine.tasks().run_until_idle();
        assert_eq!(*log.borrow(), vec![json!(1)]);
    }

    #[test]
    fn render_listeners_see_changed_references() {
        let engine = StateEngine::new(json!({"n": 1}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.on_render(Rc::new(move |changed: &[StatePropertyRef]| {
            sink.borrow_mut()
                .extend(changed.iter().map(|r| r.pattern().to_owned()));
        }));
        engine.begin_update(None, |state| state.set_path("n", json!(2)));
        engine.tasks().run_until_idle();
        assert_eq!(*seen.borrow(), ["n"]);
    }

    #[test]
    fn removed_render_listeners_are_not_called() {
        let engine = StateEngine::new(json!({"n": 1}));
        let calls = Rc::new(Cell::new(0));
        let sink = calls.clone();
        let id = engine.on_render(Rc::new(move |_: &[StatePropertyRef]| {
            sink.set(sink.get() + 1)
        }));
        assert_eq!(engine.render_listener_count(), 1);

        engine.enqueue(path("n"), json!(2));
        engine.tasks().run_until_idle();
        assert!(engine.off_render(id));
        assert!(!engine.off_render(id));
        assert_eq!(engine.render_listener_count(), 0);

        engine.enqueue(path("n"), json!(3));
        engine.tasks().run_until_idle();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn error_buffer_keeps_the_newest_failures() {
        cov_mark::check!(oldest_error_dropped);
        let engine = StateEngine::builder(json!({"n": 0}))
            .getter("double", |state| state.get_path("n"))
            .build()
            .unwrap();
        for _ in 0..MAX_RETAINED_ERRORS + 3 {
            engine.enqueue(path("double"), json!(1));
        }
        engine.tasks().run_until_idle();
        assert_eq!(engine.take_errors().len(), MAX_RETAINED_ERRORS);
    }

    #[test]
    fn readonly_reads_are_available_during_notification() {
        let engine = StateEngine::new(json!({"first": "a", "last": "b"}));
        let reader = engine.downgrade();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let observer: Rc<dyn Observer> = Rc::new(FnObserver::new(move |_: &Change| {
            if let Some(engine) = reader.upgrade() {
                *sink.borrow_mut() = engine.read(|state| state.get_path("last")).ok();
            }
        }));
        engine.register_observer(path("first"), &observer);
        engine.begin_update(None, |state| {
            state.set_path("first", json!("x"))?;
            state.set_path("last", json!("y"))
        });
        engine.tasks().run_until_idle();
        assert_eq!(*seen.borrow(), Some(json!("y")));
    }
}
