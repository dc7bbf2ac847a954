//! The consumer side of change notification.
//!
//! Observers are owned by whoever creates them (typically a binding in the
//! view layer). The engine keeps only weak handles, so dropping an observer
//! is enough to stop notifications; calling
//! [`StateEngine::unregister_observer`](crate::StateEngine::unregister_observer)
//! purges the registration eagerly.

use crate::list_diff::ListDiff;
use crate::reference::StatePropertyRef;
use serde_json::Value;
use std::fmt;

/// Redraw ordering class of an observer.
///
/// Within a rendering pass every `Plain` observer is notified before any
/// `Selection` observer. Selection-like bindings (a chosen option, a
/// selected index) are applied last so they never point at options the
/// same pass has not created yet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObserverKind {
    /// Notified first.
    #[default]
    Plain,
    /// Notified after every plain observer, e.g. to sync a selection.
    Selection,
}

/// One changed reference, as delivered to an observer.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    /// The changed reference.
    pub reference: StatePropertyRef,
    /// Value after the change.
    pub value: Value,
    /// Structural delta, present when the reference holds a list.
    pub list_diff: Option<ListDiff>,
}

/// Receives change notifications for the references it is registered on.
pub trait Observer {
    /// Called once per changed reference per rendering pass.
    fn notify(&self, change: &Change);

    /// Ordering class of the observer.
    fn kind(&self) -> ObserverKind {
        ObserverKind::Plain
    }
}

/// Observer backed by a closure.
pub struct FnObserver<F> {
    kind: ObserverKind,
    callback: F,
}

impl<F: Fn(&Change)> FnObserver<F> {
    /// Plain observer calling `callback`.
    pub fn new(callback: F) -> Self {
        Self {
            kind: ObserverKind::Plain,
            callback,
        }
    }

    /// Selection observer calling `callback`; runs after plain observers.
    pub fn selection(callback: F) -> Self {
        Self {
            kind: ObserverKind::Selection,
            callback,
        }
    }
}

impl<F: Fn(&Change)> Observer for FnObserver<F> {
    fn notify(&self, change: &Change) {
        (self.callback)(change);
    }

    fn kind(&self) -> ObserverKind {
        self.kind
    }
}

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver").field("kind", &self.kind).finish()
    }
}
