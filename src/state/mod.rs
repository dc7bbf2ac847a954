//! The state access layer.
//!
//! A state object is never read or written directly. Callers go through a
//! [`StateLayer`], which turns path strings into references, resolves them
//! (direct navigation, getters, or an owning collaborator), records which
//! paths were read while evaluating which, and routes writes.
//!
//! Two variants exist. [`ReadonlyState`] rejects every write; it is what
//! bindings and getters see during rendering. [`WritableState`] is only
//! handed out inside an update session opened by the scheduler.

mod capability;
mod context;
mod layer;
mod object;
/// Collaborators that own part of the paths: bridges to a parent engine
/// and the owning component.
pub mod owner;

pub use capability::{
    Capability, Property, PropertyKey, capability_for_tag, register_capability_tag,
};
pub use layer::{ReadonlyState, StateLayer, WritableState};
pub use object::Accessor;
pub use owner::{Component, OwnerBinding, ParentBinding, PathBridge, Translation};

pub(crate) use object::StateCore;

use crate::error::Result;
use crate::list_index::ListIndex;
use crate::reference::StatePropertyRef;
use serde_json::Value;
use std::rc::Rc;

/// Computes a virtual property from other state.
pub type Getter = Rc<dyn Fn(&dyn StateAccess) -> Result<Value>>;

/// Writes a virtual property, typically by writing the paths it is computed
/// from.
pub type Setter = Rc<dyn Fn(&dyn StateAccess, Value) -> Result<()>>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Readonly {}
    impl Sealed for super::Writable {}
}

/// Access mode of a [`StateLayer`].
pub trait Mode: sealed::Sealed {
    /// Whether layers in this mode accept writes.
    const WRITABLE: bool;
}

/// Read-only access mode.
#[derive(Debug)]
pub struct Readonly;

/// Writable access mode.
#[derive(Debug)]
pub struct Writable;

impl Mode for Readonly {
    const WRITABLE: bool = false;
}

impl Mode for Writable {
    const WRITABLE: bool = true;
}

/// Object-safe view of a state layer, as seen by getters and setters.
///
/// Wildcard patterns passed to the `*_path` methods are bound to the list
/// position of the active loop context, or else of the reference currently
/// being evaluated.
pub trait StateAccess {
    /// Value of `reference`: direct navigation, a getter, or the owner.
    fn resolve(&self, reference: &StatePropertyRef) -> Result<Value>;

    /// Write `value` at `reference`, through a setter or the owner when one
    /// answers for it.
    fn assign(&self, reference: &StatePropertyRef, value: Value) -> Result<()>;

    /// [`resolve`](Self::resolve) by pattern.
    fn get_path(&self, pattern: &str) -> Result<Value>;

    /// [`assign`](Self::assign) by pattern.
    fn set_path(&self, pattern: &str, value: Value) -> Result<()>;

    /// Every value matched by `pattern`, in list order.
    ///
    /// `indexes` pins the outer wildcards to fixed positions; by default the
    /// positions of the active loop context are used.
    fn get_all(&self, pattern: &str, indexes: Option<&[usize]>) -> Result<Vec<Value>>;

    /// Record that the current evaluation depends on `pattern`.
    fn track_dependency(&self, pattern: &str) -> Result<()>;

    /// Identities of the elements of the list at `list`.
    fn list_indexes(&self, list: &StatePropertyRef) -> Result<Vec<ListIndex>>;

    /// Element reference wildcards are currently bound to.
    fn loop_context(&self) -> Option<StatePropertyRef>;

    /// The component this state belongs to.
    fn owning_component(&self) -> Option<Rc<dyn Component>>;

    /// A component reachable from the owning one.
    fn related_component(&self, selector: &str) -> Option<Rc<dyn Component>>;

    /// Whether writes are accepted.
    fn is_writable(&self) -> bool;

    /// Whether [`get`](Self::get) would answer `key`.
    fn has(&self, key: &PropertyKey<'_>) -> bool;

    /// Look up a path or a capability tag.
    fn get(&self, key: &PropertyKey<'_>) -> Result<Property>;
}
