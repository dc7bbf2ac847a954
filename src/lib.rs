//! Path-addressed reactive state binding.
//!
//! A state object (a JSON tree) is addressed by dotted path patterns such as
//! `users.*.name`, where `*` stands for "every element of this list". The
//! engine resolves those paths, records which paths every getter reads,
//! gives list elements stable identities across re-orderings, and batches
//! writes into rendering passes that notify only the observers whose value
//! actually changed.
//!
//! # Quick Start
//!
//! ```ignore
//! use pathbind::{StateEngine, StatePropertyRef, StateAccess};
//! use serde_json::json;
//!
//! let engine = StateEngine::builder(json!({"items": [{"price": 2}, {"price": 3}]}))
//!     .getter("total", |state| {
//!         let prices = state.get_all("items.*.price", None)?;
//!         Ok(json!(prices.iter().filter_map(|p| p.as_i64()).sum::<i64>()))
//!     })
//!     .build()?;
//!
//! let total = StatePropertyRef::parse("total", None)?;
//! engine.register_observer(total.clone(), &observer);
//!
//! engine.begin_update(None, |state| state.set_path("items.0.price", json!(10)));
//! engine.tasks().run_until_idle(); // observer sees 13
//! ```
//!
//! # Core Types
//!
//! - [`PathInfo`] - Interned analysis of a path pattern. See [`resolve_path`].
//! - [`ListIndex`] - Stable identity of one list element.
//! - [`StatePropertyRef`] - A pattern bound to a list position.
//! - [`StateLayer`] - Read-only or writable access to the state object.
//! - [`StateEngine`] - Owns the state, the observers and the scheduler.
//!
//! # Writing
//!
//! ```ignore
//! // Immediate, inside a session. Sessions never interleave.
//! engine.begin_update(None, |state| state.set_path("count", json!(1)));
//!
//! // Deferred to the next rendering pass.
//! engine.enqueue(count_ref, json!(2));
//!
//! // Notify regardless of value equality.
//! engine.notify_refs([count_ref]);
//! ```
//!
//! Rendering passes run on the engine's [`TaskQueue`]; the host drains it
//! once per turn of its event loop.

#![deny(missing_docs)]

pub(crate) mod arena;
mod dependency;
mod engine;
mod error;
mod executor;
mod hash;
mod list_diff;
mod list_index;
mod observer;
mod path;
mod reference;
/// State layers, accessors and parent/child bridges.
pub mod state;
mod updater;

// Engine and configuration
pub use engine::{
    DEFAULT_MAX_FLUSH_PASSES, DEFAULT_MAX_RESOLVE_DEPTH, EngineConfig, StateEngine,
    StateEngineBuilder, WeakStateEngine,
};
pub use error::{Result, StateError};

// Paths, references and list identity
pub use list_diff::{ListDiff, ValueKey, diff, diff_values};
pub use list_index::ListIndex;
pub use path::{PathId, PathInfo, PathSet, WILDCARD, resolve_path};
pub use reference::{RefKey, StatePropertyRef};

// State access
pub use state::{
    Accessor, Capability, Component, Getter, OwnerBinding, ParentBinding, PathBridge, Property,
    PropertyKey, ReadonlyState, Setter, StateAccess, StateLayer, Translation, WritableState,
    capability_for_tag, register_capability_tag,
};

// Observers and scheduling
pub use arena::ObserverId;
pub use dependency::{DependencyGraph, EdgeListener};
pub use executor::TaskQueue;
pub use observer::{Change, FnObserver, Observer, ObserverKind};
pub use updater::{
    MAX_RETAINED_ERRORS, RenderListener, RenderListenerId, UpdateHandle, UpdaterState,
};
