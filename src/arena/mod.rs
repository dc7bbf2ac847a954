// Id-indexed registries owned by an engine
//
// This module provides two stores:
// - Observer arena: slab of weak observer handles, indexed by reference and
//   by list identity so a removed list element can tear down its bindings
// - List arena: last observed values and identities of every list reference
//
// Both are plain (non-global) structures. The engine wraps each one in a
// RefCell and never holds a borrow across an observer or getter callback.

/// Element identities per list.
pub mod list_arena;
/// Observer registrations.
pub mod observer_arena;

pub use list_arena::ListStore;
pub use observer_arena::{ObserverId, ObserverRegistry};
