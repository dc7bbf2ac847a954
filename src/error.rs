//! Error taxonomy for the binding engine.
//!
//! Every variant is a contract violation on the caller's side. Nothing in the
//! crate retries on these; they are surfaced to whoever issued the read or
//! write that failed.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = StateError> = std::result::Result<T, E>;

/// Errors raised by path resolution, state access and the update scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The pattern is malformed or is a reserved identifier.
    #[error("invalid path `{pattern}`: {reason}")]
    InvalidPath {
        /// The rejected pattern.
        pattern: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A wildcard segment was resolved without a list position.
    #[error("no list index available to resolve `{pattern}`")]
    MissingListIndex {
        /// Pattern being resolved.
        pattern: String,
    },

    /// A loop context was entered while another one was active.
    #[error("a loop context is already active")]
    AlreadyInLoopContext,

    /// A write was attempted through the read-only layer.
    #[error("cannot write `{pattern}` through a read-only state")]
    ReadonlyViolation {
        /// Pattern that was written.
        pattern: String,
    },

    /// A tagged key that is neither a path nor a known capability.
    #[error("unsupported property `{key}`")]
    UnsupportedProperty {
        /// The unknown key.
        key: String,
    },

    /// No registered prefix maps the given path across the parent/child bridge.
    #[error("no path translation found for `{path}`")]
    NoTranslationFound {
        /// Path that could not be translated.
        path: String,
    },

    /// A path was routed to the owner binding but none claims it.
    #[error("no owner binding found for `{path}`")]
    NoOwnerBindingFound {
        /// Path routed to the owner.
        path: String,
    },

    /// A write targeted a member of something that is not a container, or an
    /// element past the end of a list.
    #[error("no writable location for `{pattern}`")]
    MissingTarget {
        /// Pattern that was written.
        pattern: String,
    },

    /// The path names a getter that has no setter.
    #[error("accessor `{pattern}` has no setter")]
    NotWritable {
        /// The getter's pattern.
        pattern: String,
    },

    /// A write was attempted outside of an update session.
    #[error("cannot write `{pattern}` outside of an update session")]
    NoActiveSession {
        /// Pattern that was written.
        pattern: String,
    },

    /// Nested reads went deeper than the configured bound, typically a
    /// getter that reads itself.
    #[error("resolving `{pattern}` exceeded the maximum nesting depth")]
    ResolveDepthExceeded {
        /// Pattern whose evaluation went too deep.
        pattern: String,
    },
}
