//! Tagged property keys.
//!
//! A state object answers two kinds of keys: ordinary paths and tags naming a
//! capability of the access layer itself. Tags live in one process-wide
//! table. Hosts can register aliases for the built-in capabilities (a
//! template language that spells them differently, for instance).

use crate::hash::{FastHashMap, FastHashBuilder};
use crate::path::resolve_path;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::LazyLock;

/// Non-path operations a state object exposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Resolve every element matched by a wildcard pattern.
    GetAll,
    /// Record a dependency on a path without reading it.
    TrackDependency,
    /// Look up a component related to the owning one.
    NavigateRelated,
    /// The component that owns this state.
    OwningComponent,
}

impl Capability {
    /// Canonical tag of the capability.
    pub fn tag(self) -> &'static str {
        match self {
            Capability::GetAll => "$getAll",
            Capability::TrackDependency => "$trackDependency",
            Capability::NavigateRelated => "$navigate",
            Capability::OwningComponent => "$component",
        }
    }
}

const BUILTIN: [Capability; 4] = [
    Capability::GetAll,
    Capability::TrackDependency,
    Capability::NavigateRelated,
    Capability::OwningComponent,
];

static CAPABILITY_TAGS: LazyLock<RwLock<FastHashMap<Box<str>, Capability>>> =
    LazyLock::new(|| {
        let mut tags = FastHashMap::with_hasher(FastHashBuilder);
        for capability in BUILTIN {
            tags.insert(capability.tag().into(), capability);
        }
        RwLock::new(tags)
    });

/// Capability registered under `tag`, if any.
pub fn capability_for_tag(tag: &str) -> Option<Capability> {
    CAPABILITY_TAGS.read().get(tag).copied()
}

/// Register `tag` as an alias for `capability`. Returns the capability the
/// tag previously named.
pub fn register_capability_tag(tag: &str, capability: Capability) -> Option<Capability> {
    let previous = CAPABILITY_TAGS.write().insert(tag.into(), capability);
    tracing::debug!(tag, ?capability, "registered capability tag");
    previous
}

/// Key of a property lookup on a state object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyKey<'a> {
    /// A dotted path pattern.
    Path(&'a str),
    /// A capability tag such as `$getAll`.
    Tag(&'a str),
}

impl PropertyKey<'_> {
    /// Whether the key is something a state object answers: a well formed
    /// path or a registered tag.
    pub fn is_known(&self) -> bool {
        match self {
            PropertyKey::Path(pattern) => resolve_path(pattern).is_ok(),
            PropertyKey::Tag(tag) => capability_for_tag(tag).is_some(),
        }
    }
}

/// Result of a property lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    /// The value at a path.
    Value(Value),
    /// The capability a tag names.
    Capability(Capability),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tags_resolve() {
        for capability in BUILTIN {
            assert_eq!(capability_for_tag(capability.tag()), Some(capability));
        }
        assert_eq!(capability_for_tag("$nope"), None);
    }

    #[test]
    fn aliases_can_be_registered() {
        assert_eq!(register_capability_tag("@all", Capability::GetAll), None);
        assert!(PropertyKey::Tag("@all").is_known());
        assert_eq!(
            register_capability_tag("@all", Capability::GetAll),
            Some(Capability::GetAll)
        );
    }

    #[test]
    fn path_keys_are_validated() {
        assert!(PropertyKey::Path("items.*.name").is_known());
        assert!(!PropertyKey::Path("constructor").is_known());
        assert!(!PropertyKey::Path("a..b").is_known());
    }
}
