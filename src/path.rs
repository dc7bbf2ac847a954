//! Structured path descriptors.
//!
//! A path is a dotted address into the state object, e.g. `items.*.name`. A
//! `*` segment means "one element of the list at this point" and is resolved
//! through a [`ListIndex`](crate::ListIndex).
//!
//! Descriptors are interned for the lifetime of the process: resolving the
//! same pattern twice yields the same `&'static PathInfo`, so descriptors can
//! be compared and hashed by identity. Every ancestor and wildcard boundary is
//! interned while a descriptor is built, which keeps ancestor queries O(1).
//!
//! The intern table is never evicted. An application's path vocabulary is
//! bounded by its templates, so the table stays small.

use crate::error::{Result, StateError};
use crate::hash::{FastHashBuilder, FastIndexSet};
use papaya::HashMap as PapayaHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Segment marking list iteration.
pub const WILDCARD: &str = "*";

/// Identifiers that can never be used as a whole pattern.
const RESERVED: &[&str] = &[
    "constructor",
    "prototype",
    "__proto__",
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "undefined",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Process-wide intern table: pattern -> descriptor.
static PATH_INFOS: LazyLock<PapayaHashMap<Box<str>, &'static PathInfo, FastHashBuilder>> =
    LazyLock::new(|| PapayaHashMap::with_hasher(FastHashBuilder));

static NEXT_PATH_ID: AtomicU32 = AtomicU32::new(0);

/// Dense numeric id of an interned path, used in composite cache keys.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct PathId(u32);

impl PathId {
    /// The raw id.
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Interned descriptor of a dotted path.
///
/// Ancestor lists run shortest to longest. String lists include the path
/// itself where applicable; descriptor lists are exposed through methods
/// because a descriptor cannot store a reference to itself.
pub struct PathInfo {
    id: PathId,
    pattern: String,
    segments: Vec<String>,
    ancestor_paths: Vec<String>,
    wildcard_paths: Vec<String>,
    wildcard_parent_paths: Vec<String>,
    parent: Option<&'static PathInfo>,
    /// Strict ancestors, shortest first.
    ancestors: Vec<&'static PathInfo>,
    /// Strict ancestors whose last segment is `*`.
    wildcard_ancestors: Vec<&'static PathInfo>,
    /// The prefix in front of every wildcard, including one ending at `self`.
    wildcard_parents: Vec<&'static PathInfo>,
}

/// Resolve a pattern into its interned descriptor.
pub fn resolve_path(pattern: &str) -> Result<&'static PathInfo> {
    if let Some(info) = PATH_INFOS.pin().get(pattern) {
        return Ok(*info);
    }
    validate(pattern)?;
    let info = build(pattern)?;
    Ok(*PATH_INFOS.pin().get_or_insert(pattern.into(), info))
}

fn validate(pattern: &str) -> Result<()> {
    let invalid = |reason| StateError::InvalidPath {
        pattern: pattern.to_owned(),
        reason,
    };
    if pattern.is_empty() {
        return Err(invalid("empty path"));
    }
    if RESERVED.contains(&pattern) {
        return Err(invalid("reserved identifier"));
    }
    if pattern.split('.').any(str::is_empty) {
        return Err(invalid("empty segment"));
    }
    if pattern == WILDCARD || pattern.starts_with("*.") {
        return Err(invalid("wildcard at the root"));
    }
    Ok(())
}

fn build(pattern: &str) -> Result<&'static PathInfo> {
    let (parent, last) = match pattern.rsplit_once('.') {
        Some((head, last)) => (Some(resolve_path(head)?), last),
        None => (None, pattern),
    };
    let is_wildcard = last == WILDCARD;

    let mut segments = Vec::new();
    let mut ancestor_paths = Vec::new();
    let mut wildcard_paths = Vec::new();
    let mut wildcard_parent_paths = Vec::new();
    let mut ancestors = Vec::new();
    let mut wildcard_ancestors = Vec::new();
    let mut wildcard_parents = Vec::new();

    if let Some(parent) = parent {
        segments.extend(parent.segments.iter().cloned());
        ancestor_paths.extend(parent.ancestor_paths.iter().cloned());
        wildcard_paths.extend(parent.wildcard_paths.iter().cloned());
        wildcard_parent_paths.extend(parent.wildcard_parent_paths.iter().cloned());
        ancestors.extend(parent.ancestors.iter().copied());
        ancestors.push(parent);
        wildcard_ancestors.extend(parent.wildcard_ancestors.iter().copied());
        if parent.is_wildcard() {
            wildcard_ancestors.push(parent);
        }
        wildcard_parents.extend(parent.wildcard_parents.iter().copied());
        if is_wildcard {
            wildcard_parents.push(parent);
            wildcard_parent_paths.push(parent.pattern.clone());
        }
    }
    segments.push(last.to_owned());
    ancestor_paths.push(pattern.to_owned());
    if is_wildcard {
        wildcard_paths.push(pattern.to_owned());
    }

    let id = PathId(NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed));
    tracing::trace!(pattern, id = id.0, "interned path");

    Ok(Box::leak(Box::new(PathInfo {
        id,
        pattern: pattern.to_owned(),
        segments,
        ancestor_paths,
        wildcard_paths,
        wildcard_parent_paths,
        parent,
        ancestors,
        wildcard_ancestors,
        wildcard_parents,
    })))
}

impl PathInfo {
    /// Dense id of the interned path.
    pub fn id(&self) -> PathId {
        self.id
    }

    /// The dotted pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Segments, `*` included.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment.
    pub fn last_segment(&self) -> &str {
        // A descriptor always has at least one segment.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Whether the last segment is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.last_segment() == WILDCARD
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Number of `*` segments.
    pub fn wildcard_count(&self) -> usize {
        self.wildcard_paths.len()
    }

    /// Every cumulative prefix, ending with the path itself.
    pub fn ancestor_paths(&self) -> &[String] {
        &self.ancestor_paths
    }

    /// Descriptors parallel to [`ancestor_paths`](Self::ancestor_paths).
    pub fn ancestor_infos(&'static self) -> impl Iterator<Item = &'static PathInfo> {
        self.ancestors.iter().copied().chain(std::iter::once(self))
    }

    /// Prefixes that end exactly at a `*` segment.
    pub fn wildcard_paths(&self) -> &[String] {
        &self.wildcard_paths
    }

    /// Descriptors parallel to [`wildcard_paths`](Self::wildcard_paths).
    pub fn wildcard_infos(&'static self) -> impl Iterator<Item = &'static PathInfo> {
        let own = self.is_wildcard().then_some(self);
        self.wildcard_ancestors.iter().copied().chain(own)
    }

    /// The prefix immediately in front of each wildcard.
    pub fn wildcard_parent_paths(&self) -> &[String] {
        &self.wildcard_parent_paths
    }

    /// Descriptors parallel to [`wildcard_parent_paths`](Self::wildcard_parent_paths).
    pub fn wildcard_parent_infos(&self) -> &[&'static PathInfo] {
        &self.wildcard_parents
    }

    /// Innermost prefix ending at a `*`.
    pub fn last_wildcard_path(&self) -> Option<&str> {
        self.wildcard_paths.last().map(String::as_str)
    }

    /// Descriptor of [`last_wildcard_path`](Self::last_wildcard_path).
    pub fn last_wildcard_info(&'static self) -> Option<&'static PathInfo> {
        if self.is_wildcard() {
            Some(self)
        } else {
            self.wildcard_ancestors.last().copied()
        }
    }

    /// Pattern without its last segment.
    pub fn parent_path(&self) -> Option<&str> {
        self.parent.map(PathInfo::pattern)
    }

    /// Descriptor of [`parent_path`](Self::parent_path).
    pub fn parent_info(&self) -> Option<&'static PathInfo> {
        self.parent
    }

    /// Whether `other` is this path or one of its ancestors.
    pub fn has_ancestor(&self, other: &PathInfo) -> bool {
        match other.depth().cmp(&self.depth()) {
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => self.id == other.id,
            std::cmp::Ordering::Less => self.ancestors[other.depth() - 1].id == other.id,
        }
    }

    /// Whether any ancestor (or the path itself) is in `paths`.
    ///
    /// Walks whichever side is smaller.
    pub fn intersects(&self, paths: &PathSet) -> bool {
        if self.depth() <= paths.len() {
            self.ancestors.iter().any(|info| paths.contains(info)) || paths.contains(self)
        } else {
            paths.iter().any(|info| self.has_ancestor(info))
        }
    }

    /// Position of `wildcard` among this path's wildcard prefixes.
    pub fn wildcard_level_of(&self, wildcard: &PathInfo) -> Option<usize> {
        self.wildcard_paths
            .iter()
            .position(|path| path.as_str() == wildcard.pattern())
    }
}

impl PartialEq for PathInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PathInfo {}

impl Hash for PathInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathInfo").field(&self.pattern).finish()
    }
}

impl fmt::Display for PathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// A set of interned paths, e.g. the paths a collaborator knows about.
#[derive(Clone, Default, Debug)]
pub struct PathSet(FastIndexSet<&'static PathInfo>);

impl PathSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from patterns, failing on the first invalid one.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for pattern in patterns {
            set.insert(resolve_path(pattern.as_ref())?);
        }
        Ok(set)
    }

    /// Add `info`. Returns `false` if it was already present.
    pub fn insert(&mut self, info: &'static PathInfo) -> bool {
        self.0.insert(info)
    }

    /// Whether `info` is in the set.
    pub fn contains(&self, info: &PathInfo) -> bool {
        self.0.contains(info)
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Paths in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &'static PathInfo> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_pattern_yields_same_instance() {
        let a = resolve_path("items.*.name").unwrap();
        let b = resolve_path("items.*.name").unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn ancestors_are_cumulative_prefixes() {
        let info = resolve_path("items.*.tags.*").unwrap();
        assert_eq!(
            info.ancestor_paths(),
            ["items", "items.*", "items.*.tags", "items.*.tags.*"]
        );
        let infos: Vec<_> = info.ancestor_infos().map(PathInfo::pattern).collect();
        assert_eq!(infos, info.ancestor_paths());
        assert!(std::ptr::eq(
            info.ancestor_infos().next().unwrap(),
            resolve_path("items").unwrap()
        ));
    }

    #[test]
    fn wildcard_bookkeeping() {
        let info = resolve_path("items.*.tags.*.label").unwrap();
        assert_eq!(info.wildcard_count(), 2);
        assert_eq!(info.wildcard_paths(), ["items.*", "items.*.tags.*"]);
        assert_eq!(info.wildcard_parent_paths(), ["items", "items.*.tags"]);
        let parents: Vec<_> = info
            .wildcard_parent_infos()
            .iter()
            .map(|p| p.pattern())
            .collect();
        assert_eq!(parents, ["items", "items.*.tags"]);
        assert_eq!(info.last_wildcard_path(), Some("items.*.tags.*"));
        assert_eq!(
            info.last_wildcard_info().map(PathInfo::pattern),
            Some("items.*.tags.*")
        );
        assert_eq!(info.parent_path(), Some("items.*.tags.*"));
        assert_eq!(info.last_segment(), "label");

        let own = resolve_path("items.*").unwrap();
        assert!(own.is_wildcard());
        assert!(std::ptr::eq(own.last_wildcard_info().unwrap(), own));
        assert_eq!(own.wildcard_infos().count(), 1);
    }

    #[test]
    fn plain_path_has_no_wildcards() {
        let info = resolve_path("user.profile.name").unwrap();
        assert_eq!(info.wildcard_count(), 0);
        assert!(info.last_wildcard_info().is_none());
        assert!(info.wildcard_parent_infos().is_empty());
        assert_eq!(info.parent_info().map(PathInfo::pattern), Some("user.profile"));
        assert!(resolve_path("user").unwrap().parent_info().is_none());
    }

    #[test]
    fn rejects_reserved_and_malformed_patterns() {
        for pattern in ["constructor", "prototype", "class", "", "a..b", "a.", "*", "*.a"] {
            assert!(
                matches!(resolve_path(pattern), Err(StateError::InvalidPath { .. })),
                "{pattern:?} should be rejected"
            );
        }
        // Reserved words are only rejected as whole patterns.
        assert!(resolve_path("config.default").is_ok());
    }

    #[test]
    fn ancestor_membership() {
        let info = resolve_path("a.b.c").unwrap();
        assert!(info.has_ancestor(resolve_path("a").unwrap()));
        assert!(info.has_ancestor(resolve_path("a.b").unwrap()));
        assert!(info.has_ancestor(info));
        assert!(!info.has_ancestor(resolve_path("a.x").unwrap()));
        assert!(!info.has_ancestor(resolve_path("a.b.c.d").unwrap()));
    }

    #[test]
    fn intersects_walks_either_side() {
        let info = resolve_path("list.*.value").unwrap();
        let small = PathSet::from_patterns(["list"]).unwrap();
        assert!(info.intersects(&small));

        let large = PathSet::from_patterns(["x", "y", "z", "w", "list.*"]).unwrap();
        assert!(info.intersects(&large));

        let unrelated = PathSet::from_patterns(["other", "list.*.other"]).unwrap();
        assert!(!info.intersects(&unrelated));
        assert!(!info.intersects(&PathSet::new()));
    }

    proptest! {
        #[test]
        fn interning_is_stable(segments in prop::collection::vec("[a-z]{1,6}", 1..5)) {
            let pattern = segments.join(".");
            prop_assume!(!RESERVED.contains(&pattern.as_str()));
            let first = resolve_path(&pattern).unwrap();
            let second = resolve_path(&pattern).unwrap();
            prop_assert!(std::ptr::eq(first, second));
        }

        #[test]
        fn ancestor_paths_are_dot_prefixes(
            segments in prop::collection::vec(prop_oneof!["[a-z]{1,6}", Just("*".to_owned())], 1..6)
        ) {
            prop_assume!(segments[0] != WILDCARD);
            let pattern = segments.join(".");
            prop_assume!(!RESERVED.contains(&pattern.as_str()));
            let info = resolve_path(&pattern).unwrap();

            let expected: Vec<String> = (1..=segments.len())
                .map(|n| segments[..n].join("."))
                .collect();
            prop_assert_eq!(info.ancestor_paths(), expected.as_slice());
            prop_assert_eq!(info.ancestor_paths().last().map(String::as_str), Some(pattern.as_str()));
            prop_assert_eq!(
                info.wildcard_count(),
                segments.iter().filter(|s| s.as_str() == WILDCARD).count()
            );
        }
    }
}
