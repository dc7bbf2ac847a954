//! Dynamic dependency edges between paths.
//!
//! An edge `dependency -> dependent` is recorded the first time `dependency`
//! is read while `dependent` is being evaluated (a getter reading a sibling
//! path, for example). The scheduler walks these edges to find every path a
//! write can affect.

use crate::hash::{FastHashSet, FastIndexMap, FastIndexSet};
use crate::path::PathInfo;
use std::collections::VecDeque;
use std::rc::Rc;

/// Callback invoked for every newly recorded edge: `(dependency, dependent)`.
pub type EdgeListener = Rc<dyn Fn(&'static PathInfo, &'static PathInfo)>;

/// Edges from the paths a getter read to the getter's path.
#[derive(Default)]
pub struct DependencyGraph {
    dependents: FastIndexMap<&'static PathInfo, FastIndexSet<&'static PathInfo>>,
    listeners: Vec<EdgeListener>,
    edges: usize,
}

impl DependencyGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` reads `dependency`. Returns `false` if the
    /// edge was already known. Self edges are ignored.
    pub fn add_edge(&mut self, dependency: &'static PathInfo, dependent: &'static PathInfo) -> bool {
        if dependency == dependent {
            return false;
        }
        let inserted = self
            .dependents
            .entry(dependency)
            .or_default()
            .insert(dependent);
        if inserted {
            self.edges += 1;
            tracing::trace!(
                dependency = dependency.pattern(),
                dependent = dependent.pattern(),
                "recorded dependency"
            );
        }
        inserted
    }

    /// Direct dependents of `dependency`, in discovery order.
    pub fn dependents_of(&self, dependency: &PathInfo) -> impl Iterator<Item = &'static PathInfo> + '_ {
        self.dependents
            .get(dependency)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// `changed` plus every path that transitively depends on it, on one of
    /// its ancestors or on one of its descendants.
    ///
    /// A getter that reads `user` must be revisited when `user.name` is
    /// written, and one that reads `user.name` when `user` is replaced, so
    /// edges hanging off both sides are followed.
    pub fn affected_paths(&self, changed: &'static PathInfo) -> FastIndexSet<&'static PathInfo> {
        let mut affected = FastIndexSet::default();
        affected.insert(changed);
        let mut seen = FastHashSet::default();
        let mut queue = VecDeque::from([changed]);
        while let Some(path) = queue.pop_front() {
            if !seen.insert(path) {
                continue;
            }
            // Siblings are unaffected: `user.email` readers skip `user.name`.
            let read: Vec<&'static PathInfo> = self
                .dependents
                .keys()
                .copied()
                .filter(|dependency| dependency.has_ancestor(path) || path.has_ancestor(dependency))
                .collect();
            for dependency in read {
                for dependent in self.dependents_of(dependency) {
                    if affected.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        affected
    }

    /// Call `listener` for every edge recorded from now on.
    pub fn subscribe(&mut self, listener: EdgeListener) {
        self.listeners.push(listener);
    }

    /// Listeners to call once the graph is no longer borrowed.
    pub fn listeners(&self) -> Vec<EdgeListener> {
        self.listeners.clone()
    }

    /// Number of distinct edges.
    pub fn len(&self) -> usize {
        self.edges
    }

    /// Whether no edge was recorded.
    pub fn is_empty(&self) -> bool {
        self.edges == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::resolve_path;

    fn path(pattern: &str) -> &'static PathInfo {
        resolve_path(pattern).unwrap()
    }

    #[test]
    fn edges_are_deduplicated() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_edge(path("dep.count"), path("dep.label")));
        assert!(!graph.add_edge(path("dep.count"), path("dep.label")));
        assert!(!graph.add_edge(path("dep.count"), path("dep.count")));
        assert_eq!(graph.len(), 1);
        assert_eq!(
            graph.dependents_of(path("dep.count")).collect::<Vec<_>>(),
            vec![path("dep.label")]
        );
    }

    #[test]
    fn affected_paths_are_transitive() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(path("chain.a"), path("chain.b"));
        graph.add_edge(path("chain.b"), path("chain.c"));
        graph.add_edge(path("chain.c"), path("chain.a"));
        graph.add_edge(path("other.x"), path("other.y"));

        let affected = graph.affected_paths(path("chain.a"));
        let patterns: Vec<&str> = affected.iter().map(|info| info.pattern()).collect();
        assert_eq!(patterns, ["chain.a", "chain.b", "chain.c"]);
    }

    #[test]
    fn edges_on_ancestors_are_followed() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(path("profile"), path("greeting"));
        let affected = graph.affected_paths(path("profile.name"));
        assert!(affected.contains(path("greeting")));
    }

    #[test]
    fn edges_on_descendants_are_followed() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(path("account.name"), path("account_label"));
        graph.add_edge(path("account_label"), path("account_title"));
        graph.add_edge(path("accounts.name"), path("unrelated"));

        let affected = graph.affected_paths(path("account"));
        let patterns: Vec<&str> = affected.iter().map(|info| info.pattern()).collect();
        assert_eq!(patterns, ["account", "account_label", "account_title"]);
    }

    #[test]
    fn sibling_edges_are_not_followed() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(path("contact.email"), path("mail_link"));
        let affected = graph.affected_paths(path("contact.phone"));
        assert!(!affected.contains(path("mail_link")));
    }
}
