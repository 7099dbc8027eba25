//! Group definition for the inventory system.
//!
//! A `Group` is a named set of hosts with shared variables and parent/child
//! relationships. The relationships form a DAG rooted at `all`.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Name of the implicit root group
pub const ALL: &str = "all";

/// Name of the implicit group for hosts with no explicit group
pub const UNGROUPED: &str = "ungrouped";

/// A group of hosts in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Host names belonging directly to this group
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: IndexSet<String>,

    /// Parent group names (computed from children relationships)
    #[serde(skip)]
    pub parents: IndexSet<String>,

    /// Group-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Longest distance from `all` (computed at load)
    #[serde(skip)]
    pub depth: usize,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
            vars: IndexMap::new(),
            depth: 0,
        }
    }

    /// Whether this is one of the implicit groups
    pub fn is_implicit(&self) -> bool {
        self.name == ALL || self.name == UNGROUPED
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// Merge variables into this group (incoming values win)
    pub fn merge_vars(&mut self, vars: &IndexMap<String, serde_yaml::Value>) {
        for (key, value) in vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Check if a host belongs directly to this group
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }
}

/// The groups a host belongs to, transitively, ordered from the farthest
/// ancestor (`all`) to the nearest.
///
/// Variables applied in this order let nearer groups override farther ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupHierarchy {
    groups: Vec<(String, usize)>,
}

impl GroupHierarchy {
    /// Build a hierarchy from (group, depth) pairs. Sorted by depth, then
    /// by name so that siblings at the same depth have a stable order.
    pub fn from_depths(mut groups: Vec<(String, usize)>) -> Self {
        groups.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        groups.dedup_by(|a, b| a.0 == b.0);
        Self { groups }
    }

    /// Group names, farthest ancestor first
    pub fn farthest_first(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    /// Group names with their depth, farthest ancestor first
    pub fn with_depths(&self) -> impl Iterator<Item = (&str, usize)> {
        self.groups.iter().map(|(name, depth)| (name.as_str(), *depth))
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.iter().any(|(name, _)| name == group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_ordering() {
        let hierarchy = GroupHierarchy::from_depths(vec![
            ("webservers".into(), 2),
            ("all".into(), 0),
            ("prod".into(), 1),
            ("east".into(), 1),
        ]);

        let order: Vec<&str> = hierarchy.farthest_first().collect();
        assert_eq!(order, vec!["all", "east", "prod", "webservers"]);
    }

    #[test]
    fn test_implicit_groups() {
        assert!(Group::new(ALL).is_implicit());
        assert!(Group::new(UNGROUPED).is_implicit());
        assert!(!Group::new("db").is_implicit());
    }

    #[test]
    fn test_merge_vars_overrides() {
        let mut group = Group::new("web");
        group.set_var("port", serde_yaml::Value::from(80));

        let mut incoming = IndexMap::new();
        incoming.insert("port".to_string(), serde_yaml::Value::from(8080));
        group.merge_vars(&incoming);

        assert_eq!(group.vars["port"], serde_yaml::Value::from(8080));
    }
}
