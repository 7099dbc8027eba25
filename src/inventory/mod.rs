//! Inventory management.
//!
//! This module builds the host/group graph a run operates on:
//! - Loading from YAML, INI, and JSON formats, or an inventory directory
//!   with `group_vars/` and `host_vars/`
//! - Dynamic sources (executable scripts or any [`DynamicInventory`])
//! - Group hierarchy validation (the graph must be acyclic)
//! - Host pattern matching for play selectors and `--limit`

pub mod group;
pub mod host;

pub use group::{Group, GroupHierarchy, ALL, UNGROUPED};
pub use host::{ConnectionParams, ConnectionType, Host, HostParseError};

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid INI inventory at line {line}: {message}")]
    Ini { line: usize, message: String },

    #[error("host parse error: {0}")]
    HostParse(#[from] HostParseError),

    /// Cyclic group parentage, reported as the cycle path
    #[error("cyclic group hierarchy: {0}")]
    Cycle(String),

    /// Two definitions of a host disagree on connection attributes
    #[error("host '{host}' is defined twice with a different {attribute}")]
    DuplicateHost { host: String, attribute: String },

    /// A selector names a group or host that does not exist
    #[error("unknown group or host '{0}'")]
    UnknownGroup(String),

    #[error("invalid host pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("dynamic inventory '{source_name}' failed: {message}")]
    Dynamic { source_name: String, message: String },
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// An external collaborator producing inventory data in the JSON
/// dynamic-inventory schema:
///
/// ```json
/// { "_meta": { "hostvars": { "web1": { "ansible_host": "10.0.0.1" } } },
///   "webservers": { "hosts": ["web1"], "vars": {}, "children": [] } }
/// ```
pub trait DynamicInventory: Send + Sync {
    /// Name used in error messages
    fn name(&self) -> &str;

    /// Produce the inventory document
    fn list(&self) -> InventoryResult<serde_json::Value>;
}

/// Dynamic inventory backed by an executable invoked with `--list`
#[derive(Debug, Clone)]
pub struct ScriptInventory {
    path: PathBuf,
    name: String,
}

impl ScriptInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }
}

impl DynamicInventory for ScriptInventory {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> InventoryResult<serde_json::Value> {
        let output = Command::new(&self.path)
            .arg("--list")
            .output()
            .map_err(|e| InventoryError::Dynamic {
                source_name: self.name.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(InventoryError::Dynamic {
                source_name: self.name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Textual inventory formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryFormat {
    Yaml,
    Ini,
    Json,
}

/// One input to [`Inventory::resolve`]
#[derive(Clone)]
pub enum InventorySource {
    /// A file or an inventory directory
    Path(PathBuf),
    /// Inline inventory text
    Inline {
        format: InventoryFormat,
        content: String,
    },
    /// An external dynamic source
    Dynamic(Arc<dyn DynamicInventory>),
}

impl InventorySource {
    pub fn yaml(content: impl Into<String>) -> Self {
        Self::Inline {
            format: InventoryFormat::Yaml,
            content: content.into(),
        }
    }

    pub fn ini(content: impl Into<String>) -> Self {
        Self::Inline {
            format: InventoryFormat::Ini,
            content: content.into(),
        }
    }

    pub fn json(content: impl Into<String>) -> Self {
        Self::Inline {
            format: InventoryFormat::Json,
            content: content.into(),
        }
    }
}

impl fmt::Debug for InventorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventorySource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            InventorySource::Inline { format, .. } => {
                f.debug_struct("Inline").field("format", format).finish()
            }
            InventorySource::Dynamic(source) => f.debug_tuple("Dynamic").field(&source.name()).finish(),
        }
    }
}

/// The main inventory structure holding all hosts and groups.
///
/// Read-only once [`Inventory::resolve`] returns.
#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with the implicit groups
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert(ALL.to_string(), Group::new(ALL));
        groups.insert(UNGROUPED.to_string(), Group::new(UNGROUPED));
        Self {
            hosts: IndexMap::new(),
            groups,
        }
    }

    /// Build an inventory from one or more sources, then validate the group
    /// graph. Later sources merge into earlier ones.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub fn resolve(sources: &[InventorySource]) -> InventoryResult<Self> {
        let mut inventory = Self::new();

        for source in sources {
            match source {
                InventorySource::Path(path) => inventory.load_path(path)?,
                InventorySource::Inline { format, content } => match format {
                    InventoryFormat::Yaml => inventory.parse_yaml(content)?,
                    InventoryFormat::Ini => inventory.parse_ini(content)?,
                    InventoryFormat::Json => inventory.parse_json(content)?,
                },
                InventorySource::Dynamic(dynamic) => {
                    let document = dynamic.list()?;
                    inventory.apply_json(&document)?;
                }
            }
        }

        inventory.finalize()?;
        debug!(
            hosts = inventory.hosts.len(),
            groups = inventory.groups.len(),
            "Inventory resolved"
        );
        Ok(inventory)
    }

    /// Load inventory from a single file or directory
    pub fn load(path: impl AsRef<Path>) -> InventoryResult<Self> {
        Self::resolve(&[InventorySource::Path(path.as_ref().to_path_buf())])
    }

    fn load_path(&mut self, path: &Path) -> InventoryResult<()> {
        if path.is_dir() {
            self.load_directory(path)
        } else {
            self.load_file(path)
        }
    }

    /// Load a single inventory file
    fn load_file(&mut self, path: &Path) -> InventoryResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = path.metadata() {
                if metadata.permissions().mode() & 0o111 != 0 {
                    let document = ScriptInventory::new(path).list()?;
                    return self.apply_json(&document);
                }
            }
        }

        let content = read_file(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yml" | "yaml" => self.parse_yaml(&content),
            "json" => self.parse_json(&content),
            "ini" => self.parse_ini(&content),
            _ => {
                let trimmed = content.trim_start();
                if trimmed.starts_with('{') {
                    self.parse_json(&content)
                } else if content.lines().any(|l| l.trim_start().starts_with('[')) {
                    self.parse_ini(&content)
                } else {
                    self.parse_yaml(&content)
                }
            }
        }
    }

    /// Load an inventory directory: a hosts file plus `group_vars/` and
    /// `host_vars/`
    fn load_directory(&mut self, path: &Path) -> InventoryResult<()> {
        for name in ["hosts", "hosts.yml", "hosts.yaml", "hosts.ini", "hosts.json"] {
            let hosts_file = path.join(name);
            if hosts_file.is_file() {
                self.load_file(&hosts_file)?;
                break;
            }
        }

        let group_vars = path.join("group_vars");
        if group_vars.is_dir() {
            for (name, vars) in load_vars_dir(&group_vars)? {
                self.group_entry(&name).merge_vars(&vars);
            }
        }

        let host_vars = path.join("host_vars");
        if host_vars.is_dir() {
            for (name, vars) in load_vars_dir(&host_vars)? {
                if let Some(host) = self.hosts.get_mut(&name) {
                    for (key, value) in vars {
                        host.apply_var(&key, value);
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse YAML inventory format
    fn parse_yaml(&mut self, content: &str) -> InventoryResult<()> {
        let data: serde_yaml::Value = serde_yaml::from_str(content)?;
        let serde_yaml::Value::Mapping(map) = data else {
            return Ok(());
        };

        for (key, value) in &map {
            if let serde_yaml::Value::String(group_name) = key {
                self.parse_group(group_name, value)?;
            }
        }
        Ok(())
    }

    /// Parse one group definition: `{hosts, vars, children}`. `hosts` and
    /// `children` may be mappings (with nested definitions) or lists of names.
    fn parse_group(&mut self, name: &str, value: &serde_yaml::Value) -> InventoryResult<()> {
        self.group_entry(name);

        let serde_yaml::Value::Mapping(map) = value else {
            return Ok(());
        };

        if let Some(hosts) = map.get("hosts") {
            for (host_name, host_value) in entries(hosts) {
                let mut host = Host::new(&host_name);
                if let Some(serde_yaml::Value::Mapping(host_vars)) = host_value {
                    for (var_key, var_value) in host_vars {
                        if let serde_yaml::Value::String(key) = var_key {
                            host.apply_var(key, var_value.clone());
                        }
                    }
                }
                self.insert_host(host, name)?;
            }
        }

        if let Some(serde_yaml::Value::Mapping(vars)) = map.get("vars") {
            let group = self.group_entry(name);
            for (var_key, var_value) in vars {
                if let serde_yaml::Value::String(key) = var_key {
                    group.set_var(key.clone(), var_value.clone());
                }
            }
        }

        if let Some(children) = map.get("children") {
            for (child_name, child_value) in entries(children) {
                self.group_entry(name).add_child(&child_name);
                match child_value {
                    Some(definition) => self.parse_group(&child_name, definition)?,
                    None => {
                        self.group_entry(&child_name);
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse JSON inventory format (dynamic-inventory schema)
    fn parse_json(&mut self, content: &str) -> InventoryResult<()> {
        let document: serde_json::Value = serde_json::from_str(content)?;
        self.apply_json(&document)
    }

    fn apply_json(&mut self, document: &serde_json::Value) -> InventoryResult<()> {
        let serde_json::Value::Object(map) = document else {
            return Ok(());
        };

        for (name, value) in map {
            if name == "_meta" {
                continue;
            }
            let value: serde_yaml::Value = serde_yaml::to_value(value)?;
            match value {
                // Legacy form: a group mapped directly to a list of hosts
                serde_yaml::Value::Sequence(_) => {
                    let mut wrapped = serde_yaml::Mapping::new();
                    wrapped.insert("hosts".into(), value);
                    self.parse_group(name, &serde_yaml::Value::Mapping(wrapped))?;
                }
                other => self.parse_group(name, &other)?,
            }
        }

        if let Some(hostvars) = document.pointer("/_meta/hostvars").and_then(|v| v.as_object()) {
            for (host_name, vars) in hostvars {
                let Some(vars) = vars.as_object() else {
                    continue;
                };
                let host = self
                    .hosts
                    .entry(host_name.clone())
                    .or_insert_with(|| Host::new(host_name));
                for (key, value) in vars {
                    host.apply_var(key, serde_yaml::to_value(value)?);
                }
            }
        }

        Ok(())
    }

    /// Parse INI inventory format
    fn parse_ini(&mut self, content: &str) -> InventoryResult<()> {
        enum Section {
            Hosts,
            Vars,
            Children,
        }

        let mut current_group = UNGROUPED.to_string();
        let mut section = Section::Hosts;

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                let header = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .ok_or_else(|| InventoryError::Ini {
                        line: index + 1,
                        message: format!("unterminated section header '{}'", line),
                    })?;

                (current_group, section) = match header.rsplit_once(':') {
                    Some((group, "vars")) => (group.to_string(), Section::Vars),
                    Some((group, "children")) => (group.to_string(), Section::Children),
                    Some((_, suffix)) => {
                        return Err(InventoryError::Ini {
                            line: index + 1,
                            message: format!("unknown section suffix ':{}'", suffix),
                        })
                    }
                    None => (header.to_string(), Section::Hosts),
                };
                self.group_entry(&current_group);
                continue;
            }

            match section {
                Section::Vars => {
                    let (key, value) = line.split_once('=').ok_or_else(|| InventoryError::Ini {
                        line: index + 1,
                        message: format!("expected key=value, found '{}'", line),
                    })?;
                    self.group_entry(&current_group)
                        .set_var(key.trim(), parse_scalar(value.trim()));
                }
                Section::Children => {
                    self.group_entry(&current_group).add_child(line);
                    self.group_entry(line);
                }
                Section::Hosts => {
                    let host = Host::parse(line)?;
                    self.insert_host(host, &current_group)?;
                }
            }
        }

        Ok(())
    }

    fn group_entry(&mut self, name: &str) -> &mut Group {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name))
    }

    /// Insert a host into a group, merging with an existing definition
    fn insert_host(&mut self, mut host: Host, group: &str) -> InventoryResult<()> {
        if group != ALL {
            host.add_to_group(group);
        }
        self.group_entry(group).add_host(&host.name);

        match self.hosts.get_mut(&host.name) {
            Some(existing) => {
                existing
                    .merge(&host)
                    .map_err(|attribute| InventoryError::DuplicateHost {
                        host: host.name.clone(),
                        attribute: attribute.to_string(),
                    })
            }
            None => {
                self.hosts.insert(host.name.clone(), host);
                Ok(())
            }
        }
    }

    /// Add a host programmatically to the given groups
    pub fn add_host(&mut self, host: Host) -> InventoryResult<()> {
        let groups: Vec<String> = host.groups.iter().cloned().collect();
        if groups.is_empty() {
            return self.insert_host(host, ALL);
        }
        for group in groups {
            self.insert_host(host.clone(), &group)?;
        }
        Ok(())
    }

    /// Link implicit groups, compute parents, reject cycles and compute
    /// group depths.
    fn finalize(&mut self) -> InventoryResult<()> {
        // Hosts without an explicit group belong to `ungrouped`
        for host in self.hosts.values_mut() {
            host.groups.retain(|g| g != ALL);
            if host.groups.is_empty() {
                host.add_to_group(UNGROUPED);
            }
        }
        let ungrouped: Vec<String> = self
            .hosts
            .values()
            .filter(|h| h.in_group(UNGROUPED))
            .map(|h| h.name.clone())
            .collect();
        {
            let group = self.group_entry(UNGROUPED);
            for name in ungrouped {
                group.add_host(name);
            }
        }
        if let Some(all) = self.groups.get_mut(ALL) {
            all.hosts.clear();
        }

        for group in self.groups.values_mut() {
            group.parents.clear();
        }
        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(move |c| (g.name.clone(), c.clone())))
            .collect();
        for (parent, child) in &edges {
            self.group_entry(child).add_parent(parent.clone());
        }

        // Every group other than `all` without a parent hangs off `all`
        let orphans: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.name != ALL && g.parents.is_empty())
            .map(|g| g.name.clone())
            .collect();
        for orphan in orphans {
            self.group_entry(ALL).add_child(orphan.clone());
            self.group_entry(&orphan).add_parent(ALL);
        }

        self.check_acyclic()?;
        self.compute_depths();
        Ok(())
    }

    fn check_acyclic(&self) -> InventoryResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            inventory: &'a Inventory,
            name: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> InventoryResult<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|g| *g == name).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.push(name);
                    return Err(InventoryError::Cycle(cycle.join(" -> ")));
                }
                None => {}
            }

            marks.insert(name, Mark::Visiting);
            path.push(name);
            if let Some(group) = inventory.groups.get(name) {
                for child in &group.children {
                    visit(inventory, child, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.groups.keys() {
            let mut path = Vec::new();
            visit(self, name, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Depth = longest path from `all`. Requires an acyclic graph.
    fn compute_depths(&mut self) {
        fn depth_of(
            groups: &IndexMap<String, Group>,
            name: &str,
            memo: &mut HashMap<String, usize>,
        ) -> usize {
            if let Some(depth) = memo.get(name) {
                return *depth;
            }
            let depth = groups
                .get(name)
                .map(|g| {
                    g.parents
                        .iter()
                        .map(|p| depth_of(groups, p, memo) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            memo.insert(name.to_string(), depth);
            depth
        }

        let mut memo = HashMap::new();
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in names {
            let depth = depth_of(&self.groups, &name, &mut memo);
            if let Some(group) = self.groups.get_mut(&name) {
                group.depth = depth;
            }
        }
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All hosts in inventory order
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All groups in inventory order
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Get hosts matching a pattern, in inventory order.
    ///
    /// Supported patterns:
    /// - `all` or `*` - all hosts
    /// - `name` - a group (including hosts of child groups) or a host
    /// - `web*`, `db?` - glob over host and group names
    /// - `~web\d+` - regex over host and group names
    /// - `a:b` or `a,b` - union
    /// - `a:&b` - intersection
    /// - `a:!b` - exclusion
    ///
    /// An exact name that is neither a group nor a host is an
    /// [`InventoryError::UnknownGroup`]; glob and regex terms may match
    /// nothing.
    pub fn hosts_for_pattern(&self, pattern: &str) -> InventoryResult<Vec<&Host>> {
        let mut union: IndexSet<&str> = IndexSet::new();
        let mut intersections: Vec<HashSet<&str>> = Vec::new();
        let mut exclusions: HashSet<&str> = HashSet::new();

        for term in split_pattern(pattern) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(rest) = term.strip_prefix('&') {
                intersections.push(self.match_term(rest)?.into_iter().collect());
            } else if let Some(rest) = term.strip_prefix('!') {
                exclusions.extend(self.match_term(rest)?);
            } else {
                union.extend(self.match_term(term)?);
            }
        }

        Ok(self
            .hosts
            .values()
            .filter(|h| {
                let name = h.name.as_str();
                union.contains(name)
                    && intersections.iter().all(|set| set.contains(name))
                    && !exclusions.contains(name)
            })
            .collect())
    }

    fn match_term<'a>(&'a self, term: &str) -> InventoryResult<Vec<&'a str>> {
        if term == ALL || term == "*" {
            return Ok(self.hosts.keys().map(String::as_str).collect());
        }

        let matcher = if let Some(expr) = term.strip_prefix('~') {
            Some(Regex::new(expr).map_err(|e| InventoryError::InvalidPattern {
                pattern: term.to_string(),
                message: e.to_string(),
            })?)
        } else if term.contains(['*', '?', '[']) {
            Some(
                Regex::new(&glob_to_regex(term)).map_err(|e| InventoryError::InvalidPattern {
                    pattern: term.to_string(),
                    message: e.to_string(),
                })?,
            )
        } else {
            None
        };

        match matcher {
            Some(regex) => {
                let mut matched: IndexSet<&str> = self
                    .hosts
                    .keys()
                    .filter(|name| regex.is_match(name))
                    .map(String::as_str)
                    .collect();
                for group in self.groups.values().filter(|g| regex.is_match(&g.name)) {
                    matched.extend(self.hosts_in_group(group));
                }
                Ok(matched.into_iter().collect())
            }
            None => {
                if let Some(group) = self.groups.get(term) {
                    Ok(self.hosts_in_group(group).into_iter().collect())
                } else if let Some((name, _)) = self.hosts.get_key_value(term) {
                    Ok(vec![name.as_str()])
                } else {
                    Err(InventoryError::UnknownGroup(term.to_string()))
                }
            }
        }
    }

    /// All hosts in a group, including hosts of descendant groups
    fn hosts_in_group<'a>(&'a self, group: &'a Group) -> IndexSet<&'a str> {
        if group.name == ALL {
            return self.hosts.keys().map(String::as_str).collect();
        }

        let mut hosts: IndexSet<&str> = group.hosts.iter().map(String::as_str).collect();
        for child in &group.children {
            if let Some(child) = self.groups.get(child) {
                hosts.extend(self.hosts_in_group(child));
            }
        }
        hosts
    }

    /// The transitive group closure of a host, farthest ancestor first
    pub fn group_closure(&self, host: &Host) -> GroupHierarchy {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = host.groups.iter().map(String::as_str).collect();
        stack.push(ALL);
        let mut groups = Vec::new();

        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(group) = self.groups.get(name) {
                groups.push((group.name.clone(), group.depth));
                stack.extend(group.parents.iter().map(String::as_str));
            }
        }

        GroupHierarchy::from_depths(groups)
    }

    /// Sorted names of the non-implicit groups a host belongs to
    pub fn group_names(&self, host: &Host) -> Vec<String> {
        let mut names: Vec<String> = self
            .group_closure(host)
            .farthest_first()
            .filter(|g| *g != ALL && *g != UNGROUPED)
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Map of every group to the names of all hosts it contains
    pub fn groups_map(&self) -> IndexMap<String, Vec<String>> {
        self.groups
            .values()
            .map(|g| {
                let hosts = self
                    .hosts_in_group(g)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (g.name.clone(), hosts)
            })
            .collect()
    }
}

/// Iterate `hosts`/`children` entries given as a mapping or a list of names
fn entries(value: &serde_yaml::Value) -> Vec<(String, Option<&serde_yaml::Value>)> {
    match value {
        serde_yaml::Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let name = k.as_str()?.to_string();
                Some((name, if v.is_null() { None } else { Some(v) }))
            })
            .collect(),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str().map(|s| (s.to_string(), None)))
            .collect(),
        serde_yaml::Value::String(s) => vec![(s.clone(), None)],
        _ => Vec::new(),
    }
}

fn read_file(path: &Path) -> InventoryResult<String> {
    std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<dir>/<name>.yml` files and `<dir>/<name>/*.yml` directories into
/// (name, vars) pairs, sorted by name
fn load_vars_dir(
    dir: &Path,
) -> InventoryResult<Vec<(String, IndexMap<String, serde_yaml::Value>)>> {
    let io_err = |source| InventoryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let mut loaded = Vec::new();
    for path in entries {
        if path.is_file() {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let vars: Option<IndexMap<String, serde_yaml::Value>> =
                serde_yaml::from_str(&read_file(&path)?)?;
            loaded.push((name.to_string(), vars.unwrap_or_default()));
        } else if path.is_dir() {
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut merged = IndexMap::new();
            for (_, vars) in load_vars_dir(&path)? {
                merged.extend(vars);
            }
            loaded.push((name.to_string(), merged));
        }
    }
    Ok(loaded)
}

/// Split a pattern on `:` and `,` outside brackets
fn split_pattern(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut bracket_depth: usize = 0;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ':' | ',' if bracket_depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&pattern[start..]);
    parts
}

/// Convert a glob pattern to an anchored regex
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");

    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' | ']' => regex.push(ch),
            '(' | ')' | '{' | '}' | '.' | '+' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }

    regex.push('$');
    regex
}

/// Parse an inline scalar (INI values, `key=value` host vars)
pub(crate) fn parse_scalar(value: &str) -> serde_yaml::Value {
    let value = value.trim();

    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return serde_yaml::Value::String(value[1..value.len() - 1].to_string());
    }

    match value.to_lowercase().as_str() {
        "true" | "yes" => return serde_yaml::Value::Bool(true),
        "false" | "no" => return serde_yaml::Value::Bool(false),
        _ => {}
    }

    if let Ok(n) = value.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    if let Ok(n) = value.parse::<f64>() {
        return serde_yaml::Value::Number(n.into());
    }

    if value.starts_with('[') || value.starts_with('{') {
        if let Ok(parsed) = serde_yaml::from_str(value) {
            return parsed;
        }
    }

    serde_yaml::Value::String(value.to_string())
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Inventory ({} hosts, {} groups)",
            self.hosts.len(),
            self.groups.len()
        )?;

        for group in self.groups.values() {
            if group.hosts.is_empty() {
                continue;
            }
            writeln!(f, "  [{}]", group.name)?;
            for host_name in &group.hosts {
                if let Some(host) = self.hosts.get(host_name) {
                    writeln!(f, "    {}", host)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(hosts: Vec<&Host>) -> Vec<&str> {
        hosts.into_iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_empty_inventory() {
        let inventory = Inventory::resolve(&[]).unwrap();
        assert_eq!(inventory.host_count(), 0);
        assert!(inventory.get_group(ALL).is_some());
        assert!(inventory.get_group(UNGROUPED).is_some());
    }

    #[test]
    fn test_parse_ini() {
        let ini = r#"
lonely

[webservers]
web1 ansible_host=10.0.0.1
web2 ansible_host=10.0.0.2

[dbservers]
db1 ansible_port=5433

[webservers:vars]
http_port=80

[production:children]
webservers
dbservers
"#;
        let inventory = Inventory::resolve(&[InventorySource::ini(ini)]).unwrap();

        assert_eq!(inventory.host_count(), 4);
        assert!(inventory.get_group(UNGROUPED).unwrap().has_host("lonely"));
        assert_eq!(
            inventory.get_group("webservers").unwrap().vars["http_port"],
            serde_yaml::Value::from(80)
        );
        assert_eq!(inventory.get_host("db1").unwrap().connection.port, Some(5433));
        assert!(inventory
            .get_group("webservers")
            .unwrap()
            .parents
            .contains("production"));
    }

    #[test]
    fn test_ini_unknown_suffix() {
        let err = Inventory::resolve(&[InventorySource::ini("[web:bogus]\nweb1\n")]).unwrap_err();
        assert!(matches!(err, InventoryError::Ini { line: 1, .. }));
    }

    #[test]
    fn test_pattern_matching() {
        let ini = "[web]\nweb1\nweb2\n[db]\ndb1\n";
        let inventory = Inventory::resolve(&[InventorySource::ini(ini)]).unwrap();

        assert_eq!(names(inventory.hosts_for_pattern("all").unwrap()).len(), 3);
        assert_eq!(
            names(inventory.hosts_for_pattern("web:db").unwrap()),
            vec!["web1", "web2", "db1"]
        );
        assert_eq!(
            names(inventory.hosts_for_pattern("all:!db").unwrap()),
            vec!["web1", "web2"]
        );
        assert_eq!(
            names(inventory.hosts_for_pattern("web:&web2").unwrap()),
            vec!["web2"]
        );
    }

    #[test]
    fn test_glob_and_regex_patterns() {
        let ini = "[web]\nweb1\nweb2\nweb10\n";
        let inventory = Inventory::resolve(&[InventorySource::ini(ini)]).unwrap();

        assert_eq!(names(inventory.hosts_for_pattern("web?").unwrap()), vec!["web1", "web2"]);
        assert_eq!(names(inventory.hosts_for_pattern(r"~web\d{2}").unwrap()), vec!["web10"]);
        assert!(inventory.hosts_for_pattern("cache*").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_group() {
        let inventory = Inventory::resolve(&[InventorySource::ini("[web]\nweb1\n")]).unwrap();
        assert!(matches!(
            inventory.hosts_for_pattern("databases"),
            Err(InventoryError::UnknownGroup(name)) if name == "databases"
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let ini = "[a:children]\nb\n[b:children]\nc\n[c:children]\na\n";
        let err = Inventory::resolve(&[InventorySource::ini(ini)]).unwrap_err();
        match err {
            InventoryError::Cycle(path) => {
                assert!(path.contains("a -> b -> c -> a") || path.contains("b -> c -> a -> b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_group_closure_order() {
        let yaml = r#"
all:
  children:
    prod:
      children:
        webservers:
          hosts:
            web1:
"#;
        let inventory = Inventory::resolve(&[InventorySource::yaml(yaml)]).unwrap();
        let host = inventory.get_host("web1").unwrap();
        let closure = inventory.group_closure(host);
        let order: Vec<&str> = closure.farthest_first().collect();
        assert_eq!(order, vec!["all", "prod", "webservers"]);
        assert_eq!(inventory.group_names(host), vec!["prod", "webservers"]);
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("42"), serde_yaml::Value::from(42));
        assert_eq!(parse_scalar("yes"), serde_yaml::Value::Bool(true));
        assert_eq!(parse_scalar("'quoted'"), serde_yaml::Value::from("quoted"));
        assert_eq!(parse_scalar("plain"), serde_yaml::Value::from("plain"));
    }
}
