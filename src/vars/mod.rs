//! Variable system.
//!
//! This module provides layered variable resolution:
//! - Precedence tiers (role defaults up to extra vars)
//! - Scope specificity within a tier (host over nearer groups over farther)
//! - Immutable bags: adding a layer yields a new bag, earlier resolutions
//!   are never mutated

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::inventory::{Host, Inventory};

/// Variable precedence tiers (from lowest to highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VarPrecedence {
    /// Role defaults (lowest priority)
    RoleDefaults = 1,
    /// Role vars (from a role's vars/main.yml)
    RoleVars = 2,
    /// Inventory group vars, ranked by group depth
    GroupVars = 3,
    /// Inventory host vars
    HostVars = 4,
    /// Play vars
    PlayVars = 5,
    /// Registered task results and set_fact
    Registered = 6,
    /// The current loop item
    LoopVars = 7,
    /// Extra vars (--extra-vars, -e)
    ExtraVars = 8,
    /// Inventory-derived names (`inventory_hostname`, `group_names`, `groups`)
    Magic = 9,
}

impl VarPrecedence {
    /// Get all precedence levels in order (lowest to highest)
    pub fn all() -> impl Iterator<Item = VarPrecedence> {
        [
            VarPrecedence::RoleDefaults,
            VarPrecedence::RoleVars,
            VarPrecedence::GroupVars,
            VarPrecedence::HostVars,
            VarPrecedence::PlayVars,
            VarPrecedence::Registered,
            VarPrecedence::LoopVars,
            VarPrecedence::ExtraVars,
            VarPrecedence::Magic,
        ]
        .into_iter()
    }

    /// Get the precedence level number
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for VarPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarPrecedence::RoleDefaults => "role defaults",
            VarPrecedence::RoleVars => "role vars",
            VarPrecedence::GroupVars => "group vars",
            VarPrecedence::HostVars => "host vars",
            VarPrecedence::PlayVars => "play vars",
            VarPrecedence::Registered => "registered vars",
            VarPrecedence::LoopVars => "loop vars",
            VarPrecedence::ExtraVars => "extra vars",
            VarPrecedence::Magic => "magic vars",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur in the variable system
#[derive(Debug, Error)]
pub enum VarsError {
    #[error("failed to read variables file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("undefined variable: {0}")]
    Undefined(String),

    #[error("invalid extra vars '{0}': expected key=value, @file, or a YAML/JSON mapping")]
    InvalidExtraVars(String),
}

/// Result type for variable operations
pub type VarsResult<T> = Result<T, VarsError>;

/// A set of variables from one source at one tier.
///
/// `rank` orders layers within a tier: a higher rank is a more specific
/// scope (the host's direct group outranks `all`).
#[derive(Debug, Clone, PartialEq)]
pub struct VarLayer {
    pub precedence: VarPrecedence,
    pub rank: usize,
    pub source: String,
    pub vars: IndexMap<String, serde_yaml::Value>,
}

impl VarLayer {
    pub fn new(
        precedence: VarPrecedence,
        source: impl Into<String>,
        vars: IndexMap<String, serde_yaml::Value>,
    ) -> Self {
        Self {
            precedence,
            rank: 0,
            source: source.into(),
            vars,
        }
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    fn key(&self) -> (VarPrecedence, usize) {
        (self.precedence, self.rank)
    }
}

/// Where an effective value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarOrigin<'a> {
    pub precedence: VarPrecedence,
    pub source: &'a str,
}

/// An ordered stack of variable layers.
///
/// Lookups return the value from the highest (tier, rank) layer defining
/// the key. Layers are shared, so deriving a new bag with
/// [`VariableBag::overlay`] is cheap and leaves the original untouched.
#[derive(Debug, Clone, Default)]
pub struct VariableBag {
    layers: Vec<Arc<VarLayer>>,
}

impl VariableBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a layer, keeping layers sorted. Equal keys keep insertion order,
    /// so a later push wins a tie.
    pub fn push(&mut self, layer: VarLayer) {
        let key = layer.key();
        let position = self
            .layers
            .iter()
            .position(|l| l.key() > key)
            .unwrap_or(self.layers.len());
        self.layers.insert(position, Arc::new(layer));
    }

    /// Derive a new bag with one more layer on top of this one's
    pub fn overlay(
        &self,
        precedence: VarPrecedence,
        source: impl Into<String>,
        vars: IndexMap<String, serde_yaml::Value>,
    ) -> VariableBag {
        let mut bag = self.clone();
        bag.push(VarLayer::new(precedence, source, vars));
        bag
    }

    /// Effective value for a key
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.layers.iter().rev().find_map(|l| l.vars.get(key))
    }

    /// Tier and source of the effective value for a key
    pub fn origin(&self, key: &str) -> Option<VarOrigin<'_>> {
        self.layers
            .iter()
            .rev()
            .find(|l| l.vars.contains_key(key))
            .map(|l| VarOrigin {
                precedence: l.precedence,
                source: &l.source,
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.layers.iter().any(|l| l.vars.contains_key(key))
    }

    /// All effective variables, in first-definition order
    pub fn merged(&self) -> IndexMap<String, serde_yaml::Value> {
        let mut merged = IndexMap::new();
        for layer in &self.layers {
            for (key, value) in &layer.vars {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Variable names across all layers
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        let mut seen = std::collections::HashSet::new();
        self.layers
            .iter()
            .flat_map(|l| l.vars.keys())
            .filter(move |k| seen.insert(k.as_str()))
    }

    pub fn layers(&self) -> impl Iterator<Item = &VarLayer> {
        self.layers.iter().map(|l| l.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|l| l.vars.is_empty())
    }
}

/// Variables contributed by a play, in the shape the resolver needs.
///
/// Roles contribute (name, defaults, vars) in play order.
#[derive(Debug, Clone, Default)]
pub struct PlayScope<'a> {
    pub play_vars: Option<&'a IndexMap<String, serde_yaml::Value>>,
    pub roles: Vec<(
        &'a str,
        &'a IndexMap<String, serde_yaml::Value>,
        &'a IndexMap<String, serde_yaml::Value>,
    )>,
}

/// Computes the effective variable set of a host for a play.
#[derive(Debug, Clone, Copy)]
pub struct VarResolver<'a> {
    inventory: &'a Inventory,
}

impl<'a> VarResolver<'a> {
    pub fn new(inventory: &'a Inventory) -> Self {
        Self { inventory }
    }

    /// Merge order, lowest to highest: role defaults, role vars, group vars
    /// (farthest ancestor first), host vars, play vars, extra vars. Magic
    /// inventory names sit on top.
    pub fn effective_vars(
        &self,
        host: &Host,
        play: &PlayScope<'_>,
        extra_vars: &IndexMap<String, serde_yaml::Value>,
    ) -> VariableBag {
        let mut bag = VariableBag::new();

        for (rank, (role, defaults, _)) in play.roles.iter().enumerate() {
            bag.push(
                VarLayer::new(
                    VarPrecedence::RoleDefaults,
                    format!("role {} defaults", role),
                    (*defaults).clone(),
                )
                .with_rank(rank),
            );
        }
        for (rank, (role, _, vars)) in play.roles.iter().enumerate() {
            bag.push(
                VarLayer::new(
                    VarPrecedence::RoleVars,
                    format!("role {} vars", role),
                    (*vars).clone(),
                )
                .with_rank(rank),
            );
        }

        for (name, depth) in self.inventory.group_closure(host).with_depths() {
            if let Some(group) = self.inventory.get_group(name) {
                if !group.vars.is_empty() {
                    bag.push(
                        VarLayer::new(
                            VarPrecedence::GroupVars,
                            format!("group {}", name),
                            group.vars.clone(),
                        )
                        .with_rank(depth),
                    );
                }
            }
        }

        bag.push(VarLayer::new(
            VarPrecedence::HostVars,
            format!("host {}", host.name),
            host.vars.clone(),
        ));

        if let Some(play_vars) = play.play_vars {
            bag.push(VarLayer::new(
                VarPrecedence::PlayVars,
                "play vars",
                play_vars.clone(),
            ));
        }

        bag.push(VarLayer::new(
            VarPrecedence::ExtraVars,
            "extra vars",
            extra_vars.clone(),
        ));

        bag.push(VarLayer::new(
            VarPrecedence::Magic,
            "inventory",
            self.magic_vars(host),
        ));

        bag
    }

    fn magic_vars(&self, host: &Host) -> IndexMap<String, serde_yaml::Value> {
        let mut vars = IndexMap::new();
        vars.insert(
            "inventory_hostname".to_string(),
            serde_yaml::Value::String(host.name.clone()),
        );
        vars.insert(
            "ansible_host".to_string(),
            serde_yaml::Value::String(host.address().to_string()),
        );
        vars.insert(
            "group_names".to_string(),
            serde_yaml::Value::Sequence(
                self.inventory
                    .group_names(host)
                    .into_iter()
                    .map(serde_yaml::Value::String)
                    .collect(),
            ),
        );
        let groups: serde_yaml::Mapping = self
            .inventory
            .groups_map()
            .into_iter()
            .map(|(group, hosts)| {
                (
                    serde_yaml::Value::String(group),
                    serde_yaml::Value::Sequence(
                        hosts.into_iter().map(serde_yaml::Value::String).collect(),
                    ),
                )
            })
            .collect();
        vars.insert("groups".to_string(), serde_yaml::Value::Mapping(groups));
        vars
    }
}

/// Parse `-e` arguments: `key=value` pairs, `@file.yml`, or an inline
/// YAML/JSON mapping. Later arguments win.
pub fn parse_extra_vars(args: &[String]) -> VarsResult<IndexMap<String, serde_yaml::Value>> {
    let mut vars = IndexMap::new();

    for arg in args {
        let arg = arg.trim();
        if let Some(path) = arg.strip_prefix('@') {
            vars.extend(load_vars_file(path)?);
        } else if arg.starts_with('{') {
            let parsed: IndexMap<String, serde_yaml::Value> = serde_yaml::from_str(arg)?;
            vars.extend(parsed);
        } else {
            let mut any = false;
            for pair in split_pairs(arg) {
                let (key, value) = pair
                    .split_once('=')
                    .filter(|(k, _)| !k.trim().is_empty())
                    .ok_or_else(|| VarsError::InvalidExtraVars(arg.to_string()))?;
                vars.insert(
                    key.trim().to_string(),
                    crate::inventory::parse_scalar(value),
                );
                any = true;
            }
            if !any {
                return Err(VarsError::InvalidExtraVars(arg.to_string()));
            }
        }
    }

    Ok(vars)
}

/// Split `a=1 b='x y'` on whitespace outside quotes
pub(crate) fn split_pairs(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = None;
    let mut quote: Option<char> = None;

    for (i, ch) in input.char_indices() {
        match (ch, quote) {
            ('\'' | '"', None) => {
                quote = Some(ch);
                start.get_or_insert(i);
            }
            (c, Some(q)) if c == q => quote = None,
            (c, None) if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    parts.push(&input[s..i]);
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    if let Some(s) = start {
        parts.push(&input[s..]);
    }
    parts
}

/// Load a YAML mapping of variables from a file
pub fn load_vars_file(
    path: impl AsRef<Path>,
) -> VarsResult<IndexMap<String, serde_yaml::Value>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| VarsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let vars: Option<IndexMap<String, serde_yaml::Value>> = serde_yaml::from_str(&content)?;
    Ok(vars.unwrap_or_default())
}

/// Convert a JSON object into a variable map. Non-objects yield nothing.
pub fn to_yaml_map(value: &serde_json::Value) -> IndexMap<String, serde_yaml::Value> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| serde_yaml::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect(),
        _ => IndexMap::new(),
    }
}
