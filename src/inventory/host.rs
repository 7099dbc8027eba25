//! Host definition for the inventory system.
//!
//! A `Host` is a managed node: its connection attributes, its own variables
//! and the ordered set of groups it was declared in.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection type for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// SSH connection (default)
    #[default]
    Ssh,
    /// Local execution on the control node
    Local,
    /// Container exec
    Docker,
    /// WinRM for Windows hosts
    Winrm,
}

impl ConnectionType {
    fn parse(value: &str) -> Self {
        match value {
            "local" => ConnectionType::Local,
            "docker" => ConnectionType::Docker,
            "winrm" => ConnectionType::Winrm,
            _ => ConnectionType::Ssh,
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Ssh => write!(f, "ssh"),
            ConnectionType::Local => write!(f, "local"),
            ConnectionType::Docker => write!(f, "docker"),
            ConnectionType::Winrm => write!(f, "winrm"),
        }
    }
}

/// Connection attributes for a host.
///
/// Every field is optional so that two partial definitions of the same host
/// can be merged; only fields set on both sides can conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Address to connect to, if different from the host name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionType>,
}

impl ConnectionParams {
    /// Returns the name of the first attribute set on both sides with
    /// different values.
    pub fn conflict_with(&self, other: &ConnectionParams) -> Option<&'static str> {
        fn differs<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x != y)
        }

        if differs(&self.address, &other.address) {
            Some("address")
        } else if differs(&self.port, &other.port) {
            Some("port")
        } else if differs(&self.user, &other.user) {
            Some("user")
        } else if differs(&self.private_key_file, &other.private_key_file) {
            Some("private_key_file")
        } else if differs(&self.connection, &other.connection) {
            Some("connection")
        } else {
            None
        }
    }

    /// Fill unset attributes from `other`
    pub fn absorb(&mut self, other: &ConnectionParams) {
        if self.address.is_none() {
            self.address = other.address.clone();
        }
        if self.port.is_none() {
            self.port = other.port;
        }
        if self.user.is_none() {
            self.user = other.user.clone();
        }
        if self.private_key_file.is_none() {
            self.private_key_file = other.private_key_file.clone();
        }
        if self.connection.is_none() {
            self.connection = other.connection;
        }
    }
}

/// Errors from parsing an inline host definition
#[derive(Debug, Error)]
pub enum HostParseError {
    #[error("empty host definition")]
    Empty,

    #[error("invalid host variable '{0}': expected key=value")]
    InvalidVariable(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name (hostname, IP, or alias)
    pub name: String,

    /// Connection attributes
    #[serde(default)]
    pub connection: ConnectionParams,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Groups this host was declared in, in declaration order
    #[serde(default)]
    pub groups: IndexSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: ConnectionParams::default(),
            vars: IndexMap::new(),
            groups: IndexSet::new(),
        }
    }

    /// Parse an INI-style host line, e.g.
    /// `web1 ansible_host=10.0.0.1 ansible_port=2222 role=frontend`
    pub fn parse(line: &str) -> Result<Self, HostParseError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or(HostParseError::Empty)?;
        let mut host = Host::new(name);

        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| HostParseError::InvalidVariable(part.to_string()))?;
            if key == "ansible_port" {
                let port = value
                    .parse::<u16>()
                    .map_err(|_| HostParseError::InvalidPort(value.to_string()))?;
                host.connection.port = Some(port);
            } else {
                host.apply_var(key, super::parse_scalar(value));
            }
        }

        Ok(host)
    }

    /// Apply a variable, routing connection keys to `connection`
    pub fn apply_var(&mut self, key: &str, value: serde_yaml::Value) {
        let text = value_as_string(&value);
        match (key, text) {
            ("ansible_host", Some(s)) => self.connection.address = Some(s),
            ("ansible_port", _) => {
                let port = match &value {
                    serde_yaml::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                    serde_yaml::Value::String(s) => s.parse().ok(),
                    _ => None,
                };
                if let Some(port) = port {
                    self.connection.port = Some(port);
                }
            }
            ("ansible_user", Some(s)) => self.connection.user = Some(s),
            ("ansible_ssh_private_key_file", Some(s)) => {
                self.connection.private_key_file = Some(s)
            }
            ("ansible_connection", Some(s)) => {
                self.connection.connection = Some(ConnectionType::parse(&s))
            }
            _ => {
                self.vars.insert(key.to_string(), value);
            }
        }
    }

    /// Add this host to a group
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Check if the host was declared in a group
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Address to connect to (falls back to the name)
    pub fn address(&self) -> &str {
        self.connection.address.as_deref().unwrap_or(&self.name)
    }

    /// Effective connection type
    pub fn connection_type(&self) -> ConnectionType {
        self.connection.connection.unwrap_or_default()
    }

    /// Merge another definition of the same host into this one.
    ///
    /// Fails with the conflicting attribute name when the two definitions
    /// disagree on connection attributes.
    pub fn merge(&mut self, other: &Host) -> Result<(), &'static str> {
        if let Some(field) = self.connection.conflict_with(&other.connection) {
            return Err(field);
        }
        self.connection.absorb(&other.connection);
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
        for group in &other.groups {
            self.groups.insert(group.clone());
        }
        Ok(())
    }
}

fn value_as_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(address) = &self.connection.address {
            write!(f, " ({})", address)?;
        }
        Ok(())
    }
}
