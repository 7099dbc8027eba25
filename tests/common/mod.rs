//! Shared test utilities for the converge test suite.
//!
//! This module provides:
//! - A recording module that converges (changed once, then ok)
//! - A mock connection and connection provider
//! - Inventory and playbook builders
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use converge::connection::{
    CommandResult, Connection, ConnectionError, ConnectionProvider, ConnectionResult,
    ExecuteOptions,
};
use converge::executor::{Executor, ExecutorConfig};
use converge::inventory::{Host, Inventory, InventorySource};
use converge::modules::{
    Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry, ModuleResult, Placement,
};
use converge::playbook::{Play, Playbook};

// ============================================================================
// Recording module
// ============================================================================

/// One invocation seen by a [`RecordingModule`]
#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub params: ModuleParams,
    pub check_mode: bool,
    pub connected: bool,
}

/// A module that records every invocation.
///
/// By default it converges: the first call for a `(host, name)` pair reports
/// `changed`, later calls report `ok`. Check-mode calls report what would
/// change without converging.
pub struct RecordingModule {
    name: &'static str,
    placement: Placement,
    always_changed: bool,
    fail_hosts: HashSet<String>,
    calls: Mutex<Vec<Call>>,
    converged: Mutex<HashSet<(String, String)>>,
}

impl RecordingModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            placement: Placement::Controller,
            always_changed: false,
            fail_hosts: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            converged: Mutex::new(HashSet::new()),
        }
    }

    /// Report `changed` on every call
    pub fn always_changed(mut self) -> Self {
        self.always_changed = true;
        self
    }

    /// Needs a host connection, like a real remote module
    pub fn remote(mut self) -> Self {
        self.placement = Placement::Target;
        self
    }

    /// Report failure on these hosts
    pub fn failing_on<I: IntoIterator<Item = &'static str>>(mut self, hosts: I) -> Self {
        self.fail_hosts = hosts.into_iter().map(String::from).collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, host: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.host == host)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn placement(&self) -> Placement {
        self.placement
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        self.calls.lock().push(Call {
            host: context.host.clone(),
            params: params.clone(),
            check_mode: context.check_mode,
            connected: context.connection.is_some(),
        });

        if let Some(connection) = &context.connection {
            connection
                .execute(&format!("{} {:?}", self.name, params.get("name")), None)
                .await?;
        }

        if self.fail_hosts.contains(&context.host) {
            return Ok(ModuleOutput::failed("forced failure"));
        }

        let key = params
            .get("name")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let output = if self.always_changed {
            ModuleOutput::changed(format!("{} applied", self.name))
        } else if self
            .converged
            .lock()
            .contains(&(context.host.clone(), key.clone()))
        {
            ModuleOutput::ok("already in desired state")
        } else {
            if !context.check_mode {
                self.converged.lock().insert((context.host.clone(), key));
            }
            ModuleOutput::changed("converged")
        };

        Ok(output.with_data("name", params.get("name").cloned().unwrap_or_default()))
    }
}

// ============================================================================
// Mock connections
// ============================================================================

/// A connection that records commands and always succeeds
#[derive(Debug)]
pub struct MockConnection {
    identifier: String,
    commands: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.commands.lock().push(command.to_string());
        Ok(CommandResult::ok("ok"))
    }

    async fn path_exists(&self, _path: &Path) -> ConnectionResult<bool> {
        Ok(true)
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

/// Hands out [`MockConnection`]s; hosts listed as unreachable fail to connect
#[derive(Default)]
pub struct MockConnectionProvider {
    unreachable: HashSet<String>,
    connects: AtomicUsize,
    opened: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable<I: IntoIterator<Item = &'static str>>(mut self, hosts: I) -> Self {
        self.unreachable = hosts.into_iter().map(String::from).collect();
        self
    }

    /// Number of connect attempts
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl ConnectionProvider for MockConnectionProvider {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.contains(&host.name) {
            return Err(ConnectionError::ConnectionFailed {
                host: host.name.clone(),
                message: "no route to host".to_string(),
            });
        }
        let connection = Arc::new(MockConnection::new(host.name.clone()));
        self.opened.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Parse an inventory from YAML
pub fn inventory(yaml: &str) -> Inventory {
    Inventory::resolve(&[InventorySource::yaml(yaml)]).expect("inventory should parse")
}

/// `all -> webservers: [web1, web2]`
pub fn webservers_inventory() -> Inventory {
    inventory(
        r#"
all:
  children:
    webservers:
      hosts:
        web1:
        web2:
"#,
    )
}

/// web1, web2 in `webservers`, db1 in `databases`, with group and host vars
pub fn mixed_inventory() -> Inventory {
    inventory(
        r#"
all:
  vars:
    env: test
  children:
    webservers:
      vars:
        http_port: 80
      hosts:
        web1:
        web2:
          http_port: 8080
    databases:
      hosts:
        db1:
"#,
    )
}

pub fn playbook_of(plays: Vec<Play>) -> Playbook {
    Playbook {
        plays,
        source_path: None,
    }
}

/// Builtins plus the given test modules
pub fn registry_with(modules: &[Arc<RecordingModule>]) -> ModuleRegistry {
    let mut registry = ModuleRegistry::with_builtins();
    for module in modules {
        registry.register(Arc::clone(module) as Arc<dyn Module>);
    }
    registry
}

/// Executor with test modules and a mock connection provider
pub fn executor_with(
    config: ExecutorConfig,
    inventory: Inventory,
    modules: &[Arc<RecordingModule>],
    provider: Arc<MockConnectionProvider>,
) -> Executor {
    Executor::new(config, inventory)
        .with_modules(registry_with(modules))
        .with_connection_provider(provider)
}
