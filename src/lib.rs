//! # converge - declarative configuration management
//!
//! converge applies playbooks (ordered lists of plays) to hosts selected from
//! an inventory. Each host converges independently: its tasks run in order,
//! a failure halts only that host, and handlers notified by changes fire once
//! at the end of the host's task phase.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts organized into a DAG of groups, each with variables
//! - **Variables**: layered by precedence, from role defaults to extra vars
//! - **Templates**: Jinja2-style expressions rendered against a host's variables
//! - **Modules**: units of work invoked by tasks through a registry
//! - **Handlers**: deferred tasks fired once per host when notified
//! - **Vault**: encrypted values, decrypted only when a template reads them
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────────┐
//! │  Inventory   │───▶│ VarResolver  │───▶│          Executor            │
//! │ (hosts, DAG) │    │ (per host)   │    │  forks-bounded host runners  │
//! └──────────────┘    └──────────────┘    └──────────────────────────────┘
//!                                                │            │
//!                                                ▼            ▼
//!                                     ┌────────────────┐ ┌───────────────┐
//!                                     │ TemplateEngine │ │ModuleRegistry │
//!                                     │  (+ Vault)     │ │ (+ Connection)│
//!                                     └────────────────┘ └───────────────┘
//!                                                │
//!                                                ▼
//!                                     ┌────────────────┐
//!                                     │HandlerRegistry │
//!                                     └────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use converge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inventory = Inventory::load("inventory.yml")?;
//!     let playbook = Playbook::load("site.yml", &[])?;
//!
//!     let executor = Executor::new(ExecutorConfig::default(), inventory);
//!     let report = executor.run_playbook(&playbook).await?;
//!
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionProvider, ConnectionResult,
        ExecuteOptions, LocalConnection, LocalConnectionProvider,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        Executor, ExecutorConfig, HostReport, HostState, RunReport, TaskResult, TaskStatus,
    };
    pub use crate::handlers::{Handler, HandlerRegistry};
    pub use crate::inventory::{Group, Host, Inventory, InventorySource};
    pub use crate::modules::{
        Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry, ModuleResult, Placement,
    };
    pub use crate::playbook::{Play, Playbook, Task};
    pub use crate::roles::Role;
    pub use crate::template::TemplateEngine;
    pub use crate::vars::{VarPrecedence, VarResolver, VariableBag};
    pub use crate::vault::Vault;
}

/// Error types and result aliases.
pub mod error;

/// Hosts, groups and host pattern selection.
pub mod inventory;

/// Variable layers and precedence.
pub mod vars;

/// Jinja2-style templating via minijinja.
pub mod template;

/// Encrypted values.
pub mod vault;

/// Transports used by modules to reach hosts.
pub mod connection;

/// Module trait, registry and built-in modules.
pub mod modules;

pub mod playbook;
pub mod roles;
pub mod handlers;

/// Scheduling of plays across hosts, and run reports.
pub mod executor;

/// Configuration files and `CONVERGE_*` environment overrides.
pub mod config;

/// Returns the current version of converge.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
