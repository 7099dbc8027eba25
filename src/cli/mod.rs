//! Command-line interface for converge
//!
//! Global flags apply to every subcommand; subcommand-specific flags live
//! with their implementation in [`commands`].

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use commands::inventory::ListHostsArgs;
use commands::run::RunArgs;
use commands::vault::VaultArgs;

/// converge - apply playbooks to an inventory of hosts
#[derive(Parser, Debug, Clone)]
#[command(
    name = "converge",
    author,
    version,
    about = "Declarative configuration management",
    long_about = "converge applies playbooks to hosts selected from an inventory.\n\n\
                  Hosts run in parallel; tasks on a host run in order, and handlers \
                  notified by changes fire once at the end of the host's task phase.",
    propagate_version = true
)]
pub struct Cli {
    /// Inventory file or directory
    #[arg(short, long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Extra variables (key=value, @file.yml, or an inline YAML mapping)
    #[arg(short = 'e', long = "extra-vars", action = clap::ArgAction::Append, global = true)]
    pub extra_vars: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Dry-run: modules report what they would change without changing it
    #[arg(long = "check", global = true)]
    pub check_mode: bool,

    /// Further limit selected hosts to this pattern
    #[arg(short, long, global = true)]
    pub limit: Option<String>,

    /// Number of hosts to run in parallel
    #[arg(short, long, global = true)]
    pub forks: Option<usize>,

    /// Configuration file
    #[arg(short, long, env = "CONVERGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// File holding the vault passphrase
    #[arg(long, global = true)]
    pub vault_password_file: Option<PathBuf>,

    /// Output format for run results
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub output: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output formats for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Play-by-play text with a recap
    Human,
    /// A single JSON run report
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one or more playbooks
    Run(RunArgs),

    /// Encrypt, decrypt or view vault files
    Vault(VaultArgs),

    /// List hosts matched by a pattern
    ListHosts(ListHostsArgs),
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    pub fn is_json(&self) -> bool {
        self.output == OutputFormat::Json
    }
}
