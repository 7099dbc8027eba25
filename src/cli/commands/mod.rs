//! Subcommand implementations

pub mod inventory;
pub mod run;
pub mod vault;

use crate::cli::output::OutputFormatter;
use crate::cli::Cli;
use anyhow::{Context, Result};
use converge::config::Config;
use converge::inventory::Inventory;
use converge::vars::parse_extra_vars;
use converge::vault::Vault;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings every subcommand sees.
///
/// Command-line flags are merged over the loaded [`Config`] once, here, so
/// subcommands never consult both.
pub struct CommandContext {
    pub config: Config,
    pub output: OutputFormatter,
    pub check_mode: bool,
    pub limit: Option<String>,
    pub forks: usize,
    inventory_path: Option<PathBuf>,
    vault_key_file: Option<PathBuf>,
    extra_vars: Vec<String>,
}

impl CommandContext {
    pub fn new(cli: &Cli, config: Config) -> Self {
        Self {
            output: OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity()),
            check_mode: cli.check_mode,
            limit: cli.limit.clone(),
            forks: cli.forks.unwrap_or(config.defaults.forks),
            inventory_path: cli
                .inventory
                .clone()
                .or_else(|| config.defaults.inventory.clone()),
            vault_key_file: cli
                .vault_password_file
                .clone()
                .or_else(|| config.vault.password_file.clone()),
            extra_vars: cli.extra_vars.clone(),
            config,
        }
    }

    pub fn load_inventory(&self) -> Result<Inventory> {
        let path = self
            .inventory_path
            .as_ref()
            .context("no inventory: pass -i or set defaults.inventory")?;
        Inventory::load(path)
            .with_context(|| format!("cannot load inventory {}", path.display()))
    }

    /// The `-e` arguments, merged left to right
    pub fn parse_extra_vars(&self) -> Result<IndexMap<String, serde_yaml::Value>> {
        Ok(parse_extra_vars(&self.extra_vars)?)
    }

    /// `None` when no key file is configured. A configured file that
    /// cannot be read is an error.
    pub fn vault(&self) -> Result<Option<Arc<Vault>>> {
        let vault = self
            .vault_key_file
            .as_ref()
            .map(Vault::from_key_file)
            .transpose()?;
        Ok(vault.map(Arc::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_win_over_config() {
        let mut config = Config::default();
        config.defaults.inventory = Some(PathBuf::from("from-config.yml"));
        config.defaults.forks = 3;
        config.vault.password_file = Some(PathBuf::from("config.key"));

        let cli = Cli::try_parse_from(["converge", "-i", "hosts.yml", "list-hosts"]).unwrap();
        let ctx = CommandContext::new(&cli, config);

        assert_eq!(ctx.inventory_path, Some(PathBuf::from("hosts.yml")));
        assert_eq!(ctx.vault_key_file, Some(PathBuf::from("config.key")));
        assert_eq!(ctx.forks, 3);
    }

    #[test]
    fn test_no_vault_configured() {
        let cli = Cli::try_parse_from(["converge", "list-hosts"]).unwrap();
        let ctx = CommandContext::new(&cli, Config::default());
        assert!(ctx.vault().unwrap().is_none());
    }
}
