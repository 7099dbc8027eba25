//! Inventory commands - inspect which hosts a pattern selects

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use converge::vars::{PlayScope, VarResolver};

/// Arguments for list-hosts command
#[derive(Parser, Debug, Clone)]
pub struct ListHostsArgs {
    /// Host pattern (group, host, `a:b`, `a:&b`, `a:!b`, glob or `~regex`)
    #[arg(default_value = "all")]
    pub pattern: String,

    /// Show each host's effective variables
    #[arg(long)]
    pub vars: bool,
}

impl ListHostsArgs {
    /// Execute the list-hosts command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;

        let mut hosts = inventory.hosts_for_pattern(&self.pattern)?;
        if let Some(limit) = &ctx.limit {
            let allowed = inventory.hosts_for_pattern(limit)?;
            hosts.retain(|h| allowed.iter().any(|a| a.name == h.name));
        }

        if hosts.is_empty() {
            ctx.output
                .warning(&format!("No hosts matched pattern: {}", self.pattern));
            return Ok(0);
        }

        if !self.vars {
            let names: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
            ctx.output
                .list(&format!("hosts ({}):", names.len()), &names);
            return Ok(0);
        }

        let extra_vars = ctx.parse_extra_vars()?;
        let resolver = VarResolver::new(&inventory);
        let scope = PlayScope::default();

        let mut all = serde_json::Map::new();
        for host in hosts {
            let merged = resolver.effective_vars(host, &scope, &extra_vars).merged();
            all.insert(host.name.clone(), serde_json::to_value(merged)?);
        }

        if ctx.output.is_json() {
            println!("{}", serde_json::to_string_pretty(&all)?);
        } else {
            print!("{}", serde_yaml::to_string(&all)?);
        }
        Ok(0)
    }
}
