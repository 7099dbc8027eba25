//! Run command - apply playbooks
//!
//! Playbooks run in the order given, sharing one inventory and one
//! executor. Ctrl-C cancels the run: in-flight tasks finish, nothing new
//! is scheduled, and the recap is still printed.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;
use converge::executor::{Executor, ExecutorConfig};
use converge::playbook::Playbook;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Playbook files, run in order
    #[arg(required = true)]
    pub playbooks: Vec<PathBuf>,

    /// Only run tasks with these tags
    #[arg(long, short = 't', action = clap::ArgAction::Append, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Skip tasks with these tags
    #[arg(long, action = clap::ArgAction::Append, value_delimiter = ',')]
    pub skip_tags: Vec<String>,

    /// Additional directories searched for roles
    #[arg(long, action = clap::ArgAction::Append)]
    pub roles_path: Vec<PathBuf>,

    /// Stop a loop at its first failed item
    #[arg(long)]
    pub fail_fast_loops: bool,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl RunArgs {
    fn executor_config(&self, ctx: &CommandContext) -> Result<ExecutorConfig> {
        let defaults = &ctx.config.defaults;
        Ok(ExecutorConfig {
            forks: ctx.forks,
            check_mode: ctx.check_mode,
            fail_fast_loops: self.fail_fast_loops || defaults.fail_fast_loops,
            extra_vars: ctx.parse_extra_vars()?,
            tags: self.tags.clone(),
            skip_tags: self.skip_tags.clone(),
            limit: ctx.limit.clone(),
            run_timeout: self.timeout.or(defaults.run_timeout).map(Duration::from_secs),
        })
    }

    fn roles_path(&self, ctx: &CommandContext) -> Vec<PathBuf> {
        self.roles_path
            .iter()
            .chain(ctx.config.defaults.roles_path.iter())
            .cloned()
            .collect()
    }

    /// Execute the run command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let start_time = Instant::now();

        // Parse everything up front so a bad file fails before any host runs
        let roles_path = self.roles_path(ctx);
        let playbooks = self
            .playbooks
            .iter()
            .map(|path| {
                Playbook::load(path, &roles_path)
                    .with_context(|| format!("Failed to load playbook: {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let inventory = ctx.load_inventory()?;
        let mut executor = Executor::new(self.executor_config(ctx)?, inventory);
        if let Some(vault) = ctx.vault()? {
            executor = executor.with_vault(vault);
        }

        let cancel = executor.cancellation_token();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling run");
                    cancel.cancel();
                }
            }
        });

        let mut exit_code = 0;
        for (path, playbook) in self.playbooks.iter().zip(&playbooks) {
            info!(playbook = %path.display(), "Running playbook");
            let report = executor.run_playbook(playbook).await?;
            ctx.output.run_report(&report, start_time.elapsed());

            exit_code = exit_code.max(report.exit_code());
            if report.cancelled {
                break;
            }
        }

        interrupt.abort();
        ctx.output.flush();
        Ok(exit_code)
    }
}
