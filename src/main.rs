//! converge - declarative configuration management
//!
//! This is the main entry point for the converge CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use converge::config::{Config, LogFormat};
use converge::error::exit_status;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&cli, &config);

    let mut ctx = CommandContext::new(&cli, config);
    let exit_code = match dispatch(&cli, &mut ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            exit_status(&e)
        }
    };

    std::process::exit(exit_code);
}

async fn dispatch(cli: &Cli, ctx: &mut CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Run(args) => args.execute(ctx).await,
        Commands::Vault(args) => args.execute(ctx).await,
        Commands::ListHosts(args) => args.execute(ctx).await,
    }
}

/// Initialize logging from `-v`, `RUST_LOG` and the configured format
fn init_logging(cli: &Cli, config: &Config) {
    let filter = match cli.verbosity() {
        0 => config.logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let json = cli.log_json || config.logging.format == LogFormat::Json;

    // Logs go to stderr so stdout carries only results
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(cli.verbosity() >= 3)
                    .with_ansi(!cli.no_color)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
