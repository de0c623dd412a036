//! sshkit - SSH commands, transfers and tunnels
//!
//! This is the main entry point for the sshkit CLI.

mod cli;

use anyhow::Result;
use cli::commands::{sentinel, CommandContext, Runnable, INFRASTRUCTURE_EXIT};
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use sshkit::config::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity(), cli.quiet);

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            OutputFormatter::new(!cli.no_color, cli.verbosity())
                .error(&format!("Failed to load config: {}", e));
            std::process::exit(INFRASTRUCTURE_EXIT);
        }
    };

    let mut ctx = CommandContext::new(&cli, config);

    let result = match &cli.command {
        Commands::Run(args) => args.run(&mut ctx).await,
        Commands::Upload(args) => args.run(&mut ctx).await,
        Commands::Download(args) => args.run(&mut ctx).await,
        Commands::Tunnel(args) => args.run(&mut ctx).await,
        Commands::Exec(args) => args.run(&mut ctx).await,
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            ctx.output
                .error(&format!("{:#} (code {})", e, sentinel(&e)));
            INFRASTRUCTURE_EXIT
        }
    };

    std::process::exit(exit_code);
}

/// Level used when `RUST_LOG` is unset.
///
/// Remote and subprocess output is logged at `info`, so `info` is the floor
/// unless quiet.
fn default_level(verbosity: u8, quiet: bool) -> &'static str {
    match verbosity {
        0 if quiet => "warn",
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8, quiet: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity, quiet)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
