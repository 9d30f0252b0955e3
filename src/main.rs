// ABOUTME: Entry point for the hoptunnel CLI application.
// ABOUTME: Parses arguments, loads config and drives the tunnel lifecycle.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use hoptunnel::config::{self, Config};
use hoptunnel::error::{Error, Result};
use hoptunnel::tunnel::Tunnel;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = env::current_dir()?;
    match cli.command {
        Commands::Init { force } => {
            config::init_config(&cwd, force)?;
            println!("Wrote {}", cwd.join(config::CONFIG_FILENAME).display());
            Ok(())
        }
        Commands::Up => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            up(config).await
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            check(config).await
        }
    }
}

fn load_config(path: Option<&Path>, cwd: &Path) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(cwd),
    }
}

/// Keep the tunnel open until Ctrl-C.
async fn up(config: Config) -> Result<()> {
    let tunnel = Tunnel::new(config.to_spec()?);
    let port = tunnel.start().await?;

    println!("127.0.0.1:{port}");
    eprintln!(
        "Forwarding 127.0.0.1:{} -> {}:{} (Ctrl-C to stop)",
        port, config.target.host, config.target.port
    );

    let signal = tokio::signal::ctrl_c().await;
    tunnel.stop().await;
    signal.map_err(Error::Signal)
}

/// Bring the tunnel up and straight back down.
async fn check(config: Config) -> Result<()> {
    let tunnel = Tunnel::new(config.to_spec()?);
    let port = tunnel.start().await?;
    tunnel.stop().await;

    println!(
        "ok: {} hop(s) established, bound 127.0.0.1:{} for {}:{}",
        config.bastions.len() + 1,
        port,
        config.target.host,
        config.target.port
    );
    Ok(())
}
