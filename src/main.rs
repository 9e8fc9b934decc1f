//! connect-host - tool-aggregation host
//!
//! This is the main entry point for the connect-host binary.

use anyhow::{Context, Result};
use clap::Parser;
use connect_host::identity::IDENTITY_ARG;
use connect_host::{EnvSecretsProvider, Host, HostConfig};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.debug);

    info!("Starting connect-host v{}", env!("CARGO_PKG_VERSION"));

    // A bad configuration stops the host before anything loads
    let config =
        HostConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let configured: Vec<String> = config.plugins.iter().map(|p| p.id.clone()).collect();

    let host = Host::start(config, Arc::new(EnvSecretsProvider::new())).await;

    match args.command {
        Command::List => {
            for tool in host.list_tools().await {
                let gate = if tool.is_consequential { " [approval]" } else { "" };
                println!("{}{}\t{}", tool.name, gate, tool.description);
            }
        }
        Command::Check => {
            let loaded = host.plugin_ids().await;
            for id in &configured {
                let state = if loaded.contains(id) { "loaded" } else { "not loaded" };
                println!("{}\t{}", id, state);
            }
            println!(
                "{} of {} plugins loaded, {} tools registered",
                loaded.len(),
                configured.len(),
                host.list_tools().await.len()
            );
        }
        Command::Call {
            tool,
            args: raw_args,
            identity,
        } => {
            let arguments = call_arguments(&raw_args, identity.as_deref())?;
            let response = host.call_tool(&tool, arguments).await;
            println!("{}", response.text);
            if !response.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Build the call arguments, carrying the identity under its reserved key
fn call_arguments(raw_args: &str, identity: Option<&str>) -> Result<Value> {
    let mut arguments: Value =
        serde_json::from_str(raw_args).context("--args must be a JSON object")?;
    let map = arguments
        .as_object_mut()
        .context("--args must be a JSON object")?;
    if let Some(identity) = identity {
        map.insert(IDENTITY_ARG.to_string(), Value::String(identity.to_string()));
    }
    Ok(arguments)
}

/// Initialize the logging/tracing subsystem
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
