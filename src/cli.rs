//! Command-line argument parsing for connect-host

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// connect-host - load connector plugins and dispatch their tools
#[derive(Parser, Debug)]
#[command(name = "connect-host")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (TOML or YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List every registered tool
    List,

    /// Call one tool and print the response text
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Caller identity as a JSON object
        #[arg(short, long, value_name = "JSON")]
        identity: Option<String>,
    },

    /// Validate the configuration and report which plugins load
    Check,
}
