//! Clap CLI definitions for Farcall.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  farcall serve                          Serve the built-in demo targets
  farcall call Calculator add 1 2        Call a remote method
  farcall call RemoteClass greet '\"m\"' nic
  farcall sign '{\"c\":\"Calculator\",\"f\":\"add\",\"a\":[1,2],\"p\":null}'

Configuration is read from ~/.farcall/config.toml unless --config is given.";

/// Farcall: signed remote method calls over HTTP.
#[derive(Parser, Debug)]
#[command(name = "farcall", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the remote dispatcher serving the built-in targets.
    Serve {
        /// Listen address, overriding [server] listen_addr.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Invoke a method on a remote target and print the result.
    Call {
        /// Remote type name.
        target: String,
        /// Method to invoke.
        method: String,
        /// Positional arguments. Each is parsed as JSON, falling back to a plain string.
        args: Vec<String>,
        /// Location hint sent with the call, overriding [connection] locations.
        #[arg(long)]
        hint: Option<String>,
    },
    /// Print the envelope signature of a JSON document.
    Sign {
        /// Inline JSON object.
        #[arg(conflicts_with = "file")]
        json: Option<String>,
        /// Read the JSON object from a file instead.
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
    },
}
