//! Clap CLI definitions for AION.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  aion available                 Browse the strategy registry
  aion install autoscale         Download, verify and install a strategy
  aion list                      Installed strategies with verification status
  aion run autoscale --kwargs '{\"cpu_load\": 85}'
  aion sign --key alice.pem --code s.wat --id s --name S --version 1.0 \\
            --author alice --key-id alice --url https://cdn.example/s.wat";

/// AION: signed, sandboxed resource-management strategies.
#[derive(Parser)]
#[command(name = "aion", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file [default: <home>/config.toml].
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// AION home directory [default: $AION_HOME or ~/.aion].
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List installed strategies and whether they still verify.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Refresh the registry and list strategies offered by it.
    Available {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Refresh the registry, then download, verify and install a strategy.
    Install {
        /// Strategy id as listed in the registry.
        id: String,
    },
    /// Execute an installed strategy in the sandbox.
    Run {
        /// Strategy id.
        id: String,
        /// Positional arguments as a JSON array.
        #[arg(long, default_value = "[]")]
        args: String,
        /// Keyword arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        kwargs: String,
    },
    /// List trusted author keys.
    Keys,
    /// Sign strategy code and print its registry entry.
    Sign(SignArgs),
    /// Print the public key for a private key, for a trust directory.
    ExportKey {
        /// PEM private key (PKCS#8 or PKCS#1).
        #[arg(long)]
        key: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct SignArgs {
    /// PEM private key (PKCS#8 or PKCS#1).
    #[arg(long)]
    pub key: PathBuf,
    /// Strategy code file.
    #[arg(long)]
    pub code: PathBuf,
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub version: String,
    #[arg(long)]
    pub author: String,
    /// Key id consumers will have in their trust directory.
    #[arg(long)]
    pub key_id: String,
    /// Where the code will be downloadable from.
    #[arg(long)]
    pub url: String,
    /// Extra metadata as key=value, repeatable.
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub meta: Vec<String>,
}
