//! AION CLI: install, inspect and run marketplace strategies.
//!
//! Every command boots an in-process kernel from `<home>/config.toml`.

mod cli;
mod cmd;
pub mod table;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let home = cli.home.clone().unwrap_or_else(aion_kernel::config::aion_home);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| home.join("config.toml"));
    let config = aion_kernel::config::load_config(Some(&config_path));
    init_tracing_stderr(&config.log_level);
    tracing::debug!(
        home = %home.display(),
        config = %config_path.display(),
        "Resolved AION paths"
    );

    let ctx = cmd::Context { home, config };

    match cli.command {
        Commands::List { json } => cmd::strategy::cmd_list(ctx, json),
        Commands::Available { json } => cmd::strategy::cmd_available(ctx, json),
        Commands::Install { id } => cmd::strategy::cmd_install(ctx, &id),
        Commands::Run { id, args, kwargs } => cmd::strategy::cmd_run(ctx, &id, &args, &kwargs),
        Commands::Keys => cmd::keys::cmd_keys(ctx),
        Commands::Sign(args) => cmd::keys::cmd_sign(args),
        Commands::ExportKey { key } => cmd::keys::cmd_export_key(&key),
    }
}
