//! Strategy commands: list, available, install, run.

use super::{runtime, Context};
use crate::table::Table;
use crate::ui;
use aion_market::RegistryRefresh;
use aion_types::package::StrategyArgs;
use colored::Colorize;

pub fn cmd_list(ctx: Context, json: bool) {
    let kernel = ctx.boot();
    let rows = kernel.list_strategies();

    if json {
        print_json(&rows);
        return;
    }
    if rows.is_empty() {
        println!("No strategies installed.");
        ui::hint("Browse the registry with `aion available`.");
        return;
    }

    let mut table = Table::new(&["ID", "Name", "Version", "Author", "Verified"]);
    for row in &rows {
        let verified = if row.verified { "yes" } else { "NO" };
        table.row([
            row.id.as_str(),
            row.name.as_str(),
            row.version.as_str(),
            row.author.as_str(),
            verified,
        ]);
    }
    table.print();

    let failing = rows.iter().filter(|r| !r.verified).count();
    if failing > 0 {
        ui::warn(&format!(
            "{failing} installed strategy(ies) no longer verify and will not run"
        ));
    }
}

pub fn cmd_available(ctx: Context, json: bool) {
    let kernel = ctx.boot();
    let rt = runtime();
    if let RegistryRefresh::Kept(reason) = rt.block_on(kernel.refresh_registry()) {
        ui::error(&format!("Could not fetch registry: {reason}"));
        std::process::exit(1);
    }

    let rows = kernel.available();
    if json {
        print_json(&rows);
        return;
    }
    if rows.is_empty() {
        println!("The registry lists no strategies.");
        return;
    }

    let mut table = Table::new(&["ID", "Name", "Version", "Author", "Installed"]);
    for row in &rows {
        table.row([
            row.id.as_str(),
            row.name.as_str(),
            row.version.as_str(),
            row.author.as_str(),
            if row.installed { "yes" } else { "" },
        ]);
    }
    table.print();
}

pub fn cmd_install(ctx: Context, id: &str) {
    let kernel = ctx.boot();
    let rt = runtime();

    if let RegistryRefresh::Kept(reason) = rt.block_on(kernel.refresh_registry()) {
        ui::warn(&format!("Registry refresh failed ({reason}), using cached entries"));
    }

    match rt.block_on(kernel.install(id)) {
        Ok(summary) => {
            ui::success(&format!(
                "Installed {} {} by {}",
                summary.name.bold(),
                summary.version,
                summary.author
            ));
        }
        Err(e) => {
            ui::error(&format!("Install of '{id}' failed: {e}"));
            if e.is_retryable() {
                ui::hint("This looks transient; try again shortly.");
            }
            std::process::exit(1);
        }
    }
}

pub fn cmd_run(ctx: Context, id: &str, args: &str, kwargs: &str) {
    let args = StrategyArgs {
        args: parse_arg(args, "--args"),
        kwargs: parse_arg(kwargs, "--kwargs"),
    };

    let kernel = ctx.boot();
    let rt = runtime();
    match rt.block_on(kernel.execute(id, args)) {
        Ok(output) => print_json(&output),
        Err(e) => {
            ui::error(&format!("Strategy '{id}' did not run: {e}"));
            std::process::exit(1);
        }
    }
}

fn parse_arg<T: serde::de::DeserializeOwned>(raw: &str, flag: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        ui::error(&format!("{flag} is not valid JSON of the expected shape: {e}"));
        std::process::exit(2);
    })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            ui::error(&format!("Failed to encode output: {e}"));
            std::process::exit(1);
        }
    }
}
