use clap::{Parser, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use super::utils::{error, info as print_info, success};

#[derive(Parser)]
pub struct PluginArgs {
    /// Base URL of the admin surface
    #[arg(long, global = true, default_value = "http://127.0.0.1:7777", env = "PLUGHOST_ADMIN_URL")]
    pub admin_url: String,

    #[command(subcommand)]
    pub command: PluginCommand,
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List every mounted plugin
    List,

    /// Show one plugin's state and statistics
    Show(PluginNameArgs),

    /// Reload one plugin
    Reload(PluginNameArgs),

    /// Stop one plugin
    Stop(PluginNameArgs),
}

#[derive(Parser)]
pub struct PluginNameArgs {
    /// Plugin name
    pub name: String,
}

#[derive(Tabled)]
struct PluginRow {
    name: String,
    status: String,
    pending_calls: String,
    recent_crashes: String,
}

fn to_row(stats: &serde_json::Value) -> PluginRow {
    let name = stats.get("plugin").and_then(|v| v.as_str()).unwrap_or("?").to_string();
    let status = stats
        .get("state")
        .and_then(|v| v.get("status"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let pending_calls = stats
        .get("pending_call_count")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "0".to_string());
    let recent_crashes = stats
        .get("recent_crashes")
        .and_then(|v| v.as_array())
        .map(|a| a.len().to_string())
        .unwrap_or_else(|| "0".to_string());

    PluginRow {
        name,
        status,
        pending_calls,
        recent_crashes,
    }
}

pub async fn execute(args: PluginArgs) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let base = format!("{}/admin/plugins", args.admin_url.trim_end_matches('/'));

    match args.command {
        PluginCommand::List => {
            let stats: Vec<serde_json::Value> = client.get(&base).send().await?.error_for_status()?.json().await?;
            let rows: Vec<PluginRow> = stats.iter().map(to_row).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        PluginCommand::Show(PluginNameArgs { name }) => {
            let resp = client.get(format!("{base}/{name}")).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                error(&format!("no such plugin: {name}"));
                return Ok(());
            }
            let stats: serde_json::Value = resp.error_for_status()?.json().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        PluginCommand::Reload(PluginNameArgs { name }) => {
            print_info(&format!("reloading {name}..."));
            client.post(format!("{base}/{name}/reload")).send().await?.error_for_status()?;
            success(&format!("{name} reloaded"));
        }
        PluginCommand::Stop(PluginNameArgs { name }) => {
            print_info(&format!("stopping {name}..."));
            client.post(format!("{base}/{name}/stop")).send().await?.error_for_status()?;
            success(&format!("{name} stopped"));
        }
    }

    Ok(())
}
