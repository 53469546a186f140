use clap::{Parser, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use super::utils::{info as print_info, success};

#[derive(Parser)]
pub struct JobArgs {
    /// Base URL of the admin surface
    #[arg(long, global = true, default_value = "http://127.0.0.1:7777", env = "PLUGHOST_ADMIN_URL")]
    pub admin_url: String,

    #[command(subcommand)]
    pub command: JobCommand,
}

#[derive(Subcommand)]
pub enum JobCommand {
    /// List every registered job across every plugin
    List,

    /// Show the recent run history of one job
    History(JobIdArgs),

    /// Run a job once now, without altering its schedule
    Trigger(JobIdArgs),

    /// Pause a job's dispatch
    Pause(JobIdArgs),

    /// Resume a paused job's dispatch
    Resume(JobIdArgs),
}

#[derive(Parser)]
pub struct JobIdArgs {
    /// Composite job id, `plugin::job_id`
    pub id: String,
}

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    plugin: String,
    priority: String,
    paused: String,
    in_flight: String,
    next_run: String,
}

fn to_row(status: &serde_json::Value) -> JobRow {
    let get_str = |key: &str| status.get(key).and_then(|v| v.as_str()).unwrap_or("?").to_string();
    let get_bool = |key: &str| status.get(key).and_then(|v| v.as_bool()).unwrap_or(false).to_string();

    JobRow {
        job_id: get_str("job_id"),
        plugin: get_str("plugin"),
        priority: status
            .get("priority")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string()),
        paused: get_bool("paused"),
        in_flight: get_bool("in_flight"),
        next_run: status
            .get("next_run")
            .and_then(|v| v.as_str())
            .unwrap_or("-")
            .to_string(),
    }
}

pub async fn execute(args: JobArgs) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let base = format!("{}/admin/jobs", args.admin_url.trim_end_matches('/'));

    match args.command {
        JobCommand::List => {
            let statuses: Vec<serde_json::Value> = client.get(&base).send().await?.error_for_status()?.json().await?;
            let rows: Vec<JobRow> = statuses.iter().map(to_row).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        JobCommand::History(JobIdArgs { id }) => {
            let runs: serde_json::Value = client
                .get(format!("{base}/{id}/history"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        JobCommand::Trigger(JobIdArgs { id }) => {
            print_info(&format!("triggering {id}..."));
            client.post(format!("{base}/{id}/trigger")).send().await?.error_for_status()?;
            success(&format!("{id} triggered"));
        }
        JobCommand::Pause(JobIdArgs { id }) => {
            client.post(format!("{base}/{id}/pause")).send().await?.error_for_status()?;
            success(&format!("{id} paused"));
        }
        JobCommand::Resume(JobIdArgs { id }) => {
            client.post(format!("{base}/{id}/resume")).send().await?.error_for_status()?;
            success(&format!("{id} resumed"));
        }
    }

    Ok(())
}
