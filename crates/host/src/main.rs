use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod resolver;
mod runner;

#[derive(Parser)]
#[command(name = "plughost")]
#[command(version, about = "Plugin host runtime", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host: load plugins, start the scheduler, serve the admin surface
    Serve(commands::serve::ServeArgs),

    /// Inspect and control mounted plugins through the admin surface
    Plugin(commands::plugin::PluginArgs),

    /// Inspect and control scheduled jobs through the admin surface
    Job(commands::job::JobArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("plughost={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute the command
    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args).await,
        Commands::Plugin(args) => commands::plugin::execute(args).await,
        Commands::Job(args) => commands::job::execute(args).await,
    };

    if let Err(ref err) = result {
        if let Some(exit) = err.downcast_ref::<commands::HostExit>() {
            std::process::exit(exit.code);
        }
    }

    result
}
