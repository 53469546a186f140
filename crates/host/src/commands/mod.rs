pub mod job;
pub mod plugin;
pub mod serve;

/// Carries a specific process exit code out through an `anyhow::Error`, so `main` can
/// distinguish a config failure (1) from a runtime failure (2) without commands
/// returning anything other than `anyhow::Result`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HostExit {
    pub code: i32,
    pub message: String,
}

impl HostExit {
    pub fn config(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self {
            code: 1,
            message: message.into(),
        })
    }

    pub fn runtime(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self {
            code: 2,
            message: message.into(),
        })
    }
}

/// Common utilities for all commands
pub mod utils {
    use console::style;

    pub fn success(message: &str) {
        println!("{} {}", style("✓").green().bold(), style(message).green());
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(message).red());
    }

    pub fn info(message: &str) {
        println!("{} {}", style("ℹ").blue().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
    }
}
