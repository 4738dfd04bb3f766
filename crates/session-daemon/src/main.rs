//! Session daemon - serves an application's session to all of its processes.

mod app;
mod commands;

use clap::{Parser, Subcommand};
use session_config_and_utils::{init_logging, AppIdentity, Config, Paths};
use std::path::PathBuf;

/// Session daemon command-line interface.
#[derive(Parser)]
#[command(name = "session-daemon")]
#[command(about = "Cross-process session store with a supervised background service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files. Defaults to ~/.session-service/<app-id>
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Application id. Falls back to SESSION_APP_ID, then the executable name
    #[arg(long, global = true)]
    app_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session service
    Start {
        /// Promote to foreground right away instead of on first bind
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the session service and its supervisor
    Stop,
    /// Check service status
    Status,
    /// Run the restart supervisor
    Supervise,
    /// Read or clear the session through the running service
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    /// Inspect the session vault directly
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub(crate) enum TokenCommand {
    /// Print the access token
    Access,
    /// Print the refresh token
    Refresh,
    /// Print the id token
    Id,
    /// Print whether the session is authenticated
    Status,
    /// Clear the session
    Logout,
}

#[derive(Subcommand, Clone, Copy)]
pub(crate) enum VaultCommand {
    /// Presence, length and readability of every session key
    Inspect,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let identity = AppIdentity::resolve(cli.app_id.as_deref())?;
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::for_app(&identity)?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;
    let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());

    match cli.command.unwrap_or(Commands::Start { foreground: false }) {
        Commands::Start { foreground } => {
            init_logging(&log_level, "session-daemon", &paths, true);
            app::run_daemon(identity, paths, config, log_level, foreground).await?;
        }
        Commands::Supervise => {
            init_logging(&log_level, "session-supervisor", &paths, true);
            app::run_supervisor(identity, paths, config, log_level).await?;
        }
        Commands::Stop => {
            init_logging(&log_level, "session-cli", &paths, false);
            app::stop_all(&paths).await?;
        }
        Commands::Status => {
            init_logging(&log_level, "session-cli", &paths, false);
            app::check_status(&paths).await?;
        }
        Commands::Token { command } => {
            init_logging(&log_level, "session-cli", &paths, false);
            commands::token(&identity, &paths, command).await?;
        }
        Commands::Vault { command } => {
            init_logging(&log_level, "session-cli", &paths, false);
            commands::vault(&identity, &paths, &config, command)?;
        }
    }

    Ok(())
}
