//! triage-auth — drive the dashboard's session bootstrap from a terminal
//!
//! Runs the same bootstrap the dashboard runs on page load, against a real
//! backend, with the platform browser standing in for page navigation.

use clap::Parser;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};
use triage_auth::backend::HttpBackend;
use triage_auth::browser::{PrintNavigator, SystemBrowser};
use triage_auth::config::{self, Config};
use triage_auth::launch::StaticLocation;
use triage_auth::reauth::{Navigator, ReauthError};
use triage_auth::storage::{FileStorage, MemoryStorage, Storage};
use triage_auth::{Bootstrapper, LoopGuard, SessionStore};
use url::Url;

/// Exit code for a launch that is already in progress
const EXIT_CONFLICT: i32 = 2;

#[derive(Parser)]
#[command(name = "triage-auth", about = "PE dashboard session bootstrap")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Backend base URL (overrides config.json)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Print launch URLs instead of opening a browser
    #[arg(long, global = true)]
    no_open: bool,

    /// Keep session state in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the bootstrap for a page URL and print the resulting view
    Mount {
        /// Page URL, including any launch parameters
        #[arg(long)]
        url: Option<String>,
    },
    /// Start a sign-in now, ignoring the automatic-launch policy
    Reauth {
        #[arg(long)]
        url: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Ask the backend to drop a stuck in-progress launch
    Reset,
    /// Show the stored session and loop-guard state
    Show,
    /// Write the effective configuration to config.json
    InitConfig,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("TRIAGE_AUTH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn open_storage(ephemeral: bool) -> Arc<dyn Storage> {
    if ephemeral {
        return Arc::new(MemoryStorage::new());
    }
    match FileStorage::in_data_dir() {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            warn!(error = %e, "durable storage unavailable, using memory");
            Arc::new(MemoryStorage::new())
        }
    }
}

fn page_url(config: &Config, url: Option<&str>) -> Result<Url, String> {
    let raw = url.unwrap_or(&config.frontend_url);
    Url::parse(raw).map_err(|e| format!("invalid page URL '{raw}': {e}"))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut config = config::load_config();
    if let Some(backend) = cli.backend {
        config.backend_url = backend;
    }

    let storage = open_storage(cli.ephemeral);
    let backend = HttpBackend::new(&config).map_err(|e| e.to_string())?;
    let navigator: Arc<dyn Navigator> = if cli.no_open {
        Arc::new(PrintNavigator)
    } else {
        Arc::new(SystemBrowser)
    };

    let bootstrapper = |url: Option<&str>| -> Result<Bootstrapper, String> {
        let location = Arc::new(StaticLocation::new(page_url(&config, url)?));
        Ok(Bootstrapper::new(
            config.policy(),
            Arc::new(backend.clone()),
            Arc::clone(&storage),
            location,
            Arc::clone(&navigator),
        ))
    };

    match cli.command.unwrap_or(Command::Mount { url: None }) {
        Command::Mount { url } => {
            let view = bootstrapper(url.as_deref())?.mount().await;
            print_json(&view);
        }
        Command::Reauth { url } => {
            let boot = bootstrapper(url.as_deref())?;
            if let Err(ReauthError::LaunchConflict { status }) = boot.trigger_reauth().await {
                eprintln!("launch already in progress (HTTP {status}); run `triage-auth reset` if it is stuck");
                std::process::exit(EXIT_CONFLICT);
            }
        }
        Command::Logout => {
            bootstrapper(None)?.logout().await;
            println!("Signed out");
        }
        Command::Reset => {
            let status = backend.reset_launch().await.map_err(|e| e.to_string())?;
            println!("Backend launch state reset (HTTP {status})");
        }
        Command::Show => {
            let sessions = SessionStore::new(Arc::clone(&storage));
            let guard = LoopGuard::new(Arc::clone(&storage), config.policy().cooldown);
            print_json(&serde_json::json!({
                "sessionId": sessions.get(),
                "lastAttemptMillis": guard.last_attempt().map(|a| a.attempted_at_millis),
                "cooldownRemainingMillis": guard.cooldown_remaining().map(|d| d.as_millis() as u64),
            }));
        }
        Command::InitConfig => {
            config::save_config(&config).map_err(|e| format!("failed to save config: {e}"))?;
            println!("Config saved");
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Single-threaded, like the page this stands in for.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    if let Err(e) = rt.block_on(run(cli)) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_no_subcommand() {
        let cli = Cli::try_parse_from(["triage-auth"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
        assert!(!cli.no_open);
    }

    #[test]
    fn cli_verbose_three() {
        let cli = Cli::try_parse_from(["triage-auth", "-vvv"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn cli_mount_with_url() {
        let cli = Cli::try_parse_from([
            "triage-auth",
            "mount",
            "--url",
            "http://localhost:3000/?session=abc",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Mount { url }) => {
                assert_eq!(url.as_deref(), Some("http://localhost:3000/?session=abc"))
            }
            _ => panic!("expected Mount command"),
        }
    }

    #[test]
    fn cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "triage-auth",
            "reauth",
            "--no-open",
            "--backend",
            "http://pe.test",
        ])
        .unwrap();
        assert!(cli.no_open);
        assert_eq!(cli.backend.as_deref(), Some("http://pe.test"));
        assert!(matches!(cli.command, Some(Command::Reauth { url: None })));
    }

    #[test]
    fn cli_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["triage-auth", "mount", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Command::Mount { url: None })));
    }

    #[test]
    fn page_url_defaults_to_frontend() {
        let config = Config::default();
        assert_eq!(
            page_url(&config, None).unwrap().as_str(),
            "http://localhost:3000/"
        );
        assert!(page_url(&config, Some("::nope")).is_err());
    }
}
