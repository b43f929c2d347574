//! Flock admin CLI
//!
//! Thin front end over the session client: signs in, keeps the remembered
//! session on disk, and issues authenticated calls that refresh expired
//! credentials transparently.

mod config;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use flock_auth::{CredentialStore, FileStorage};
use flock_session::{SessionClient, SessionOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{ApiRequest, HttpTransport};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "flock-admin")]
#[command(about = "Command-line client for the Flock church administration API")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "FLOCK_CONFIG",
        default_value = "flock-admin.toml"
    )]
    config: PathBuf,

    /// Print session metrics in Prometheus text format to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        username: String,
        /// Keep the session on disk across runs
        #[arg(long)]
        remember: bool,
        /// Read the password from this file when FLOCK_PASSWORD is unset
        #[arg(long)]
        password_file: Option<PathBuf>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user without contacting the backend
    Whoami,
    /// Authenticated GET, printing the JSON response
    Get {
        /// API path, e.g. /members
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = cli.config;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        config_path = %config_path.display(),
        base_url = %config.api.base_url,
        "configuration loaded"
    );

    let client = build_client(&config)?;
    let outcome = run(cli.command, &client).await;

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }
    outcome
}

fn build_client(config: &Config) -> Result<SessionClient> {
    let transport = HttpTransport::builder()
        .base_url(&config.api.base_url)
        .timeout(config.timeout())
        .build()
        .context("failed to build HTTP client")?;
    let storage = FileStorage::open(&config.storage.dir).with_context(|| {
        format!(
            "failed to open session storage in {}",
            config.storage.dir.display()
        )
    })?;
    let store = Arc::new(CredentialStore::new(Arc::new(storage)));

    Ok(SessionClient::new(
        Arc::new(transport),
        store,
        SessionOptions {
            refresh_timeout: config.refresh_timeout(),
        },
    ))
}

async fn run(command: Command, client: &SessionClient) -> Result<()> {
    match command {
        Command::Login {
            username,
            remember,
            password_file,
        } => {
            let password = config::resolve_password(password_file.as_deref())
                .context("no password available")?;
            let profile = client
                .login(&username, &password, remember)
                .await
                .context("login failed")?;
            if !remember {
                warn!("session not remembered; it ends when this process exits");
            }
            print_json(&profile)
        }
        Command::Logout => {
            if client.restore().is_none() {
                info!("no stored session");
            }
            client.logout().await;
            Ok(())
        }
        Command::Whoami => match client.restore() {
            Some(profile) => print_json(&profile),
            None => bail!("not signed in; run `flock-admin login --remember <username>`"),
        },
        Command::Get { path } => {
            if client.restore().is_none() {
                bail!("not signed in; run `flock-admin login --remember <username>`");
            }
            let body: serde_json::Value = client
                .execute(ApiRequest::get(path.as_str()))
                .await
                .with_context(|| format!("GET {path} failed"))?;
            print_json(&body)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{ENV_MUTEX, remove_env, set_env};
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_login_with_global_flags() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from([
            "flock-admin",
            "login",
            "tabitha",
            "--remember",
            "--password-file",
            "/run/secrets/pw",
            "--config",
            "/etc/flock-admin.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/flock-admin.toml"));
        match cli.command {
            Command::Login {
                username,
                remember,
                password_file,
            } => {
                assert_eq!(username, "tabitha");
                assert!(remember);
                assert_eq!(password_file, Some(PathBuf::from("/run/secrets/pw")));
            }
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn parses_get_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from(["flock-admin", "--metrics", "get", "/members"]).unwrap();
        assert!(cli.metrics);
        assert!(matches!(cli.command, Command::Get { ref path } if path == "/members"));
    }

    #[test]
    fn config_path_defaults_to_working_directory() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_CONFIG") };
        let cli = Cli::try_parse_from(["flock-admin", "whoami"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("flock-admin.toml"));
    }

    #[test]
    fn config_path_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("FLOCK_CONFIG", "/env/path.toml") };
        let cli = Cli::try_parse_from(["flock-admin", "whoami"]);
        unsafe { remove_env("FLOCK_CONFIG") };
        assert_eq!(cli.unwrap().config, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn config_flag_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("FLOCK_CONFIG", "/env/should-lose.toml") };
        let cli = Cli::try_parse_from(["flock-admin", "--config", "/cli/wins.toml", "logout"]);
        unsafe { remove_env("FLOCK_CONFIG") };
        assert_eq!(cli.unwrap().config, PathBuf::from("/cli/wins.toml"));
    }

    #[test]
    fn subcommand_is_required() {
        let _lock = ENV_MUTEX.lock().unwrap();
        assert!(Cli::try_parse_from(["flock-admin"]).is_err());
    }

    #[tokio::test]
    async fn whoami_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            api: config::ApiConfig {
                base_url: "http://127.0.0.1:9".into(),
                timeout_secs: 1,
                refresh_timeout_secs: None,
            },
            storage: config::StorageConfig {
                dir: dir.path().to_path_buf(),
            },
        };
        let client = build_client(&config).unwrap();

        let err = run(Command::Whoami, &client).await.unwrap_err();
        assert!(err.to_string().contains("not signed in"), "got: {err}");
        // Logging out with nothing stored is fine
        run(Command::Logout, &client).await.unwrap();
    }
}
