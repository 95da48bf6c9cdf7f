//! Strongroom CLI - Command line interface for the secrets vault.
//!
//! Every command runs against the SQLite database named in the
//! configuration and prints JSON on stdout.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use zeroize::Zeroizing;

use strongroom_app::{status_code, telemetry, AppConfig, Services};
use strongroom_common::{DataId, DataItem, DataType, Error, User};

#[derive(Parser)]
#[command(name = "strongroom")]
#[command(about = "Strongroom - Encrypted secrets vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "STRONGROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Access token for commands acting on your data.
    #[arg(long, global = true, env = "STRONGROOM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account.
    Register {
        #[arg(short, long)]
        email: String,
    },

    /// Log in and print an access/refresh token pair.
    Login {
        #[arg(short, long)]
        email: String,
    },

    /// Exchange a refresh token for a new pair.
    Refresh {
        #[arg(short, long)]
        refresh_token: String,
    },

    /// End the session holding a refresh token.
    Logout {
        #[arg(short, long)]
        refresh_token: String,
    },

    /// End every session of the current user.
    LogoutAll,

    /// Store a new secret.
    Add {
        /// One of: login_password, text_data, binary_data, bank_card.
        #[arg(short = 't', long = "type")]
        data_type: DataType,

        #[arg(short, long)]
        name: String,

        /// Free-form metadata, stored unencrypted.
        #[arg(short, long, default_value = "")]
        metadata: String,

        /// Secret value; prompted for when neither this nor --file is given.
        #[arg(long, conflicts_with = "file")]
        value: Option<String>,

        /// Read the secret from a file.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show a secret.
    Get {
        #[arg(short, long)]
        id: DataId,

        /// Decrypt and include the secret value.
        #[arg(long)]
        reveal: bool,

        /// Write the decrypted value to a file instead of stdout.
        #[arg(short, long, requires = "reveal")]
        output: Option<PathBuf>,
    },

    /// List your secrets, newest change first.
    List {
        #[arg(short = 't', long = "type")]
        data_type: Option<DataType>,
    },

    /// Replace a secret's name, metadata and value.
    Update {
        #[arg(short, long)]
        id: DataId,

        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        metadata: String,

        #[arg(long, conflicts_with = "file")]
        value: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a secret. Its version history is kept.
    Delete {
        #[arg(short, long)]
        id: DataId,
    },

    /// List secrets changed after a point in time.
    Sync {
        /// RFC 3339 timestamp; defaults to the beginning of time.
        #[arg(short, long)]
        since: Option<DateTime<Utc>>,
    },

    /// Show the version history of a secret.
    History {
        #[arg(short, long)]
        id: DataId,
    },

    /// Remove expired sessions.
    SweepSessions,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Serialize)]
struct OpenedItem<'a> {
    #[serde(flatten)]
    item: &'a DataItem,
    data: String,
}

#[derive(Serialize)]
struct ErrorReport {
    error: String,
    status: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "strongroom", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = err.downcast_ref::<Error>().map(status_code).unwrap_or(500);
            let report = ErrorReport {
                error: format!("{:#}", err),
                status,
            };
            match serde_json::to_string(&report) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    telemetry::init(&config.logging, cli.verbose).map_err(|e| anyhow!(e))?;

    let services = Services::open(&config).context("Failed to open database")?;
    let token = cli.token.as_deref();

    match cli.command {
        Commands::Register { email } => cmd_register(&services, &email).await,
        Commands::Login { email } => cmd_login(&services, &email).await,
        Commands::Refresh { refresh_token } => cmd_refresh(&services, &refresh_token).await,
        Commands::Logout { refresh_token } => cmd_logout(&services, &refresh_token).await,
        Commands::LogoutAll => cmd_logout_all(&services, token).await,
        Commands::Add {
            data_type,
            name,
            metadata,
            value,
            file,
        } => cmd_add(&services, token, data_type, &name, &metadata, value, file.as_deref()).await,
        Commands::Get { id, reveal, output } => {
            cmd_get(&services, token, id, reveal, output.as_deref()).await
        }
        Commands::List { data_type } => cmd_list(&services, token, data_type).await,
        Commands::Update {
            id,
            name,
            metadata,
            value,
            file,
        } => cmd_update(&services, token, id, &name, &metadata, value, file.as_deref()).await,
        Commands::Delete { id } => cmd_delete(&services, token, id).await,
        Commands::Sync { since } => cmd_sync(&services, token, since).await,
        Commands::History { id } => cmd_history(&services, token, id).await,
        Commands::SweepSessions => cmd_sweep_sessions(&services).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", json);
    Ok(())
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Resolve the secret payload from --value, --file or a hidden prompt.
async fn read_payload(value: Option<String>, file: Option<&Path>) -> Result<Zeroizing<Vec<u8>>> {
    if let Some(value) = value {
        return Ok(Zeroizing::new(value.into_bytes()));
    }
    if let Some(path) = file {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Zeroizing::new(bytes));
    }
    let value = prompt_password("Secret value: ")?;
    Ok(Zeroizing::new(value.as_bytes().to_vec()))
}

async fn current_user(services: &Services, token: Option<&str>) -> Result<User> {
    let token = token.context("No access token: pass --token or set STRONGROOM_TOKEN")?;
    let user = services
        .authenticate(token)
        .await
        .context("Authentication failed")?;
    Ok(user)
}

async fn cmd_register(services: &Services, email: &str) -> Result<()> {
    let password = prompt_password("Choose password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    let user = services
        .auth
        .register(email, &password)
        .await
        .context("Registration failed")?;

    info!(user_id = %user.id, "Account registered");
    print_json(&user)
}

async fn cmd_login(services: &Services, email: &str) -> Result<()> {
    let password = prompt_password("Password: ")?;
    let outcome = match services.auth.login(email, &password).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Login rejected");
            return Err(e).context("Login failed");
        }
    };

    info!(user_id = %outcome.user.id, "Logged in");
    print_json(&outcome)
}

async fn cmd_refresh(services: &Services, refresh_token: &str) -> Result<()> {
    let tokens = services
        .auth
        .refresh_token(refresh_token)
        .await
        .context("Token refresh failed")?;
    print_json(&tokens)
}

async fn cmd_logout(services: &Services, refresh_token: &str) -> Result<()> {
    services
        .auth
        .logout(refresh_token)
        .await
        .context("Logout failed")?;
    print_json(&serde_json::json!({ "logged_out": true }))
}

async fn cmd_logout_all(services: &Services, token: Option<&str>) -> Result<()> {
    let user = current_user(services, token).await?;
    let closed = services.auth.logout_all(user.id).await?;
    info!(user_id = %user.id, closed, "All sessions closed");
    print_json(&serde_json::json!({ "sessions_closed": closed }))
}

async fn cmd_add(
    services: &Services,
    token: Option<&str>,
    data_type: DataType,
    name: &str,
    metadata: &str,
    value: Option<String>,
    file: Option<&Path>,
) -> Result<()> {
    let user = current_user(services, token).await?;
    let payload = read_payload(value, file).await?;

    let item = services
        .vault
        .create_data(user.id, data_type, name, metadata, &payload)
        .await
        .context("Failed to store secret")?;

    info!(data_id = %item.id, "Secret stored");
    print_json(&item)
}

async fn cmd_get(
    services: &Services,
    token: Option<&str>,
    id: DataId,
    reveal: bool,
    output: Option<&Path>,
) -> Result<()> {
    let user = current_user(services, token).await?;

    if !reveal {
        let item = services.vault.get_data(user.id, id).await?;
        return print_json(&item);
    }

    let (item, plaintext) = services
        .vault
        .open_data(user.id, id)
        .await
        .context("Failed to open secret")?;

    match output {
        Some(path) => {
            tokio::fs::write(path, plaintext.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            print_json(&item)
        }
        None => {
            let data = String::from_utf8_lossy(plaintext.as_bytes()).into_owned();
            print_json(&OpenedItem { item: &item, data })
        }
    }
}

async fn cmd_list(
    services: &Services,
    token: Option<&str>,
    data_type: Option<DataType>,
) -> Result<()> {
    let user = current_user(services, token).await?;
    let items = match data_type {
        Some(data_type) => services.vault.get_user_data_by_type(user.id, data_type).await?,
        None => services.vault.get_user_data(user.id).await?,
    };
    print_json(&items)
}

async fn cmd_update(
    services: &Services,
    token: Option<&str>,
    id: DataId,
    name: &str,
    metadata: &str,
    value: Option<String>,
    file: Option<&Path>,
) -> Result<()> {
    let user = current_user(services, token).await?;
    let payload = read_payload(value, file).await?;

    let item = services
        .vault
        .update_data(user.id, id, name, metadata, &payload)
        .await
        .context("Failed to update secret")?;

    info!(data_id = %item.id, version = item.version, "Secret updated");
    print_json(&item)
}

async fn cmd_delete(services: &Services, token: Option<&str>, id: DataId) -> Result<()> {
    let user = current_user(services, token).await?;
    services
        .vault
        .delete_data(user.id, id)
        .await
        .context("Failed to delete secret")?;

    info!(data_id = %id, "Secret deleted");
    print_json(&serde_json::json!({ "deleted": id }))
}

async fn cmd_sync(
    services: &Services,
    token: Option<&str>,
    since: Option<DateTime<Utc>>,
) -> Result<()> {
    let user = current_user(services, token).await?;
    let since = since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let items = services.vault.sync_data(user.id, since).await?;
    print_json(&items)
}

async fn cmd_history(services: &Services, token: Option<&str>, id: DataId) -> Result<()> {
    let user = current_user(services, token).await?;
    let versions = services.vault.get_versions(user.id, id).await?;
    print_json(&versions)
}

async fn cmd_sweep_sessions(services: &Services) -> Result<()> {
    let removed = services.auth.purge_expired_sessions().await?;
    info!(removed, "Expired sessions removed");
    print_json(&serde_json::json!({ "sessions_removed": removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "strongroom",
            "--token",
            "abc",
            "add",
            "--type",
            "bank_card",
            "--name",
            "visa",
            "--value",
            "4111",
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        match cli.command {
            Commands::Add {
                data_type, value, ..
            } => {
                assert_eq!(data_type, DataType::BankCard);
                assert_eq!(value.as_deref(), Some("4111"));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["strongroom", "list", "--type", "poem"]).is_err());
    }

    #[test]
    fn test_parse_sync_since() {
        let cli =
            Cli::try_parse_from(["strongroom", "sync", "--since", "2024-01-01T00:00:00Z"]).unwrap();
        match cli.command {
            Commands::Sync { since } => assert!(since.is_some()),
            _ => panic!("expected sync"),
        }
    }
}
