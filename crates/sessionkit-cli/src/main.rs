//! sessionkit CLI - sign in, sign out and manage the profile from a shell.
//!
//! Every invocation restores the stored session first (renewing the token
//! if it is about to expire), then runs one command.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkit_core::api::{AuthBackend, HttpAuthBackend, InMemoryAuthBackend};
use sessionkit_core::config::ENV_STORE_PASSPHRASE;
use sessionkit_core::store::{EncryptedFileStore, KeyringStore, SecureStore};
use sessionkit_core::validation::{
    sanitize, validate_email, validate_full_name, validate_login_form, validate_password,
    validate_register_form,
};
use sessionkit_core::{
    BackendKind, Config, ProfileUpdate, SessionError, SessionManager, StorageKind, TokenService,
};

// ============================================================================
// Constants
// ============================================================================

/// Account seeded into the demo backend
const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "Demo1234!";
const DEMO_NAME: &str = "Demo User";

const LOG_FILE: &str = "sessionkit.log";

const USAGE: &str = "\
Usage: sessionkit <command> [args]

Commands:
  status                          Show the current session
  login [email]                   Sign in (password is prompted)
  register <email> <name...>      Create an account and sign in
  logout                          Sign out and clear stored credentials
  refresh                         Renew the access token now
  profile                         Fetch the profile from the server
  update-profile [--name N] [--avatar URL]
  change-password                 Change the password (both prompted)
  delete-account                  Delete the account and sign out

Environment:
  SESSIONKIT_API_URL, SESSIONKIT_TIMEOUT_SECS, SESSIONKIT_RENEWAL_BUFFER_SECS,
  SESSIONKIT_STORAGE (keyring|file), SESSIONKIT_BACKEND (http|demo),
  SESSIONKIT_STORE_PASSPHRASE, RUST_LOG";

/// Initialize the tracing subscriber: stderr plus a log file in the data
/// directory. Use RUST_LOG to control the level (default `warn`).
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let data_dir = Config::data_dir().ok();
    let _log_guard = init_tracing(data_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    info!(command, backend = ?config.backend, storage = ?config.storage, "sessionkit starting");

    let store = open_store(&config)?;
    let backend = open_backend(&config)?;
    let tokens = TokenService::new(store.clone(), backend.clone())
        .with_default_ttl(config.default_token_ttl());
    let manager =
        SessionManager::new(store, tokens, backend).with_renewal_buffer(config.renewal_buffer());

    manager.initialize().await;

    let rest = &args[1..];
    match command {
        "status" => status(&manager).await,
        "login" => login(&manager, &mut config, rest).await,
        "register" => register(&manager, &mut config, rest).await,
        "logout" => {
            manager.logout().await.map_err(report)?;
            println!("Signed out.");
            Ok(())
        }
        "refresh" => {
            let pair = manager.refresh_session().await.map_err(report)?;
            println!(
                "Token renewed, valid for {} more minutes.",
                pair.minutes_until_expiry()
            );
            Ok(())
        }
        "profile" => {
            let user = manager.reload_profile().await.map_err(report)?;
            print_user(&user);
            Ok(())
        }
        "update-profile" => update_profile(&manager, rest).await,
        "change-password" => change_password(&manager).await,
        "delete-account" => delete_account(&manager).await,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn open_store(config: &Config) -> Result<Arc<dyn SecureStore>> {
    match config.storage {
        StorageKind::Keyring => Ok(Arc::new(KeyringStore::new(config.service_name.clone()))),
        StorageKind::File => {
            let dir = Config::data_dir()?.join("store");
            let passphrase = match std::env::var(ENV_STORE_PASSPHRASE) {
                Ok(passphrase) => passphrase,
                Err(_) => rpassword::prompt_password("Store passphrase: ")?,
            };
            let store = EncryptedFileStore::open(&dir, &passphrase)
                .with_context(|| format!("Failed to open credential store in {}", dir.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn open_backend(config: &Config) -> Result<Arc<dyn AuthBackend>> {
    match config.backend {
        BackendKind::Http => {
            let backend =
                HttpAuthBackend::with_timeout(&config.api_base_url, config.request_timeout())
                    .context("Failed to create HTTP client")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Demo => {
            debug!("Using in-process demo backend");
            Ok(Arc::new(InMemoryAuthBackend::new().with_account(
                DEMO_EMAIL,
                DEMO_PASSWORD,
                DEMO_NAME,
            )))
        }
    }
}

/// Turn a session failure into a user-facing error, keeping the detail in
/// the log
fn report(err: SessionError) -> anyhow::Error {
    debug!(error = %err, "Command failed");
    anyhow!(err.user_message())
}

// ============================================================================
// Commands
// ============================================================================

async fn status(manager: &SessionManager) -> Result<()> {
    let state = manager.state();
    let Some(user) = state.user else {
        println!("Not signed in.");
        return Ok(());
    };

    print_user(&user);
    let expiry = manager
        .tokens()
        .stored_pair()
        .await
        .map_err(|e| report(e.into()))?;
    if let Some(pair) = expiry {
        println!("Token:   expires in {} minutes", pair.minutes_until_expiry());
    }
    Ok(())
}

async fn login(manager: &SessionManager, config: &mut Config, args: &[String]) -> Result<()> {
    let email = match args.first() {
        Some(email) => email.clone(),
        None => prompt("Email", config.last_email.as_deref())?,
    };
    let email = sanitize(&email);
    let password = rpassword::prompt_password("Password: ")?;

    let errors = validate_login_form(&email, &password);
    if !errors.is_valid() {
        bail!(errors.messages().join("\n"));
    }

    let user = manager.login(&email, &password).await.map_err(report)?;
    remember_email(config, &user.email);
    println!("Signed in as {}.", user.display_name());
    Ok(())
}

async fn register(manager: &SessionManager, config: &mut Config, args: &[String]) -> Result<()> {
    let (email, name) = match args {
        [email, name @ ..] if !name.is_empty() => (sanitize(email), sanitize(&name.join(" "))),
        _ => bail!("Usage: sessionkit register <email> <name...>"),
    };
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let errors = validate_register_form(&email, &password, &name);
    if !errors.is_valid() {
        bail!(errors.messages().join("\n"));
    }
    if let Some(strength) = errors.password_strength {
        println!("Password strength: {}", strength);
    }

    let user = manager
        .register(&email, &password, &name)
        .await
        .map_err(report)?;
    remember_email(config, &user.email);
    println!("Welcome, {}.", user.display_name());
    Ok(())
}

async fn update_profile(manager: &SessionManager, args: &[String]) -> Result<()> {
    let mut update = ProfileUpdate::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("Missing value for {}", flag))?;
        match flag.as_str() {
            "--name" => {
                let name = sanitize(value);
                validate_full_name(&name)?;
                update.name = Some(name);
            }
            "--avatar" => update.avatar = Some(sanitize(value)),
            other => bail!("Unknown option '{}'", other),
        }
    }
    if update.is_empty() {
        bail!("Nothing to update: pass --name and/or --avatar");
    }

    let user = manager.update_profile(update).await.map_err(report)?;
    print_user(&user);
    Ok(())
}

async fn change_password(manager: &SessionManager) -> Result<()> {
    let current = rpassword::prompt_password("Current password: ")?;
    let new = rpassword::prompt_password("New password: ")?;
    let strength = validate_password(&new)?;
    debug!(%strength, "New password accepted");

    manager
        .change_password(&current, &new)
        .await
        .map_err(report)?;
    println!("Password changed.");
    Ok(())
}

async fn delete_account(manager: &SessionManager) -> Result<()> {
    let Some(user) = manager.current_user() else {
        return Err(report(SessionError::NotAuthenticated));
    };
    let answer = prompt(&format!("Delete account {}? Type 'yes' to confirm", user.email), None)?;
    if answer != "yes" {
        println!("Cancelled.");
        return Ok(());
    }

    manager.delete_account().await.map_err(report)?;
    println!("Account deleted.");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    match (line.is_empty(), default) {
        (true, Some(default)) => Ok(default.to_string()),
        _ => Ok(line.to_string()),
    }
}

/// Store the email for the next login prompt. A failure here never fails
/// the command.
fn remember_email(config: &mut Config, email: &str) {
    if validate_email(email).is_err() || config.last_email.as_deref() == Some(email) {
        return;
    }
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to save config");
    }
}

fn print_user(user: &sessionkit_core::User) {
    println!("User:    {} <{}>", user.display_name(), user.email);
    println!("ID:      {}", user.id);
    if let Some(ref avatar) = user.avatar {
        println!("Avatar:  {}", avatar);
    }
    if let Some(created_at) = user.created_at {
        println!("Since:   {}", created_at.format("%Y-%m-%d"));
    }
}
