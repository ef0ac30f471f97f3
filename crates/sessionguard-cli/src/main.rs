//! sessionguard - command-line driver for the blog admin session.
//!
//! Logs in against the blog API, shows the persisted session, and can sit in
//! the foreground running the inactivity countdown.

mod console;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionguard_core::api::{with_backoff, RetryPolicy};
use sessionguard_core::auth::KeychainKey;
use sessionguard_core::utils::{format_countdown, format_token_expiry};
use sessionguard_core::{
    Credentials, FileStore, SessionConfig, SessionManager, SessionStatus, StoreCipher,
};

use console::{ConsoleNavigator, ConsoleNotifier};

// ============================================================================
// Constants
// ============================================================================

/// How often `watch` redraws the countdown line (in milliseconds)
const WATCH_REDRAW_MS: u64 = 1000;

const USAGE: &str = "\
Usage: sessionguard <command>

Commands:
  login [username]        Log in (password from SESSIONGUARD_PASSWORD or prompt)
  status                  Show the stored session
  logout [--local] [--forget-key]
                          End the session; --local skips the server call,
                          --forget-key also removes the keychain store key
  watch                   Run the inactivity countdown in the foreground
                          (Enter = activity, e + Enter = stay logged in)";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes buffered log lines on drop.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let mut config = SessionConfig::load()?;
    config.apply_env()?;
    let manager = build_manager(&config)?;
    info!(command = %command, api = %config.api_base_url, "sessionguard starting");

    let result = match command.as_str() {
        "login" => login(&manager, rest.first().cloned()).await,
        "status" => status(&manager, &config).await,
        "logout" => logout(&manager, rest).await,
        "watch" => watch(&manager).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    };

    manager.destroy();
    result
}

fn build_manager(config: &SessionConfig) -> Result<SessionManager> {
    let mut store = FileStore::new(config.storage_dir()?)?;
    if config.encrypt_storage {
        let key = KeychainKey::load_or_create()?;
        store = store.with_cipher(StoreCipher::new(&key));
    }

    SessionManager::builder(config.clone())
        .store(Arc::new(store))
        .notifier(Arc::new(ConsoleNotifier))
        .navigator(Arc::new(ConsoleNavigator))
        .build()
        .context("Failed to set up session manager")
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

// ============================================================================
// Commands
// ============================================================================

async fn login(manager: &SessionManager, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var("SESSIONGUARD_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    let credentials = &Credentials::new(username, password);

    match with_backoff(RetryPolicy::default(), || manager.login(credentials)).await {
        Ok(user) => {
            let role = if user.is_superuser() {
                "superuser"
            } else if user.is_admin() {
                "staff"
            } else {
                "user"
            };
            println!("Logged in as {} ({})", user.display_name(), role);
            Ok(())
        }
        Err(e) => bail!("Login failed: {}", e.user_message()),
    }
}

async fn status(manager: &SessionManager, config: &SessionConfig) -> Result<()> {
    if !manager.restore().await {
        println!("Not logged in");
        return Ok(());
    }

    match manager.current_user() {
        Some(user) => println!("User:     {} (id {})", user.display_name(), user.id),
        None => println!("User:     unknown"),
    }
    println!("Admin:    {}", if manager.is_admin() { "yes" } else { "no" });

    if let Some(pair) = manager.lifecycle().load_tokens() {
        let now = Utc::now();
        for (label, token) in [("Access:", &pair.access), ("Refresh:", &pair.refresh)] {
            println!("{:<9} {}", label, format_token_expiry(token, now));
        }
    }

    if config.encrypt_storage {
        let stored = if KeychainKey::exists() { "present" } else { "missing" };
        println!("Store key: {}", stored);
    }
    Ok(())
}

async fn logout(manager: &SessionManager, flags: &[String]) -> Result<()> {
    let local_only = flags.iter().any(|f| f == "--local");
    let forget_key = flags.iter().any(|f| f == "--forget-key");

    manager.logout(!local_only).await;
    println!("Logged out");

    if forget_key && KeychainKey::exists() {
        KeychainKey::delete()?;
        println!("Removed store key from keychain");
    }
    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    if !manager.restore().await {
        bail!("Not logged in - run `sessionguard login` first");
    }

    let mut state = manager.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut redraw = tokio::time::interval(Duration::from_millis(WATCH_REDRAW_MS));

    println!("Watching session. Enter = activity, e + Enter = stay logged in.");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    None => break,
                    Some("e") => match manager.extend_session().await {
                        Ok(()) => println!("Session extended"),
                        Err(e) => eprintln!("Could not extend session: {}", e.user_message()),
                    },
                    Some(_) => manager.record_activity(),
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = redraw.tick() => {}
        }

        let snapshot = state.borrow().clone();
        match snapshot.status {
            SessionStatus::Warning => println!(
                "Session expires in {}",
                format_countdown(snapshot.remaining_seconds.unwrap_or(0))
            ),
            SessionStatus::Expired | SessionStatus::Inactive => break,
            SessionStatus::Active => {}
        }
    }
    Ok(())
}
