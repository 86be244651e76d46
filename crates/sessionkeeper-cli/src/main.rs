//! sessionkeeper - command-line front-end for the wallet session manager.
//!
//! Signs in against the auth backend, reports the persisted session, and can
//! stay resident (`watch`) to keep the session refreshed until interrupted.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use sessionkeeper_core::auth::{AuthError, AuthRoute, SessionEvent, SessionManager, SessionStore};
use sessionkeeper_core::config::{Config, ENV_PASSWORD};
use sessionkeeper_core::{FileSessionPersistence, HttpAuthApi};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for rolling log files. Unset means stderr only.
const ENV_LOG_DIR: &str = "SESSIONKEEPER_LOG_DIR";

/// File name prefix for rolling logs
const LOG_FILE_NAME: &str = "sessionkeeper.log";

const USAGE: &str = "\
Usage: sessionkeeper <command>

Commands:
  login [email]        Sign in (password from SESSIONKEEPER_PASSWORD or prompt)
  register <email>     Create an account and wait for the emailed code
  verify-email <code>  Confirm registration with the 6-digit code
  unlock               Enter the app passcode
  set-passcode         Choose a new 6-digit passcode
  status               Show the stored session
  refresh              Rotate the access token now
  logout               Sign out and remove the stored session
  watch                Keep the session alive until interrupted";

/// Initialize the tracing subscriber for logging
fn init_tracing(default_level: &str) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
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

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);
    let arg = args.get(2).map(String::as_str);

    let _log_guard = init_tracing(if command == Some("watch") { "info" } else { "warn" });

    let mut config = Config::load()?;
    let manager = build_manager(&config)?;

    match command {
        Some("login") => login(&manager, &mut config, arg).await,
        Some("register") => register(&manager, &mut config, arg).await,
        Some("verify-email") => verify_email(&manager, arg).await,
        Some("unlock") => unlock(&manager).await,
        Some("set-passcode") => set_passcode(&manager).await,
        Some("status") => {
            print_status(&manager);
            Ok(())
        }
        Some("refresh") => refresh(&manager).await,
        Some("logout") => {
            manager.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Some("watch") => watch(&manager).await,
        Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
        None => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn build_manager(config: &Config) -> Result<SessionManager> {
    let api = HttpAuthApi::new(config.api_base_url(), config.request_timeout())
        .context("Failed to create HTTP client")?;
    let cache_dir = Config::cache_dir()?;
    let store = SessionStore::open(Arc::new(FileSessionPersistence::new(&cache_dir)));
    info!(api = %api.base_url(), cache = %cache_dir.display(), "Session manager ready");
    Ok(SessionManager::with_defaults(Arc::new(store), Arc::new(api)))
}

/// Turn a flow error into the message shown to the user.
fn user_error(e: AuthError) -> anyhow::Error {
    warn!(error = %e, "Auth flow failed");
    anyhow::anyhow!(e.user_message())
}

fn prompt_secret(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read from terminal")
}

fn prompt_new_secret(prompt: &str, confirm: &str) -> Result<String> {
    let first = prompt_secret(prompt)?;
    let second = prompt_secret(confirm)?;
    if first != second {
        bail!("Entries do not match");
    }
    Ok(first)
}

// ============================================================================
// Commands
// ============================================================================

async fn login(manager: &SessionManager, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => bail!("No email given. Usage: sessionkeeper login <email>"),
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => prompt_secret(&format!("Password for {}: ", email))?,
    };

    manager.login(&email, &password).await.map_err(user_error)?;

    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match manager.route() {
        AuthRoute::PasscodeLocked => println!("Signed in. Run `sessionkeeper unlock` to enter your passcode."),
        _ => println!("Signed in."),
    }
    Ok(())
}

async fn register(manager: &SessionManager, config: &mut Config, email: Option<&str>) -> Result<()> {
    let Some(email) = email else {
        bail!("Usage: sessionkeeper register <email>");
    };
    let password = prompt_new_secret("Choose a password: ", "Confirm password: ")?;

    manager.register(email, &password).await.map_err(user_error)?;

    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    println!(
        "Account created. Check {} for a code, then run `sessionkeeper verify-email <code>`.",
        email.trim()
    );
    Ok(())
}

async fn verify_email(manager: &SessionManager, code: Option<&str>) -> Result<()> {
    let code = match code {
        Some(code) => code.to_string(),
        None => prompt_secret("Verification code: ")?,
    };
    manager.verify_email(&code).await.map_err(user_error)?;
    println!("Email verified. You are signed in.");
    Ok(())
}

async fn unlock(manager: &SessionManager) -> Result<()> {
    if manager.route() == AuthRoute::Unauthenticated {
        bail!("Not signed in. Run `sessionkeeper login` first.");
    }
    let passcode = prompt_secret("Passcode: ")?;
    if !manager.verify_passcode(&passcode).await {
        bail!("Incorrect passcode");
    }
    println!("Unlocked.");
    Ok(())
}

async fn set_passcode(manager: &SessionManager) -> Result<()> {
    let passcode = prompt_new_secret("New passcode: ", "Confirm passcode: ")?;
    manager.create_passcode(&passcode).await.map_err(user_error)?;
    println!("Passcode set.");
    Ok(())
}

async fn refresh(manager: &SessionManager) -> Result<()> {
    manager.force_refresh().await;
    if !manager.is_session_valid() {
        bail!("Session expired. Please sign in again.");
    }
    println!("Token refreshed.");
    Ok(())
}

/// Stay resident, keeping the session refreshed and reporting lifecycle
/// events until Ctrl-C or the session ends.
async fn watch(manager: &SessionManager) -> Result<()> {
    let mut events = manager.events();
    manager.initialize();
    if !manager.is_initialized() {
        print_status(manager);
        bail!("No active session to watch");
    }
    if let Some(expires_at) = manager.snapshot().token_expires_at {
        manager.schedule_token_refresh(expires_at);
    }
    println!("Watching session. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watcher");
                manager.cleanup();
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{} {}", Local::now().format("%H:%M:%S"), describe(&event));
                    if matches!(event, SessionEvent::SessionExpired | SessionEvent::SignedOut) {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Initialized => "session restored".to_string(),
        SessionEvent::SignedIn => "signed in".to_string(),
        SessionEvent::TokenRefreshed => "token refreshed".to_string(),
        SessionEvent::RefreshRetrying { attempt, delay } => {
            format!("refresh attempt {} failed, retrying in {:.1}s", attempt, delay.as_secs_f64())
        }
        SessionEvent::SessionExpired => "session expired, please sign in again".to_string(),
        SessionEvent::PasscodeSessionExpired => "passcode session expired, app locked".to_string(),
        SessionEvent::SignedOut => "signed out".to_string(),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn print_status(manager: &SessionManager) {
    let record = manager.snapshot();
    let route = match manager.route() {
        AuthRoute::Unauthenticated => "signed out",
        AuthRoute::PasscodeLocked => "locked (passcode required)",
        AuthRoute::Authenticated => "signed in",
    };
    println!("Status:     {}", route);

    if let Some(user) = &record.user {
        println!("User:       {}", user.email);
    }
    if let Some(email) = &record.pending_verification_email {
        println!("Pending:    {} (awaiting email verification)", email);
    }
    if record.is_authenticated {
        if let Some(expires_at) = record.token_expires_at {
            let left = manager.time_until_expiry(expires_at);
            println!(
                "Expires:    {} ({}h {}m left)",
                format_time(expires_at),
                left.as_secs() / 3600,
                (left.as_secs() % 3600) / 60
            );
        }
        if let Some(at) = record.last_activity_at {
            println!("Active:     {}", format_time(at));
        }
        if let Some(expires_at) = record.passcode_session_expires_at {
            println!("Unlocked until {}", format_time(expires_at));
        }
    }
    if let Some(status) = &record.onboarding_status {
        match &record.current_onboarding_step {
            Some(step) => println!("Onboarding: {} ({})", status, step),
            None => println!("Onboarding: {}", status),
        }
    }
    println!(
        "Passcode:   {}    Biometrics: {}",
        if record.has_passcode { "set" } else { "not set" },
        if record.is_biometric_enabled { "on" } else { "off" }
    );
}
