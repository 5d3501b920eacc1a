//! Dealer Portal session driver
//!
//! Single-binary front end for the session lifecycle crates:
//! 1. Loads configuration and the on-disk credential record
//! 2. Runs the initial session check and places the route guard
//! 3. Executes one command (PIN entry, callback, logout, API call)
//! 4. Prints the resulting session and guard location

mod cli;
mod config;
mod metrics;

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use api_client::{ApiRequest, AuthMiddleware, ReqwestTransport};
use dealer_auth::{CallbackInfo, EventBus, FileCredentialStore, SessionTerminator};
use session::{
    AppState, Location, PinCheck, PinEntryMode, PinGate, SessionController, SessionStore,
    spawn_session_watch,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

/// Serializes tests that mutate environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs go to stderr so command output stays clean on stdout
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

    let prometheus_handle = metrics::install_recorder()?;

    let cli = Cli::parse();

    let config_path = &cli.config;
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let endpoints = config.endpoints();

    info!(
        environment = %config.portal.environment,
        api_base_url = %endpoints.api_base_url,
        credentials = %config.storage.credentials_path.display(),
        "configuration loaded"
    );

    let credentials = FileCredentialStore::load(config.storage.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential record {}",
                config.storage.credentials_path.display()
            )
        })?;

    let bus = EventBus::new();
    let terminator = Arc::new(SessionTerminator::new(Arc::new(credentials), bus.clone()));
    let store = Arc::new(SessionStore::new(terminator.clone(), config.pin_validity()));
    let _subscriptions = store.attach(&bus);
    let pins = Arc::new(PinGate::new(
        terminator.clone(),
        config.session.pin_max_attempts,
    ));

    let controller = Arc::new(SessionController::new(store, pins, Location::home()));
    controller.on_navigate(|location| info!(%location, "guard navigated"));

    let transport = ReqwestTransport::new(endpoints.api_base_url.clone(), config.timeout())
        .context("failed to build API transport")?;
    let api = AuthMiddleware::new(Arc::new(transport), terminator);

    let watch = spawn_session_watch(controller.clone());
    let session = controller.start().await;
    info!(%session, location = %controller.location(), "initial session check complete");

    let outcome = run(&cli.command, &controller, &api).await;
    watch.abort();

    metrics::record_command(cli.command.name(), outcome.is_ok());
    if cli.metrics {
        print!("{}", prometheus_handle.render());
    }
    outcome
}

async fn run(command: &Command, controller: &SessionController, api: &AuthMiddleware) -> Result<()> {
    match command {
        Command::Status => {
            let mode = controller
                .entry_mode()
                .await
                .context("failed to read PIN state")?;
            let stored = controller
                .store()
                .current()
                .map(|s| s.label())
                .unwrap_or("unknown");
            let effective = controller
                .effective_session()
                .map(|s| s.label())
                .unwrap_or("unknown");
            println!("session: {stored}");
            println!("effective: {effective}");
            println!("pin: {}", entry_mode_label(mode));
            println!("location: {}", controller.location());
        }
        Command::Callback { source } => {
            let payload = read_payload(source)?;
            let info = CallbackInfo::from_bridge_or_payload(&payload)
                .context("failed to parse login callback")?;
            let session = controller
                .accept_callback(&info)
                .await
                .context("failed to accept login callback")?;
            println!("session: {session}");
            println!("location: {}", controller.location());
        }
        Command::SetPin { pin } => {
            let session = controller
                .set_pin(pin.expose())
                .await
                .context("failed to set PIN")?;
            println!("session: {session}");
            println!("location: {}", controller.location());
        }
        Command::VerifyPin { pin } => {
            match controller
                .verify_pin(pin.expose())
                .await
                .context("failed to verify PIN")?
            {
                PinCheck::Verified => {
                    println!("pin verified");
                    println!("location: {}", controller.location());
                }
                PinCheck::Mismatch { attempts_remaining } => {
                    bail!("incorrect PIN, {attempts_remaining} attempt(s) remaining")
                }
                PinCheck::LockedOut => bail!("too many incorrect PIN attempts, signed out"),
            }
        }
        Command::ResetPin => {
            let session = controller
                .reset_pin()
                .await
                .context("failed to reset PIN")?;
            println!("session: {session}");
            println!("location: {}", controller.location());
        }
        Command::Logout => {
            let report = controller.logout().await;
            if !report.is_clean() {
                warn!(remaining = ?report.remaining, "credential record not fully cleared");
            }
            println!("signed out");
            println!("location: {}", controller.location());
        }
        Command::Resume => {
            controller.app_state_changed(AppState::Background).await;
            let location = controller.app_state_changed(AppState::Active).await;
            println!("location: {location}");
        }
        Command::Get { path } => {
            let response = api
                .send(ApiRequest::get(path.as_str()))
                .await
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("GET {path} failed"))?;
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.body),
            }
        }
    }
    Ok(())
}

fn entry_mode_label(mode: PinEntryMode) -> &'static str {
    match mode {
        PinEntryMode::Set => "not set",
        PinEntryMode::Enter => "set",
    }
}

/// Read a callback payload from a file, or from stdin when `source` is `-`.
fn read_payload(source: &str) -> Result<String> {
    if source == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .context("failed to read callback payload from stdin")?;
        return Ok(payload);
    }
    std::fs::read_to_string(source)
        .with_context(|| format!("failed to read callback payload from {source}"))
}
