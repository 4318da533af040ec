mod auth;
mod bind;
mod config;
mod error;
mod net;
mod profiles;
mod progress;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing::{debug, info};

use crate::auth::{AuthConfig, AuthOrchestrator, ExecBackend, ServiceType};
use crate::bind::{BindConfig, WifiConnectionCoordinator};
use crate::config::{Cli, Command};
use crate::net::nm::NmStack;
use crate::profiles::{AccountProfile, ProfileStore};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(&cli.log);

    info!("portal-sentry starting");

    let profiles_path = cli
        .profiles_file
        .clone()
        .unwrap_or_else(config::default_profiles_path);

    if let Some(command) = &cli.command {
        return run_account_command(command, &profiles_path);
    }

    let profile = resolve_profile(&cli, &profiles_path)?;

    let stack = match NmStack::new().await {
        Ok(stack) => stack,
        Err(e) => {
            eprintln!("Failed to connect to NetworkManager D-Bus: {e}");
            eprintln!("Is NetworkManager running? Try: systemctl status NetworkManager");
            std::process::exit(1);
        }
    };

    let coordinator = WifiConnectionCoordinator::with_config(
        stack.clone(),
        stack.clone(),
        stack.clone(),
        BindConfig {
            availability_timeout: Duration::from_secs(cli.timeout_secs),
            associate: !cli.no_associate,
            ..Default::default()
        },
    );
    let backend = Arc::new(ExecBackend::new(&cli.backend));
    let orchestrator = AuthOrchestrator::with_config(
        coordinator,
        backend,
        AuthConfig {
            target_ssid: cli.ssid.clone(),
            target_password: cli.wifi_password.clone(),
            ..Default::default()
        },
    );

    // Debug trail of state transitions alongside the progress lines.
    let mut state_rx = orchestrator.state().subscribe();
    let state_log = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            debug!("state: {:?}", *state_rx.borrow_and_update());
        }
    });

    // Stream progress lines to stdout as the trail grows.
    let mut rx = orchestrator.progress().subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while rx.changed().await.is_ok() {
            let text = rx.borrow_and_update().clone();
            if text.is_empty() {
                printed = 0;
                continue;
            }
            let lines: Vec<&str> = text.split('\n').collect();
            for line in lines.iter().skip(printed) {
                println!("{line}");
            }
            printed = lines.len();
        }
    });

    let outcome = orchestrator.authenticate(&profile).await;
    printer.abort();
    state_log.abort();

    match outcome {
        Ok(message) => {
            info!("authentication succeeded: {message}");
            if let Some(iface) = stack.bound_interface() {
                info!("traffic stays pinned to {iface} until this process exits");
            }
            Ok(())
        }
        Err(e) => {
            debug!(
                "attempt ended in {:?}; transitions: {:?}",
                orchestrator.state().get(),
                orchestrator.state().history()
            );
            Err(eyre!("{e} (stage: {})", e.stage()))
        }
    }
}

fn run_account_command(command: &Command, path: &Path) -> Result<()> {
    let mut store = ProfileStore::load(path)?;
    match command {
        Command::Accounts => {
            if store.accounts().is_empty() {
                println!("no saved accounts in {}", path.display());
                return Ok(());
            }
            let selected = store.selected().map(|p| p.id.clone());
            for account in store.accounts() {
                let marker = if selected.as_deref() == Some(account.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                let service = ServiceType::from_backend_value(&account.service_type)
                    .map(ServiceType::display_name)
                    .unwrap_or(account.service_type.as_str());
                println!("{marker} {} ({}, {service})", account.name, account.username);
            }
            Ok(())
        }
        Command::Select { name } => {
            let id = store
                .find_by_name(name)
                .map(|p| p.id.clone())
                .ok_or_else(|| eyre!("no account named '{name}' in {}", path.display()))?;
            store.select(&id)?;
            println!("selected '{name}'");
            Ok(())
        }
        Command::Delete { name } => {
            let id = store
                .find_by_name(name)
                .map(|p| p.id.clone())
                .ok_or_else(|| eyre!("no account named '{name}' in {}", path.display()))?;
            store.delete(&id)?;
            println!("deleted '{name}'");
            Ok(())
        }
    }
}

/// Pick the account to authenticate with: ad-hoc credentials from flags, or
/// a stored profile.
fn resolve_profile(cli: &Cli, path: &Path) -> Result<AccountProfile> {
    if let Some(username) = &cli.username {
        let profile = AccountProfile::new(
            cli.account_name.clone(),
            username.clone(),
            cli.password.clone().unwrap_or_default(),
            cli.service.clone(),
        );
        if cli.save {
            let mut store = ProfileStore::load(path)?;
            store.add(profile.clone())?;
            info!("saved account '{}' to {}", profile.name, path.display());
        }
        return Ok(profile);
    }

    let store = ProfileStore::load(path)?;
    if let Some(name) = &cli.profile {
        return store
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| eyre!("no profile named '{name}' in {}", path.display()));
    }

    store.selected().cloned().ok_or_else(|| {
        eyre!("no credentials: pass --username/--password or save a profile first")
    })
}

/// Tracing to a log file when requested, stderr otherwise. Progress lines go
/// to stdout separately, so the stderr default stays quiet.
fn init_logging(log_path: &Option<String>) {
    use tracing_subscriber::EnvFilter;

    if let Some(path) = log_path {
        let file = match std::fs::File::create(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to create log file {path}: {e}");
                std::process::exit(1);
            }
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}
