use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Campus captive-portal login pinned to one Wi-Fi network
#[derive(Parser, Debug)]
#[command(name = "portal-sentry", version, about, long_about = None)]
pub struct Cli {
    /// Account management; without a subcommand the tool authenticates.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Username for an ad-hoc attempt (alternative to --profile)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for an ad-hoc attempt
    #[arg(short, long)]
    pub password: Option<String>,

    /// Access service label or backend value (e.g. 校园网, EDUNET)
    #[arg(short, long, default_value = "校园网")]
    pub service: String,

    /// Display name for an ad-hoc attempt
    #[arg(long, default_value = "ad-hoc")]
    pub account_name: String,

    /// Save the ad-hoc account to the profile store before authenticating
    #[arg(long, default_value_t = false)]
    pub save: bool,

    /// Name of a stored profile to authenticate with
    #[arg(long)]
    pub profile: Option<String>,

    /// Path to the profile store (defaults under ~/.config/portal-sentry)
    #[arg(long)]
    pub profiles_file: Option<PathBuf>,

    /// Target network SSID
    #[arg(long, default_value = "SCUNET")]
    pub ssid: String,

    /// Target network passphrase (empty for the open campus SSID)
    #[arg(long, default_value = "")]
    pub wifi_password: String,

    /// Helper command implementing the portal login protocol
    #[arg(long, default_value = "scunet-login")]
    pub backend: PathBuf,

    /// How long to wait for the target network to appear, in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Never associate programmatically; report what to do instead
    #[arg(long, default_value_t = false)]
    pub no_associate: bool,

    /// Log file path (logs go to stderr if not specified)
    #[arg(short, long)]
    pub log: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List saved accounts; the selected one is marked
    Accounts,
    /// Make a saved account the default, by name
    Select { name: String },
    /// Delete a saved account, by name
    Delete { name: String },
}

pub fn default_profiles_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/portal-sentry/profiles.json")
}
